use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Method;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::{format_amount, BinanceClient};
use super::types::{
    LoanAdjustResponse, LoanBorrowResponse, LoanOrder, LoanOrdersPage, LoanRepayResponse,
};
use crate::config::ValuationConfig;
use crate::error::ExchangeError;
use crate::exchange::{LendingExchange, PriceOracle};
use crate::models::{AccountSnapshot, AssetBalance, LiquidationRisk, LoanPosition};

const LOAN_TERM_DAYS: u32 = 7;
const PAGE_SIZE: u32 = 100;

/// Crypto-loan flavor: debt lives in individual loan orders, repayments and
/// collateral top-ups are drawn from the spot wallet.
pub struct LoanExchange {
    client: Arc<BinanceClient>,
    oracle: Arc<dyn PriceOracle>,
    valuation: ValuationConfig,
    collateral_asset: String,
}

impl LoanExchange {
    pub fn new(
        client: Arc<BinanceClient>,
        oracle: Arc<dyn PriceOracle>,
        valuation: ValuationConfig,
        collateral_asset: &str,
    ) -> Self {
        Self {
            client,
            oracle,
            valuation,
            collateral_asset: collateral_asset.to_string(),
        }
    }

    async fn ongoing_orders(&self) -> Result<Vec<LoanOrder>, ExchangeError> {
        let page: LoanOrdersPage = self
            .client
            .signed(
                Method::GET,
                "/sapi/v1/loan/ongoing/orders",
                &[("current", "1".to_string()), ("size", PAGE_SIZE.to_string())],
            )
            .await?;

        if page.total > page.rows.len() as u64 {
            warn!(
                "Only {} of {} loan orders fetched; valuation covers the first page",
                page.rows.len(),
                page.total
            );
        }
        Ok(page.rows)
    }

    /// Quote prices for every coin in `coins`. Any missing price fails the
    /// whole lookup: an unvalued debt would understate the LTV.
    async fn quote_prices(
        &self,
        coins: &BTreeSet<String>,
    ) -> Result<HashMap<String, f64>, ExchangeError> {
        let lookups = coins.iter().map(|coin| async move {
            let price = if self.valuation.is_stable(coin) {
                Ok(1.0)
            } else {
                self.oracle.get_reference_price(coin).await
            };
            (coin.clone(), price)
        });

        let mut prices = HashMap::new();
        for (coin, price) in join_all(lookups).await {
            prices.insert(coin, price?);
        }
        Ok(prices)
    }
}

/// Value `amount` of `coin` in units of the reference asset.
fn to_reference(
    amount: f64,
    coin: &str,
    prices: &HashMap<String, f64>,
    reference_asset: &str,
) -> Result<f64, ExchangeError> {
    if coin == reference_asset {
        return Ok(amount);
    }
    let coin_price = prices
        .get(coin)
        .copied()
        .ok_or_else(|| ExchangeError::PriceUnavailable(coin.to_string()))?;
    let reference_price = prices
        .get(reference_asset)
        .copied()
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ExchangeError::PriceUnavailable(reference_asset.to_string()))?;
    Ok(amount * coin_price / reference_price)
}

/// Largest order matching `pick`
fn largest_order<'a>(
    orders: &'a [LoanOrder],
    pick: impl Fn(&LoanOrder) -> bool,
) -> Option<&'a LoanOrder> {
    orders
        .iter()
        .filter(|o| pick(o))
        .max_by(|a, b| a.total_debt.total_cmp(&b.total_debt))
}

/// Spread a repayment of `amount` over the open `asset` loans, largest debt
/// first, never paying more than an order owes. Returns the per-order amounts
/// and whatever exceeds the total debt.
fn split_repayment<'a>(
    orders: &'a [LoanOrder],
    asset: &str,
    amount: f64,
) -> (Vec<(&'a LoanOrder, f64)>, f64) {
    let mut open: Vec<&LoanOrder> = orders
        .iter()
        .filter(|o| o.loan_coin == asset && o.total_debt > 0.0)
        .collect();
    open.sort_by(|a, b| b.total_debt.total_cmp(&a.total_debt));

    let mut remaining = amount;
    let mut allocations = Vec::new();
    for order in open {
        if remaining <= 0.0 {
            break;
        }
        let part = remaining.min(order.total_debt);
        allocations.push((order, part));
        remaining -= part;
    }
    (allocations, remaining.max(0.0))
}

/// A repay the API accepted but did not settle
fn check_repay(resp: &LoanRepayResponse, order_id: &str) -> Result<(), ExchangeError> {
    if resp.repay_status.as_deref() == Some("Failed") {
        return Err(ExchangeError::Rejected(format!(
            "repay of {} on loan order {} failed",
            resp.loan_coin, order_id
        )));
    }
    Ok(())
}

#[async_trait]
impl LendingExchange for LoanExchange {
    fn name(&self) -> &str {
        "binance-loan"
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError> {
        let orders = self.ongoing_orders().await?;
        let account = self.client.account_info().await?;

        let mut coins: BTreeSet<String> = BTreeSet::new();
        coins.insert(self.valuation.reference_asset.clone());
        for order in &orders {
            coins.insert(order.loan_coin.clone());
            coins.insert(order.collateral_coin.clone());
        }
        let prices = self.quote_prices(&coins).await?;

        let reference = &self.valuation.reference_asset;
        let mut total_collateral_value = 0.0;
        let mut total_debt_value = 0.0;
        let mut borrowed: BTreeMap<String, f64> = BTreeMap::new();
        let mut loans = Vec::with_capacity(orders.len());

        for order in &orders {
            if order.total_debt <= 0.0 {
                continue;
            }
            total_debt_value += to_reference(order.total_debt, &order.loan_coin, &prices, reference)?;
            total_collateral_value +=
                to_reference(order.collateral_amount, &order.collateral_coin, &prices, reference)?;
            *borrowed.entry(order.loan_coin.clone()).or_default() += order.total_debt;

            loans.push(LoanPosition {
                order_id: order.order_id.clone(),
                loan_coin: order.loan_coin.clone(),
                collateral_coin: order.collateral_coin.clone(),
                total_debt: order.total_debt,
                collateral_amount: order.collateral_amount,
                current_ltv: order.current_ltv * 100.0,
                margin_call_ltv: order.margin_call_ltv * 100.0,
            });
        }

        for loan in loans.iter().filter(|l| l.liquidation_risk() == LiquidationRisk::High) {
            warn!(
                "🚨 Loan order {} ({} against {}) at {:.2}% LTV, margin call at {:.2}%",
                loan.order_id, loan.loan_coin, loan.collateral_coin, loan.current_ltv, loan.margin_call_ltv
            );
        }

        let mut balances: BTreeMap<String, AssetBalance> = BTreeMap::new();
        for balance in account.balances {
            if balance.free > 0.0 || balance.locked > 0.0 {
                balances.insert(
                    balance.asset,
                    AssetBalance {
                        free: balance.free,
                        locked: balance.locked,
                        borrowed: 0.0,
                    },
                );
            }
        }
        for (coin, debt) in borrowed {
            balances.entry(coin).or_default().borrowed = debt;
        }

        debug!(
            "Loan snapshot: {} orders, collateral {:.8} {}, debt {:.8} {}",
            loans.len(),
            total_collateral_value,
            reference,
            total_debt_value,
            reference
        );

        Ok(AccountSnapshot {
            total_collateral_value,
            total_debt_value,
            balances,
            loans,
            fetched_at: Utc::now(),
        })
    }

    async fn repay(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let orders = self.ongoing_orders().await?;
        let (allocations, surplus) = split_repayment(&orders, asset, amount);
        if allocations.is_empty() {
            return Err(ExchangeError::NotFound(format!("No active loan found for {}", asset)));
        }
        if surplus > 0.0 {
            warn!(
                "Repay of {} {} exceeds open debt; {} {} left unspent",
                amount, asset, surplus, asset
            );
        }

        let mut repaid = Vec::with_capacity(allocations.len());
        for (order, part) in allocations {
            let resp: LoanRepayResponse = self
                .client
                .signed(
                    Method::POST,
                    "/sapi/v1/loan/repay",
                    &[
                        ("orderId", order.order_id.clone()),
                        ("amount", format_amount(part)),
                    ],
                )
                .await?;
            check_repay(&resp, &order.order_id)?;

            info!("Repaid {} {} on loan order {}", part, asset, order.order_id);
            repaid.push(order.order_id.clone());
        }

        Ok(repaid.join(","))
    }

    async fn borrow(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let resp: LoanBorrowResponse = self
            .client
            .signed(
                Method::POST,
                "/sapi/v1/loan/borrow",
                &[
                    ("loanCoin", asset.to_string()),
                    ("loanAmount", format_amount(amount)),
                    ("collateralCoin", self.collateral_asset.clone()),
                    ("loanTerm", LOAN_TERM_DAYS.to_string()),
                ],
            )
            .await?;

        info!(
            "Borrowed {} {} against {} (order {})",
            resp.loan_amount, resp.loan_coin, self.collateral_asset, resp.order_id
        );
        Ok(resp.order_id)
    }

    async fn add_collateral(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let orders = self.ongoing_orders().await?;
        let order = largest_order(&orders, |o| o.collateral_coin == asset && o.total_debt > 0.0)
            .ok_or_else(|| {
                ExchangeError::NotFound(format!("No active loan found with {} collateral", asset))
            })?;

        let resp: LoanAdjustResponse = self
            .client
            .signed(
                Method::POST,
                "/sapi/v1/loan/adjust/ltv",
                &[
                    ("orderId", order.order_id.clone()),
                    ("amount", format_amount(amount)),
                    ("direction", "ADDITIONAL".to_string()),
                ],
            )
            .await?;

        info!(
            "Added {} {} as collateral to loan order {} ({})",
            resp.amount, resp.collateral_coin, order.order_id, resp.direction
        );
        Ok(order.order_id.clone())
    }
}
