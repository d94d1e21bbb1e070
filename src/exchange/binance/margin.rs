use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::client::{format_amount, BinanceClient};
use super::types::{AccountInfo, MarginAccount, TransactionAck};
use crate::error::ExchangeError;
use crate::exchange::LendingExchange;
use crate::models::{AccountSnapshot, AssetBalance};

/// `type` parameter of `/sapi/v1/margin/transfer`
const TRANSFER_SPOT_TO_MARGIN: &str = "1";

/// Cross-margin flavor. The account reports its totals in BTC, so this
/// adapter is only valid with BTC as the reference asset.
///
/// `free` in the snapshot is the spot wallet balance: funds outside the
/// margin position. Repaying and pledging move them into the margin account
/// first.
pub struct MarginExchange {
    client: Arc<BinanceClient>,
    reference_asset: String,
}

impl MarginExchange {
    pub fn new(client: Arc<BinanceClient>, reference_asset: &str) -> Self {
        Self {
            client,
            reference_asset: reference_asset.to_string(),
        }
    }

    async fn transfer_to_margin(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let ack: TransactionAck = self
            .client
            .signed(
                Method::POST,
                "/sapi/v1/margin/transfer",
                &[
                    ("asset", asset.to_string()),
                    ("amount", format_amount(amount)),
                    ("type", TRANSFER_SPOT_TO_MARGIN.to_string()),
                ],
            )
            .await?;
        debug!("Transferred {} {} spot -> margin (tranId {})", amount, asset, ack.tran_id);
        Ok(ack.tran_id)
    }
}

/// Merge the margin account with spot balances into one snapshot
fn build_snapshot(margin: MarginAccount, spot: AccountInfo) -> AccountSnapshot {
    let mut balances: BTreeMap<String, AssetBalance> = BTreeMap::new();

    for asset in margin.user_assets {
        let borrowed = asset.borrowed + asset.interest;
        if borrowed > 0.0 || asset.locked > 0.0 {
            let entry = balances.entry(asset.asset).or_default();
            entry.borrowed = borrowed;
            entry.locked = asset.locked;
        }
    }
    for balance in spot.balances {
        if balance.free > 0.0 {
            balances.entry(balance.asset).or_default().free = balance.free;
        }
    }

    AccountSnapshot {
        total_collateral_value: margin.total_asset_of_btc,
        total_debt_value: margin.total_liability_of_btc,
        balances,
        loans: Vec::new(),
        fetched_at: Utc::now(),
    }
}

#[async_trait]
impl LendingExchange for MarginExchange {
    fn name(&self) -> &str {
        "binance-margin"
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError> {
        let margin: MarginAccount = self
            .client
            .signed(Method::GET, "/sapi/v1/margin/account", &[])
            .await?;
        let spot = self.client.account_info().await?;

        debug!(
            "Margin snapshot: assets {} {}, liabilities {} {}, margin level {}",
            margin.total_asset_of_btc,
            self.reference_asset,
            margin.total_liability_of_btc,
            self.reference_asset,
            margin.margin_level
        );
        Ok(build_snapshot(margin, spot))
    }

    async fn repay(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        self.transfer_to_margin(asset, amount).await?;

        let ack: TransactionAck = self
            .client
            .signed(
                Method::POST,
                "/sapi/v1/margin/repay",
                &[("asset", asset.to_string()), ("amount", format_amount(amount))],
            )
            .await?;

        info!("Repaid {} {} on margin account (tranId {})", amount, asset, ack.tran_id);
        Ok(ack.tran_id)
    }

    async fn borrow(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let ack: TransactionAck = self
            .client
            .signed(
                Method::POST,
                "/sapi/v1/margin/loan",
                &[("asset", asset.to_string()), ("amount", format_amount(amount))],
            )
            .await?;

        info!("Borrowed {} {} on margin account (tranId {})", amount, asset, ack.tran_id);
        Ok(ack.tran_id)
    }

    async fn add_collateral(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let tran_id = self.transfer_to_margin(asset, amount).await?;
        info!("Added {} {} as margin collateral (tranId {})", amount, asset, tran_id);
        Ok(tran_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_merges_spot_free_with_margin_debt() {
        let margin: MarginAccount = serde_json::from_str(
            r#"{
                "totalAssetOfBtc": "2.0",
                "totalLiabilityOfBtc": "1.6",
                "marginLevel": "1.25",
                "userAssets": [
                    {"asset": "BTC", "free": "2.0", "locked": "0", "borrowed": "0", "interest": "0"},
                    {"asset": "USDT", "free": "0", "locked": "0", "borrowed": "79000", "interest": "1000"}
                ]
            }"#,
        )
        .unwrap();
        let spot: AccountInfo = serde_json::from_str(
            r#"{
                "canTrade": true,
                "balances": [
                    {"asset": "USDT", "free": "5000", "locked": "0"},
                    {"asset": "ETH", "free": "1.5", "locked": "0"},
                    {"asset": "DOGE", "free": "0", "locked": "0"}
                ]
            }"#,
        )
        .unwrap();

        let snapshot = build_snapshot(margin, spot);
        assert_eq!(snapshot.total_collateral_value, 2.0);
        assert_eq!(snapshot.total_debt_value, 1.6);

        let usdt = snapshot.balance("USDT");
        assert_eq!(usdt.borrowed, 80_000.0);
        assert_eq!(usdt.free, 5000.0);
        assert_eq!(snapshot.balance("ETH").free, 1.5);
        // Margin-side BTC is pledged, not spendable
        assert_eq!(snapshot.balance("BTC").free, 0.0);
        assert!(!snapshot.balances.contains_key("DOGE"));
        assert!(snapshot.loans.is_empty());
    }
}
