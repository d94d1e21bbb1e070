pub mod binance;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use eyre::{bail, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::{EngineConfig, ExchangeFlavor};
use crate::error::ExchangeError;
use crate::models::AccountSnapshot;

/// Lending/margin API the engine issues corrective actions through.
///
/// Every call is a single best-effort request; the `Ok` value is the
/// exchange's reference for the operation (transaction or order id).
#[async_trait]
pub trait LendingExchange: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError>;

    async fn repay(&self, asset: &str, amount: f64) -> Result<String, ExchangeError>;

    async fn borrow(&self, asset: &str, amount: f64) -> Result<String, ExchangeError>;

    async fn add_collateral(&self, asset: &str, amount: f64) -> Result<String, ExchangeError>;
}

/// Source of quote-denominated reference prices
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_reference_price(&self, asset: &str) -> Result<f64, ExchangeError>;
}

/// Build the exchange adapter and price oracle selected by `config.flavor`.
pub fn connect(config: &EngineConfig) -> Result<(Arc<dyn LendingExchange>, Arc<dyn PriceOracle>)> {
    let client = Arc::new(binance::BinanceClient::new(
        &config.api_key,
        &config.secret_key,
        &config.base_url,
        config.request_timeout(),
    )?);

    let oracle: Arc<dyn PriceOracle> = Arc::new(binance::TickerOracle::new(
        client.clone(),
        &config.valuation.quote_asset,
    ));

    let exchange: Arc<dyn LendingExchange> = match config.flavor {
        ExchangeFlavor::Loan => {
            info!("🏦 Using crypto-loan API at {}", config.base_url);
            Arc::new(binance::LoanExchange::new(
                client,
                oracle.clone(),
                config.valuation.clone(),
                &config.loan_collateral_asset,
            ))
        }
        ExchangeFlavor::Margin => {
            if config.valuation.reference_asset != "BTC" {
                bail!(
                    "the margin flavor reports totals in BTC; REFERENCE_ASSET is {}",
                    config.valuation.reference_asset
                );
            }
            info!("🏦 Using cross-margin API at {}", config.base_url);
            Arc::new(binance::MarginExchange::new(
                client,
                &config.valuation.reference_asset,
            ))
        }
    };

    Ok((exchange, oracle))
}
