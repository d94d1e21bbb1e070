use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::client::BinanceClient;
use crate::error::ExchangeError;
use crate::exchange::PriceOracle;

/// Quote prices from the spot ticker (`<ASSET><QUOTE>` symbols).
pub struct TickerOracle {
    client: Arc<BinanceClient>,
    quote_asset: String,
}

impl TickerOracle {
    pub fn new(client: Arc<BinanceClient>, quote_asset: &str) -> Self {
        Self {
            client,
            quote_asset: quote_asset.to_string(),
        }
    }

    fn symbol(&self, asset: &str) -> String {
        format!("{}{}", asset, self.quote_asset)
    }
}

#[async_trait]
impl PriceOracle for TickerOracle {
    async fn get_reference_price(&self, asset: &str) -> Result<f64, ExchangeError> {
        if asset == self.quote_asset {
            return Ok(1.0);
        }

        let symbol = self.symbol(asset);
        let ticker = match self.client.ticker_price(&symbol).await {
            Ok(ticker) => ticker,
            // Unknown symbol
            Err(ExchangeError::Api { code: -1121, .. }) => {
                return Err(ExchangeError::PriceUnavailable(asset.to_string()))
            }
            Err(e) => return Err(e),
        };

        if !ticker.price.is_finite() || ticker.price <= 0.0 {
            return Err(ExchangeError::PriceUnavailable(asset.to_string()));
        }

        debug!("{} = {} {}", ticker.symbol, ticker.price, self.quote_asset);
        Ok(ticker.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn oracle() -> TickerOracle {
        let client =
            BinanceClient::new("key", "secret", "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        TickerOracle::new(Arc::new(client), "USDT")
    }

    #[test]
    fn test_symbol_is_asset_then_quote() {
        assert_eq!(oracle().symbol("BTC"), "BTCUSDT");
    }

    #[tokio::test]
    async fn test_quote_asset_prices_at_one_without_request() {
        assert_eq!(oracle().get_reference_price("USDT").await.unwrap(), 1.0);
    }
}
