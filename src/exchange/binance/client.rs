//! Async Binance REST client.

use chrono::Utc;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::auth;
use super::types::{AccountInfo, ApiErrorBody, TickerPrice};
use crate::error::ExchangeError;

const RECV_WINDOW_MS: u64 = 5000;

pub struct BinanceClient {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    timeout: Duration,
}

impl BinanceClient {
    /// Every request made through this client is bounded by `timeout`.
    pub fn new(
        api_key: &str,
        secret_key: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Map a transport failure, keeping timeouts distinct from other errors.
    fn transport_error(&self, e: reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            ExchangeError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            e.into()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Test connectivity (GET /api/v3/ping).
    pub async fn ping(&self) -> Result<(), ExchangeError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(resp).await?;
        Ok(())
    }

    /// Spot account balances (GET /api/v3/account).
    pub async fn account_info(&self) -> Result<AccountInfo, ExchangeError> {
        self.signed(Method::GET, "/api/v3/account", &[]).await
    }

    /// Latest price for `symbol` (GET /api/v3/ticker/price).
    pub async fn ticker_price(&self, symbol: &str) -> Result<TickerPrice, ExchangeError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = check_status(resp).await?;
        resp.json::<TickerPrice>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// Call a USER_DATA / TRADE endpoint. Parameters are signed together with
    /// `recvWindow` and `timestamp`; POST sends them as a form body.
    pub async fn signed<T>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned,
    {
        let query = signed_query(params, Utc::now().timestamp_millis(), &self.secret_key)?;
        let url = format!("{}{}", self.base_url, path);

        debug!("{} {} ({} params)", method, path, params.len());

        let request = if method == Method::GET || method == Method::DELETE {
            self.client.request(method, format!("{}?{}", url, query))
        } else {
            self.client
                .request(method, &url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(query)
        };

        let resp = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = check_status(resp).await?;
        resp.json::<T>().await.map_err(|e| self.transport_error(e))
    }
}

fn signed_query(
    params: &[(&str, String)],
    timestamp_ms: i64,
    secret_key: &str,
) -> Result<String, ExchangeError> {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("recvWindow", &RECV_WINDOW_MS.to_string());
    serializer.append_pair("timestamp", &timestamp_ms.to_string());
    let query = serializer.finish();

    let signature = auth::sign(&query, secret_key)?;
    Ok(format!("{}&signature={}", query, signature))
}

async fn check_status(resp: Response) -> Result<Response, ExchangeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(err) => Err(ExchangeError::Api {
            code: err.code,
            msg: err.msg,
        }),
        Err(_) => Err(ExchangeError::Http(format!("{} returned: {}", status, body))),
    }
}

/// Render an amount the way the API accepts it: at most 8 decimals, rounded
/// down, no trailing zeros.
pub fn format_amount(amount: f64) -> String {
    let truncated = (amount * 1e8).floor() / 1e8;
    let rendered = format!("{:.8}", truncated);
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_rounds_down() {
        assert_eq!(format_amount(1.0), "1");
        assert_eq!(format_amount(0.123456789), "0.12345678");
        assert_eq!(format_amount(950.5), "950.5");
    }

    #[test]
    fn test_signed_query_appends_window_timestamp_and_signature() {
        let params = [("asset", "BTC".to_string()), ("amount", "0.5".to_string())];
        let query = signed_query(&params, 1_499_827_319_559, "secret").unwrap();

        assert!(query.starts_with("asset=BTC&amount=0.5&recvWindow=5000&timestamp=1499827319559&signature="));
        let signature = query.rsplit("signature=").next().unwrap();
        assert_eq!(
            signature,
            auth::sign(
                "asset=BTC&amount=0.5&recvWindow=5000&timestamp=1499827319559",
                "secret"
            )
            .unwrap()
        );
    }

    #[tokio::test]
    async fn test_stalled_server_reports_timeout() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = BinanceClient::new(
            "key",
            "secret",
            &format!("http://{}", addr),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(client.ping().await, Err(ExchangeError::Timeout { secs: 1 }));
        assert_eq!(
            client.account_info().await.map(|_| ()),
            Err(ExchangeError::Timeout { secs: 1 })
        );

        server.abort();
    }
}
