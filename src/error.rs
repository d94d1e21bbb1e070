//! Error types shared by the engine and the exchange adapters.

/// Problems with credentials or operator settings. Raised before any call
/// reaches the exchange.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    #[error("invalid {field} {value}: {reason}")]
    InvalidSetting {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("invalid {var} '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures talking to the lending API or the price source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(String),

    #[error("api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{0}")]
    NotFound(String),

    /// The API answered but refused or did not settle the operation
    #[error("{0}")]
    Rejected(String),

    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Decode(e.to_string())
    }
}
