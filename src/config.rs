use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_TARGET_LTV: f64 = 74.0;
pub const DEFAULT_REBALANCE_THRESHOLD: f64 = 2.0;
pub const DEFAULT_MIN_REBALANCE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_BORROW_AMOUNT: f64 = 10_000.0;
pub const DEFAULT_MIN_REPAY_AMOUNT: f64 = 10.0;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Operator-owned rebalancing settings.
///
/// Ranges are enforced when the value is built, so every evaluation can read
/// the fields without re-checking them. Deserialization goes through the same
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SettingsUpdate")]
pub struct RebalanceSettings {
    target_ltv: f64,
    rebalance_threshold: f64,
    min_rebalance_interval_secs: u64,
    max_borrow_amount: f64,
    min_repay_amount: f64,
}

/// Partial settings change. Missing fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub target_ltv: Option<f64>,
    pub rebalance_threshold: Option<f64>,
    pub min_rebalance_interval_secs: Option<u64>,
    pub max_borrow_amount: Option<f64>,
    pub min_repay_amount: Option<f64>,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            target_ltv: DEFAULT_TARGET_LTV,
            rebalance_threshold: DEFAULT_REBALANCE_THRESHOLD,
            min_rebalance_interval_secs: DEFAULT_MIN_REBALANCE_INTERVAL_SECS,
            max_borrow_amount: DEFAULT_MAX_BORROW_AMOUNT,
            min_repay_amount: DEFAULT_MIN_REPAY_AMOUNT,
        }
    }
}

impl RebalanceSettings {
    pub fn new(
        target_ltv: f64,
        rebalance_threshold: f64,
        min_rebalance_interval_secs: u64,
        max_borrow_amount: f64,
        min_repay_amount: f64,
    ) -> Result<Self, ConfigError> {
        check_range("target_ltv", target_ltv, |v| v > 0.0 && v < 100.0, "must be between 0 and 100 (exclusive)")?;
        check_range("rebalance_threshold", rebalance_threshold, |v| (0.0..100.0).contains(&v), "must be in [0, 100)")?;
        check_range("max_borrow_amount", max_borrow_amount, |v| v > 0.0, "must be greater than 0")?;
        check_range("min_repay_amount", min_repay_amount, |v| v >= 0.0, "cannot be negative")?;

        Ok(Self {
            target_ltv,
            rebalance_threshold,
            min_rebalance_interval_secs,
            max_borrow_amount,
            min_repay_amount,
        })
    }

    /// Build a new validated value with `update` applied on top of `self`.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self, ConfigError> {
        Self::new(
            update.target_ltv.unwrap_or(self.target_ltv),
            update.rebalance_threshold.unwrap_or(self.rebalance_threshold),
            update
                .min_rebalance_interval_secs
                .unwrap_or(self.min_rebalance_interval_secs),
            update.max_borrow_amount.unwrap_or(self.max_borrow_amount),
            update.min_repay_amount.unwrap_or(self.min_repay_amount),
        )
    }

    pub fn target_ltv(&self) -> f64 {
        self.target_ltv
    }

    pub fn rebalance_threshold(&self) -> f64 {
        self.rebalance_threshold
    }

    pub fn min_rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.min_rebalance_interval_secs)
    }

    pub fn max_borrow_amount(&self) -> f64 {
        self.max_borrow_amount
    }

    pub fn min_repay_amount(&self) -> f64 {
        self.min_repay_amount
    }

    /// Load settings from a JSON file. Fields absent from the file use defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read settings file {}", path))?;
        let settings: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("failed to parse settings file {}", path))?;
        Ok(settings)
    }

    /// Save settings to a JSON file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl TryFrom<SettingsUpdate> for RebalanceSettings {
    type Error = ConfigError;

    fn try_from(update: SettingsUpdate) -> Result<Self, Self::Error> {
        RebalanceSettings::default().apply(&update)
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
    reason: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && ok(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            field,
            value,
            reason,
        })
    }
}

/// Which lending API family the exchange adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeFlavor {
    /// Crypto-loan orders (`/sapi/v1/loan/*`)
    Loan,
    /// Cross-margin account (`/sapi/v1/margin/*`)
    Margin,
}

impl FromStr for ExchangeFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loan" => Ok(ExchangeFlavor::Loan),
            "margin" => Ok(ExchangeFlavor::Margin),
            other => Err(ConfigError::InvalidValue {
                var: "EXCHANGE_FLAVOR",
                value: other.to_string(),
                reason: "expected 'loan' or 'margin'".to_string(),
            }),
        }
    }
}

impl fmt::Display for ExchangeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeFlavor::Loan => write!(f, "loan"),
            ExchangeFlavor::Margin => write!(f, "margin"),
        }
    }
}

/// Asset universe used to value balances and pick corrective assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Unit of every monetary threshold (borrow caps, minimums)
    pub quote_asset: String,
    /// Unit of snapshot collateral/debt totals
    pub reference_asset: String,
    /// Asset drawn when the planner proposes a borrow
    pub borrow_asset: String,
    /// Assets valued 1:1 against the quote asset
    pub stable_assets: Vec<String>,
    /// Allow-list for `add_collateral`, in preference order
    pub collateral_assets: Vec<String>,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            reference_asset: "BTC".to_string(),
            borrow_asset: "USDT".to_string(),
            stable_assets: vec![
                "USDT".to_string(),
                "BUSD".to_string(),
                "USDC".to_string(),
                "FDUSD".to_string(),
            ],
            collateral_assets: vec!["BTC".to_string(), "ETH".to_string(), "BNB".to_string()],
        }
    }
}

impl ValuationConfig {
    pub fn is_stable(&self, asset: &str) -> bool {
        asset == self.quote_asset || self.stable_assets.iter().any(|s| s == asset)
    }
}

/// Full engine configuration: credentials, exchange wiring and default settings.
#[derive(Clone)]
pub struct EngineConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub flavor: ExchangeFlavor,
    pub request_timeout_secs: u64,
    pub history_capacity: usize,
    pub valuation: ValuationConfig,
    /// Collateral pledged when the loan flavor opens a new borrow
    pub loan_collateral_asset: String,
    /// Period of the worker's automatic pass; `None` disables it
    pub auto_rebalance_interval_secs: Option<u64>,
    pub settings: RebalanceSettings,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &mask(&self.api_key))
            .field("secret_key", &"***")
            .field("base_url", &self.base_url)
            .field("flavor", &self.flavor)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("history_capacity", &self.history_capacity)
            .field("valuation", &self.valuation)
            .field("loan_collateral_asset", &self.loan_collateral_asset)
            .field("auto_rebalance_interval_secs", &self.auto_rebalance_interval_secs)
            .field("settings", &self.settings)
            .finish()
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = required_env("BINANCE_API_KEY")?;
        let secret_key = required_env("BINANCE_SECRET_KEY")?;

        let base_url = std::env::var("BINANCE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            var: "BINANCE_BASE_URL",
            value: base_url.clone(),
            reason: e.to_string(),
        })?;

        let flavor = match std::env::var("EXCHANGE_FLAVOR") {
            Ok(raw) => raw.parse::<ExchangeFlavor>()?,
            Err(_) => ExchangeFlavor::Loan,
        };

        let request_timeout_secs = match env_or("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS) {
            0 => {
                warn!("REQUEST_TIMEOUT_SECS cannot be 0. Using default {} seconds.", DEFAULT_REQUEST_TIMEOUT_SECS);
                DEFAULT_REQUEST_TIMEOUT_SECS
            }
            secs => secs,
        };

        let history_capacity = match env_or("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY) {
            0 => {
                warn!("HISTORY_CAPACITY cannot be 0. Using default {}.", DEFAULT_HISTORY_CAPACITY);
                DEFAULT_HISTORY_CAPACITY
            }
            capacity => capacity,
        };

        let defaults = ValuationConfig::default();
        let quote_asset = env_asset("QUOTE_ASSET").unwrap_or(defaults.quote_asset);
        let valuation = ValuationConfig {
            reference_asset: env_asset("REFERENCE_ASSET").unwrap_or(defaults.reference_asset),
            borrow_asset: env_asset("BORROW_ASSET").unwrap_or_else(|| quote_asset.clone()),
            stable_assets: env_asset_list("STABLE_ASSETS").unwrap_or(defaults.stable_assets),
            collateral_assets: env_asset_list("COLLATERAL_ASSETS").unwrap_or(defaults.collateral_assets),
            quote_asset,
        };

        let loan_collateral_asset =
            env_asset("LOAN_COLLATERAL_ASSET").unwrap_or_else(|| valuation.reference_asset.clone());

        let auto_rebalance_interval_secs = match env_or("AUTO_REBALANCE_INTERVAL_SECS", 0u64) {
            0 => None,
            secs => Some(secs),
        };

        let settings = RebalanceSettings::new(
            env_or("DEFAULT_TARGET_LTV", DEFAULT_TARGET_LTV),
            env_or("DEFAULT_REBALANCE_THRESHOLD", DEFAULT_REBALANCE_THRESHOLD),
            env_or("MIN_REBALANCE_INTERVAL_SECS", DEFAULT_MIN_REBALANCE_INTERVAL_SECS),
            env_or("MAX_BORROW_AMOUNT", DEFAULT_MAX_BORROW_AMOUNT),
            env_or("MIN_REPAY_AMOUNT", DEFAULT_MIN_REPAY_AMOUNT),
        )?;

        Ok(Self {
            api_key,
            secret_key,
            base_url,
            flavor,
            request_timeout_secs,
            history_capacity,
            valuation,
            loan_collateral_asset,
            auto_rebalance_interval_secs,
            settings,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        format!(
            "LTV Rebalancer Configuration:\n\
             - API Key: {}\n\
             - Base URL: {}\n\
             - Flavor: {}\n\
             - Request Timeout: {}s\n\
             - Quote/Reference Asset: {}/{}\n\
             - Borrow Asset: {}\n\
             - Collateral Assets: {}\n\
             - Target LTV: {}% (threshold {}%)\n\
             - Min Rebalance Interval: {}s\n\
             - Auto Rebalance: {}",
            mask(&self.api_key),
            self.base_url,
            self.flavor,
            self.request_timeout_secs,
            self.valuation.quote_asset,
            self.valuation.reference_asset,
            self.valuation.borrow_asset,
            self.valuation.collateral_assets.join(", "),
            self.settings.target_ltv(),
            self.settings.rebalance_threshold(),
            self.settings.min_rebalance_interval().as_secs(),
            self.auto_rebalance_interval_secs
                .map_or("disabled".to_string(), |s| format!("every {}s", s)),
        )
    }
}

fn required_env(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential(var)),
    }
}

fn env_or<T>(var: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {} '{}': {}. Using default {}.", var, raw, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_asset(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}

fn env_asset_list(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let assets: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if assets.is_empty() {
        warn!("{} is empty. Using defaults.", var);
        None
    } else {
        Some(assets)
    }
}

fn mask(value: &str) -> String {
    if value.len() > 8 {
        format!("{}...", &value[..8])
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = RebalanceSettings::default();
        assert_eq!(settings.target_ltv(), 74.0);
        assert_eq!(settings.rebalance_threshold(), 2.0);
        assert_eq!(settings.min_rebalance_interval(), Duration::from_secs(300));
        assert_eq!(settings.max_borrow_amount(), 10_000.0);
        assert_eq!(settings.min_repay_amount(), 10.0);
    }

    #[test]
    fn test_settings_reject_out_of_range_values() {
        assert!(matches!(
            RebalanceSettings::new(0.0, 2.0, 300, 100.0, 10.0),
            Err(ConfigError::InvalidSetting { field: "target_ltv", .. })
        ));
        assert!(matches!(
            RebalanceSettings::new(100.0, 2.0, 300, 100.0, 10.0),
            Err(ConfigError::InvalidSetting { field: "target_ltv", .. })
        ));
        assert!(matches!(
            RebalanceSettings::new(74.0, -1.0, 300, 100.0, 10.0),
            Err(ConfigError::InvalidSetting { field: "rebalance_threshold", .. })
        ));
        assert!(matches!(
            RebalanceSettings::new(74.0, 2.0, 300, 0.0, 10.0),
            Err(ConfigError::InvalidSetting { field: "max_borrow_amount", .. })
        ));
        assert!(matches!(
            RebalanceSettings::new(74.0, 2.0, 300, 100.0, f64::NAN),
            Err(ConfigError::InvalidSetting { field: "min_repay_amount", .. })
        ));
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let settings = RebalanceSettings::default();
        let update = SettingsUpdate {
            target_ltv: Some(60.0),
            ..Default::default()
        };

        let updated = settings.apply(&update).unwrap();
        assert_eq!(updated.target_ltv(), 60.0);
        assert_eq!(updated.rebalance_threshold(), settings.rebalance_threshold());
        assert_eq!(updated.max_borrow_amount(), settings.max_borrow_amount());
    }

    #[test]
    fn test_apply_rejects_invalid_update() {
        let settings = RebalanceSettings::default();
        let update = SettingsUpdate {
            max_borrow_amount: Some(-5.0),
            ..Default::default()
        };
        assert!(settings.apply(&update).is_err());
    }

    #[test]
    fn test_settings_deserialize_through_validation() {
        let parsed: RebalanceSettings =
            serde_json::from_str(r#"{"target_ltv": 50.0, "min_rebalance_interval_secs": 60}"#).unwrap();
        assert_eq!(parsed.target_ltv(), 50.0);
        assert_eq!(parsed.min_rebalance_interval(), Duration::from_secs(60));
        assert_eq!(parsed.rebalance_threshold(), DEFAULT_REBALANCE_THRESHOLD);

        let rejected = serde_json::from_str::<RebalanceSettings>(r#"{"target_ltv": 150.0}"#);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_exchange_flavor_parsing() {
        assert_eq!("loan".parse::<ExchangeFlavor>().unwrap(), ExchangeFlavor::Loan);
        assert_eq!(" MARGIN ".parse::<ExchangeFlavor>().unwrap(), ExchangeFlavor::Margin);
        assert!("futures".parse::<ExchangeFlavor>().is_err());
    }

    #[test]
    fn test_stable_asset_lookup() {
        let valuation = ValuationConfig::default();
        assert!(valuation.is_stable("USDT"));
        assert!(valuation.is_stable("USDC"));
        assert!(!valuation.is_stable("BTC"));
    }

    #[test]
    fn test_mask_hides_secret_material() {
        assert_eq!(mask("abcdefghijklmnop"), "abcdefgh...");
        assert_eq!(mask("short"), "***");
    }
}
