pub mod config;
pub mod error;
pub mod exchange;
pub mod models;
pub mod rebalancing;
pub mod worker;

pub use config::{EngineConfig, RebalanceSettings, SettingsUpdate, ValuationConfig};
pub use error::{ConfigError, ExchangeError};
pub use exchange::{LendingExchange, PriceOracle};
pub use models::*;
pub use rebalancing::{RebalanceOutcome, RebalancingEngine};
pub use worker::{RebalanceHandle, RebalanceWorker};
