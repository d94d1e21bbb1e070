//! Binance-style signed REST adapters.

pub mod auth;
pub mod client;
pub mod types;

mod loan;
mod margin;
mod oracle;

pub use client::BinanceClient;
pub use loan::LoanExchange;
pub use margin::MarginExchange;
pub use oracle::TickerOracle;
