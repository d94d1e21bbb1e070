//! The rebalancing engine: evaluation, planning, throttling, execution and
//! reporting.

pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod governor;
pub mod history;
pub mod planner;
pub mod result;

pub use engine::RebalancingEngine;
pub use governor::{Governor, GovernorStatus};
pub use history::ActionHistory;
pub use planner::QuotePrices;
pub use result::RebalanceOutcome;
