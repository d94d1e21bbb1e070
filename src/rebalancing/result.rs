use serde::{Deserialize, Serialize};

use crate::models::{LtvStatus, RebalanceResult};

/// Terminal state of one `perform_full_rebalance` pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebalanceOutcome {
    /// Inside the minimum interval; nothing was planned or executed
    Throttled { reason: String, ltv_status: LtvStatus },

    /// The account snapshot could not be fetched
    EvaluationFailed { error: String, ltv_status: LtvStatus },

    /// LTV is within the threshold of the target
    NotNeeded { ltv_status: LtvStatus },

    /// Rebalancing is needed but no action passed the planner's minimums
    NoSuitableActions { ltv_status: LtvStatus },

    /// Actions were executed (possibly with failures)
    Completed(RebalanceResult),
}

impl RebalanceOutcome {
    pub fn success(&self) -> bool {
        match self {
            RebalanceOutcome::Throttled { .. } | RebalanceOutcome::EvaluationFailed { .. } => false,
            RebalanceOutcome::NotNeeded { .. } | RebalanceOutcome::NoSuitableActions { .. } => true,
            RebalanceOutcome::Completed(result) => result.success,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RebalanceOutcome::Throttled { reason, .. } => reason.clone(),
            RebalanceOutcome::EvaluationFailed { error, .. } => error.clone(),
            RebalanceOutcome::NotNeeded { .. } => {
                "No rebalancing needed - LTV is within target range".to_string()
            }
            RebalanceOutcome::NoSuitableActions { .. } => {
                "No suitable rebalancing actions found".to_string()
            }
            RebalanceOutcome::Completed(result) => result.message.clone(),
        }
    }

    /// Status the outcome was decided on (the post-execution status for
    /// completed passes)
    pub fn ltv_status(&self) -> &LtvStatus {
        match self {
            RebalanceOutcome::Throttled { ltv_status, .. }
            | RebalanceOutcome::EvaluationFailed { ltv_status, .. }
            | RebalanceOutcome::NotNeeded { ltv_status }
            | RebalanceOutcome::NoSuitableActions { ltv_status } => ltv_status,
            RebalanceOutcome::Completed(result) => &result.ltv_status,
        }
    }

    pub fn result(&self) -> Option<&RebalanceResult> {
        match self {
            RebalanceOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn was_executed(&self) -> bool {
        matches!(self, RebalanceOutcome::Completed(_))
    }
}
