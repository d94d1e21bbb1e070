use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Per-asset balance as reported by the exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    /// Funds outside the lending position that can be used to repay or pledge
    pub free: f64,
    pub locked: f64,
    pub borrowed: f64,
}

/// Point-in-time view of the account. Fetched fresh on every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Collateral value in the reference asset
    pub total_collateral_value: f64,
    /// Debt value in the reference asset
    pub total_debt_value: f64,
    pub balances: BTreeMap<String, AssetBalance>,
    /// Open loan orders (loan flavor only)
    #[serde(default)]
    pub loans: Vec<LoanPosition>,
    pub fetched_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn new(total_collateral_value: f64, total_debt_value: f64) -> Self {
        Self {
            total_collateral_value,
            total_debt_value,
            balances: BTreeMap::new(),
            loans: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_balance(mut self, asset: &str, balance: AssetBalance) -> Self {
        self.balances.insert(asset.to_string(), balance);
        self
    }

    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.balances.get(asset).copied().unwrap_or_default()
    }
}

/// Liquidation risk of a single loan order relative to its margin-call LTV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationRisk {
    Low,
    Medium,
    High,
}

/// Open crypto-loan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPosition {
    pub order_id: String,
    pub loan_coin: String,
    pub collateral_coin: String,
    pub total_debt: f64,
    pub collateral_amount: f64,
    /// Percent
    pub current_ltv: f64,
    /// Percent; 0 when the exchange does not report it
    pub margin_call_ltv: f64,
}

impl LoanPosition {
    pub fn liquidation_risk(&self) -> LiquidationRisk {
        if self.margin_call_ltv <= 0.0 {
            return LiquidationRisk::Low;
        }
        if self.current_ltv > self.margin_call_ltv * 0.9 {
            LiquidationRisk::High
        } else if self.current_ltv > self.margin_call_ltv * 0.7 {
            LiquidationRisk::Medium
        } else {
            LiquidationRisk::Low
        }
    }
}

/// Direction the LTV has to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LtvAction {
    ReduceLtv,
    IncreaseLtv,
    None,
}

/// Risk band derived from the absolute LTV level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Caution,
    Warning,
    Critical,
    /// The snapshot could not be fetched; no numbers are trustworthy
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Caution => "caution",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Current LTV status and rebalancing requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtvStatus {
    pub current_ltv: f64,
    pub target_ltv: f64,
    pub ltv_diff: f64,
    pub needs_rebalance: bool,
    pub action_required: LtvAction,
    pub health: HealthStatus,
    pub recommended_actions: Vec<String>,
    pub total_collateral_value: f64,
    pub total_debt_value: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl LtvStatus {
    pub fn is_error(&self) -> bool {
        self.health == HealthStatus::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Repay,
    Borrow,
    AddCollateral,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionType::Repay => "repay",
            ActionType::Borrow => "borrow",
            ActionType::AddCollateral => "add_collateral",
        };
        write!(f, "{}", label)
    }
}

/// A single corrective action. Planned with `success = false`, then stamped
/// exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    pub id: Uuid,
    pub action_type: ActionType,
    pub asset: String,
    pub amount: f64,
    /// Quote price of `asset` used while planning
    pub price: Option<f64>,
    /// Planner's quote valuation of `amount`
    pub quote_value: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    /// Exchange reference (transaction id) on success
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl RebalanceAction {
    pub fn new(action_type: ActionType, asset: &str, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            asset: asset.to_string(),
            amount,
            price: None,
            quote_value: None,
            success: false,
            error: None,
            reference: None,
            timestamp: Utc::now(),
            executed_at: None,
        }
    }

    pub fn with_valuation(mut self, price: Option<f64>, quote_value: Option<f64>) -> Self {
        self.price = price;
        self.quote_value = quote_value;
        self
    }

    pub fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    /// Stamp the outcome of the exchange call. Returns false (and leaves the
    /// action untouched) if an outcome was already recorded.
    pub(crate) fn record_outcome(&mut self, outcome: Result<String, String>) -> bool {
        if self.is_executed() {
            return false;
        }
        match outcome {
            Ok(reference) => {
                self.success = true;
                self.reference = Some(reference);
            }
            Err(error) => {
                self.success = false;
                self.error = Some(error);
            }
        }
        self.executed_at = Some(Utc::now());
        true
    }
}

impl fmt::Display for RebalanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action_type, self.amount, self.asset)
    }
}

/// Report of an executed rebalance pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub before_ltv: f64,
    pub after_ltv: f64,
    pub actions: Vec<RebalanceAction>,
    pub successful_actions: usize,
    pub failed_actions: usize,
    /// True only if every action succeeded
    pub success: bool,
    pub message: String,
    /// Status re-evaluated after execution
    pub ltv_status: LtvStatus,
}

impl RebalanceResult {
    pub fn new(before: &LtvStatus, after: LtvStatus, actions: Vec<RebalanceAction>) -> Self {
        let successful_actions = actions.iter().filter(|a| a.success).count();
        let failed_actions = actions.len() - successful_actions;

        Self {
            before_ltv: before.current_ltv,
            after_ltv: after.current_ltv,
            message: format!(
                "Rebalancing completed. LTV changed from {:.2}% to {:.2}%",
                before.current_ltv, after.current_ltv
            ),
            successful_actions,
            failed_actions,
            success: failed_actions == 0,
            actions,
            ltv_status: after,
        }
    }
}
