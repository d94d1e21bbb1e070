use chrono::Utc;

use crate::config::RebalanceSettings;
use crate::models::{AccountSnapshot, HealthStatus, LtvAction, LtvStatus};

const CRITICAL_LTV: f64 = 85.0;
const WARNING_LTV: f64 = 75.0;
const CAUTION_LTV: f64 = 65.0;

/// LTV in percent. Zero collateral is a defined case, not an error.
pub fn compute_ltv(total_collateral_value: f64, total_debt_value: f64) -> f64 {
    if total_collateral_value > 0.0 {
        total_debt_value / total_collateral_value * 100.0
    } else {
        0.0
    }
}

/// Risk band on the absolute LTV level; the target plays no part.
pub fn classify_health(current_ltv: f64) -> HealthStatus {
    if current_ltv > CRITICAL_LTV {
        HealthStatus::Critical
    } else if current_ltv > WARNING_LTV {
        HealthStatus::Warning
    } else if current_ltv > CAUTION_LTV {
        HealthStatus::Caution
    } else {
        HealthStatus::Healthy
    }
}

/// Evaluate a fresh snapshot against the current settings.
pub fn evaluate(snapshot: &AccountSnapshot, settings: &RebalanceSettings) -> LtvStatus {
    let target_ltv = settings.target_ltv();
    let current_ltv = compute_ltv(snapshot.total_collateral_value, snapshot.total_debt_value);
    let ltv_diff = current_ltv - target_ltv;
    let needs_rebalance = ltv_diff.abs() > settings.rebalance_threshold();

    let action_required = if !needs_rebalance {
        LtvAction::None
    } else if current_ltv > target_ltv {
        LtvAction::ReduceLtv
    } else {
        LtvAction::IncreaseLtv
    };

    LtvStatus {
        current_ltv,
        target_ltv,
        ltv_diff,
        needs_rebalance,
        action_required,
        health: classify_health(current_ltv),
        recommended_actions: recommendations(action_required, current_ltv, target_ltv),
        total_collateral_value: snapshot.total_collateral_value,
        total_debt_value: snapshot.total_debt_value,
        evaluated_at: Utc::now(),
    }
}

/// Status reported when the snapshot could not be fetched
pub fn error_status(settings: &RebalanceSettings, error: &str) -> LtvStatus {
    LtvStatus {
        current_ltv: 0.0,
        target_ltv: settings.target_ltv(),
        ltv_diff: 0.0,
        needs_rebalance: false,
        action_required: LtvAction::None,
        health: HealthStatus::Error,
        recommended_actions: vec![format!("Error calculating LTV: {}", error)],
        total_collateral_value: 0.0,
        total_debt_value: 0.0,
        evaluated_at: Utc::now(),
    }
}

fn recommendations(action: LtvAction, current_ltv: f64, target_ltv: f64) -> Vec<String> {
    match action {
        LtvAction::ReduceLtv => vec![
            format!("Current LTV ({:.1}%) is above target ({}%)", current_ltv, target_ltv),
            "Recommended actions: Repay loans or add collateral".to_string(),
            "Priority: 1) Repay with available balance, 2) Add more collateral".to_string(),
        ],
        LtvAction::IncreaseLtv => vec![
            format!("Current LTV ({:.1}%) is below target ({}%)", current_ltv, target_ltv),
            "Recommended actions: Borrow more against collateral".to_string(),
            "Can increase capital efficiency by borrowing more".to_string(),
        ],
        LtvAction::None => vec![
            format!("LTV ({:.1}%) is within target range", current_ltv),
            "No rebalancing needed".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RebalanceSettings {
        RebalanceSettings::default()
    }

    #[test]
    fn test_ltv_is_debt_over_collateral() {
        let status = evaluate(&AccountSnapshot::new(2.0, 1.3), &settings());
        assert!((status.current_ltv - 65.0).abs() < 1e-9);
        assert!((status.ltv_diff - (65.0 - 74.0)).abs() < 1e-9);
        assert_eq!(status.total_collateral_value, 2.0);
        assert_eq!(status.total_debt_value, 1.3);
    }

    #[test]
    fn test_zero_collateral_gives_zero_ltv() {
        let status = evaluate(&AccountSnapshot::new(0.0, 5.0), &settings());
        assert_eq!(status.current_ltv, 0.0);
        assert!(!status.current_ltv.is_nan());
        assert_eq!(status.health, HealthStatus::Healthy);
        // 0% against a 74% target is far below
        assert_eq!(status.action_required, LtvAction::IncreaseLtv);
    }

    #[test]
    fn test_above_target_needs_reduce() {
        let status = evaluate(&AccountSnapshot::new(1.0, 0.80), &settings());
        assert!(status.needs_rebalance);
        assert_eq!(status.action_required, LtvAction::ReduceLtv);
        assert_eq!(status.health, HealthStatus::Warning);
        assert_eq!(status.recommended_actions.len(), 3);
        assert_eq!(
            status.recommended_actions[0],
            "Current LTV (80.0%) is above target (74%)"
        );
    }

    #[test]
    fn test_within_threshold_needs_nothing() {
        let status = evaluate(&AccountSnapshot::new(1.0, 0.75), &settings());
        assert!(!status.needs_rebalance);
        assert_eq!(status.action_required, LtvAction::None);
        assert_eq!(
            status.recommended_actions,
            vec![
                "LTV (75.0%) is within target range".to_string(),
                "No rebalancing needed".to_string()
            ]
        );
    }

    #[test]
    fn test_below_target_needs_increase() {
        let status = evaluate(&AccountSnapshot::new(1.0, 0.50), &settings());
        assert!(status.needs_rebalance);
        assert_eq!(status.action_required, LtvAction::IncreaseLtv);
        assert_eq!(status.recommended_actions[1], "Recommended actions: Borrow more against collateral");
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        // |76 - 74| == 2 is not above the threshold
        let status = evaluate(&AccountSnapshot::new(100.0, 76.0), &settings());
        assert!(!status.needs_rebalance);
        assert_eq!(status.action_required, LtvAction::None);
    }

    #[test]
    fn test_health_bands() {
        assert_eq!(classify_health(90.0), HealthStatus::Critical);
        assert_eq!(classify_health(85.0), HealthStatus::Warning);
        assert_eq!(classify_health(76.0), HealthStatus::Warning);
        assert_eq!(classify_health(70.0), HealthStatus::Caution);
        assert_eq!(classify_health(65.0), HealthStatus::Healthy);
        assert_eq!(classify_health(0.0), HealthStatus::Healthy);
    }

    #[test]
    fn test_error_status_is_zeroed() {
        let status = error_status(&settings(), "http error: connection refused");
        assert!(status.is_error());
        assert!(!status.needs_rebalance);
        assert_eq!(status.action_required, LtvAction::None);
        assert_eq!(status.current_ltv, 0.0);
        assert_eq!(status.target_ltv, 74.0);
        assert_eq!(status.recommended_actions.len(), 1);
    }
}
