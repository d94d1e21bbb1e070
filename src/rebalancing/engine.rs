use eyre::Result;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::evaluator::{error_status, evaluate};
use super::executor::ActionExecutor;
use super::governor::{Governor, GovernorStatus};
use super::history::{ActionHistory, DEFAULT_HISTORY_CAPACITY};
use super::planner::{self, QuotePrices};
use super::result::RebalanceOutcome;
use crate::config::{EngineConfig, RebalanceSettings, SettingsUpdate, ValuationConfig};
use crate::error::ConfigError;
use crate::exchange::{self, LendingExchange, PriceOracle};
use crate::models::{AccountSnapshot, LtvStatus, RebalanceAction, RebalanceResult};

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns throttle and history state and runs rebalance passes.
///
/// Passes are serialized by an async lock held from the throttle check to
/// the report, so two concurrent callers can never both get past the
/// governor.
pub struct RebalancingEngine {
    exchange: Arc<dyn LendingExchange>,
    oracle: Arc<dyn PriceOracle>,
    settings: Arc<RwLock<RebalanceSettings>>,
    valuation: ValuationConfig,
    executor: ActionExecutor,
    pass_lock: tokio::sync::Mutex<()>,
    governor: Mutex<Governor>,
    history: Mutex<ActionHistory>,
}

impl RebalancingEngine {
    pub fn new(
        exchange: Arc<dyn LendingExchange>,
        oracle: Arc<dyn PriceOracle>,
        settings: RebalanceSettings,
        valuation: ValuationConfig,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(exchange.clone(), DEFAULT_ACTION_TIMEOUT),
            exchange,
            oracle,
            settings: Arc::new(RwLock::new(settings)),
            valuation,
            pass_lock: tokio::sync::Mutex::new(()),
            governor: Mutex::new(Governor::new()),
            history: Mutex::new(ActionHistory::with_capacity(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// Connect to the configured exchange and build an engine for it.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let (exchange, oracle) = exchange::connect(config)?;
        info!("🚀 Rebalancing engine using {} exchange", exchange.name());

        Ok(Self::new(exchange, oracle, config.settings, config.valuation.clone())
            .with_action_timeout(config.request_timeout())
            .with_history_capacity(config.history_capacity))
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.executor = ActionExecutor::new(self.exchange.clone(), timeout);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = Mutex::new(ActionHistory::with_capacity(capacity));
        self
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    /// Current settings (a copy; later updates do not affect it)
    pub fn settings(&self) -> RebalanceSettings {
        *self.settings.read()
    }

    /// Apply a partial settings change. Invalid values leave the settings
    /// untouched.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<RebalanceSettings, ConfigError> {
        let mut settings = self.settings.write();
        let updated = settings.apply(&update)?;
        *settings = updated;
        info!(
            "⚙️ Settings updated: target {}%, threshold {}%, interval {}s, max borrow {}, min repay {}",
            updated.target_ltv(),
            updated.rebalance_threshold(),
            updated.min_rebalance_interval().as_secs(),
            updated.max_borrow_amount(),
            updated.min_repay_amount()
        );
        Ok(updated)
    }

    /// Most recent executed actions, oldest first
    pub fn history(&self, limit: usize) -> Vec<RebalanceAction> {
        self.history.lock().recent(limit)
    }

    pub fn governor_status(&self) -> GovernorStatus {
        let in_progress = self.pass_lock.try_lock().is_err();
        let interval = self.settings().min_rebalance_interval();
        self.governor.lock().status(interval, in_progress)
    }

    /// Fetch a fresh snapshot and evaluate it. Fetch failures produce an
    /// error status rather than an `Err`.
    pub async fn get_ltv_status(&self) -> LtvStatus {
        self.evaluate_account(&self.settings()).await.0
    }

    /// Plan without executing and without touching the governor.
    pub async fn calculate_optimal_rebalance(&self) -> Vec<RebalanceAction> {
        let settings = self.settings();
        let (status, snapshot) = self.evaluate_account(&settings).await;
        match snapshot {
            Some(snapshot) if status.needs_rebalance => self.plan(&status, &snapshot, &settings).await,
            _ => Vec::new(),
        }
    }

    /// One full pass: throttle, evaluate, plan, execute, re-evaluate, report.
    pub async fn perform_full_rebalance(&self) -> RebalanceOutcome {
        let _pass = self.pass_lock.lock().await;
        let settings = self.settings();

        let (allowed, reason) = self.governor.lock().admit(settings.min_rebalance_interval());
        if !allowed {
            info!("⏳ Rebalance throttled: {}", reason);
            let (ltv_status, _) = self.evaluate_account(&settings).await;
            return RebalanceOutcome::Throttled { reason, ltv_status };
        }

        let (status, snapshot) = self.evaluate_account(&settings).await;
        let Some(snapshot) = snapshot else {
            let error = status.recommended_actions.first().cloned().unwrap_or_default();
            warn!("⚠️ Rebalance aborted: {}", error);
            return RebalanceOutcome::EvaluationFailed {
                error,
                ltv_status: status,
            };
        };

        if !status.needs_rebalance {
            debug!(
                "LTV {:.2}% within {}% of target {}%",
                status.current_ltv,
                settings.rebalance_threshold(),
                status.target_ltv
            );
            return RebalanceOutcome::NotNeeded { ltv_status: status };
        }

        info!(
            "📊 LTV {:.2}% vs target {}% ({:?}, {})",
            status.current_ltv, status.target_ltv, status.action_required, status.health
        );

        let actions = self.plan(&status, &snapshot, &settings).await;
        if actions.is_empty() {
            info!("🤷 No suitable rebalancing actions found");
            return RebalanceOutcome::NoSuitableActions { ltv_status: status };
        }

        info!("📋 Executing {} rebalancing action(s)", actions.len());
        let executed = self.executor.execute(actions).await;
        self.governor.lock().mark_rebalance();
        self.history.lock().extend(executed.iter().cloned());

        let (after, _) = self.evaluate_account(&settings).await;
        let result = RebalanceResult::new(&status, after, executed);

        if result.success {
            info!("✅ {}", result.message);
        } else {
            warn!(
                "⚠️ {} ({} of {} actions failed)",
                result.message,
                result.failed_actions,
                result.actions.len()
            );
        }

        RebalanceOutcome::Completed(result)
    }

    async fn evaluate_account(&self, settings: &RebalanceSettings) -> (LtvStatus, Option<AccountSnapshot>) {
        match self.exchange.get_account_snapshot().await {
            Ok(snapshot) => (evaluate(&snapshot, settings), Some(snapshot)),
            Err(e) => {
                warn!("Failed to fetch account snapshot from {}: {}", self.exchange.name(), e);
                (error_status(settings, &e.to_string()), None)
            }
        }
    }

    async fn plan(
        &self,
        status: &LtvStatus,
        snapshot: &AccountSnapshot,
        settings: &RebalanceSettings,
    ) -> Vec<RebalanceAction> {
        let prices = self.quote_prices(status, snapshot).await;
        planner::plan(status, snapshot, settings, &self.valuation, &prices)
    }

    /// Look up every price the planner may need. Missing prices are logged
    /// and left out; the planner skips those assets.
    async fn quote_prices(&self, status: &LtvStatus, snapshot: &AccountSnapshot) -> QuotePrices {
        let reference = self.price_of(&self.valuation.reference_asset).await;
        let mut prices = QuotePrices::new(reference);

        let assets = planner::assets_to_price(status, snapshot, &self.valuation);
        let lookups = assets.iter().map(|asset| async move { (asset, self.price_of(asset).await) });
        for (asset, price) in join_all(lookups).await {
            if let Some(price) = price {
                prices.insert(asset, price);
            }
        }
        prices
    }

    async fn price_of(&self, asset: &str) -> Option<f64> {
        if self.valuation.is_stable(asset) {
            return Some(1.0);
        }
        match self.oracle.get_reference_price(asset).await {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                warn!("Ignoring invalid {} price {}", asset, price);
                None
            }
            Err(e) => {
                warn!("No price for {}: {}", asset, e);
                None
            }
        }
    }
}
