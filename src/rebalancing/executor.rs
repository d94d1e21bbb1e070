use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::ExchangeError;
use crate::exchange::LendingExchange;
use crate::models::{ActionType, RebalanceAction};

/// Dispatches planned actions one by one, in plan order.
///
/// A failed or timed-out action is recorded on that action only; the rest of
/// the batch still runs. Nothing is rolled back.
pub struct ActionExecutor {
    exchange: Arc<dyn LendingExchange>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(exchange: Arc<dyn LendingExchange>, timeout: Duration) -> Self {
        Self { exchange, timeout }
    }

    pub async fn execute(&self, actions: Vec<RebalanceAction>) -> Vec<RebalanceAction> {
        let total = actions.len();
        let mut executed = Vec::with_capacity(total);

        for (i, mut action) in actions.into_iter().enumerate() {
            info!("⚡ Executing action {}/{}: {}", i + 1, total, action);

            let outcome = self.dispatch(&action).await;
            match &outcome {
                Ok(reference) => info!("✅ {} succeeded (ref {})", action, reference),
                Err(e) => error!("❌ {} failed: {}", action, e),
            }
            action.record_outcome(outcome.map_err(|e| e.to_string()));
            executed.push(action);
        }

        executed
    }

    async fn dispatch(&self, action: &RebalanceAction) -> Result<String, ExchangeError> {
        let call = async {
            match action.action_type {
                ActionType::Repay => self.exchange.repay(&action.asset, action.amount).await,
                ActionType::Borrow => self.exchange.borrow(&action.asset, action.amount).await,
                ActionType::AddCollateral => {
                    self.exchange.add_collateral(&action.asset, action.amount).await
                }
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}
