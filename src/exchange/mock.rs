//! In-memory exchange and oracle for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{LendingExchange, PriceOracle};
use crate::error::ExchangeError;
use crate::models::{AccountSnapshot, ActionType};

/// Records every action call and replays a scripted snapshot.
pub struct MockExchange {
    snapshot: Mutex<Result<AccountSnapshot, ExchangeError>>,
    failures: Mutex<HashMap<(ActionType, String), ExchangeError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(ActionType, String, f64)>>,
    snapshot_calls: AtomicUsize,
}

impl MockExchange {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Ok(snapshot)),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            snapshot_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_snapshot(error: ExchangeError) -> Self {
        let mock = Self::new(AccountSnapshot::new(0.0, 0.0));
        *mock.snapshot.lock() = Err(error);
        mock
    }

    pub fn set_snapshot(&self, snapshot: AccountSnapshot) {
        *self.snapshot.lock() = Ok(snapshot);
    }

    /// Make `action_type` on `asset` fail with `error`
    pub fn fail_on(&self, action_type: ActionType, asset: &str, error: ExchangeError) {
        self.failures
            .lock()
            .insert((action_type, asset.to_string()), error);
    }

    /// Delay every action call, for timeout tests
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(ActionType, String, f64)> {
        self.calls.lock().clone()
    }

    pub fn action_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    async fn act(&self, action_type: ActionType, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        let call_no = {
            let mut calls = self.calls.lock();
            calls.push((action_type, asset.to_string(), amount));
            calls.len()
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().get(&(action_type, asset.to_string())) {
            return Err(error.clone());
        }
        Ok(format!("mock-{}", call_no))
    }
}

#[async_trait]
impl LendingExchange for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot.lock().clone()
    }

    async fn repay(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        self.act(ActionType::Repay, asset, amount).await
    }

    async fn borrow(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        self.act(ActionType::Borrow, asset, amount).await
    }

    async fn add_collateral(&self, asset: &str, amount: f64) -> Result<String, ExchangeError> {
        self.act(ActionType::AddCollateral, asset, amount).await
    }
}

/// Fixed quote prices; unknown assets have no price.
pub struct MockOracle {
    prices: HashMap<String, f64>,
}

impl MockOracle {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(a, p)| (a.to_string(), *p)).collect(),
        }
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn get_reference_price(&self, asset: &str) -> Result<f64, ExchangeError> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| ExchangeError::PriceUnavailable(asset.to_string()))
    }
}
