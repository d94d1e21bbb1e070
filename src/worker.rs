//! Dedicated task that owns all rebalance passes.
//!
//! Request-serving code talks to the worker through a cloneable
//! [`RebalanceHandle`]; periodic passes come from an optional interval timer.
//! Commands are handled one at a time, in arrival order.

use eyre::{eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{RebalanceSettings, SettingsUpdate};
use crate::error::ConfigError;
use crate::models::{LtvStatus, RebalanceAction};
use crate::rebalancing::{GovernorStatus, RebalanceOutcome, RebalancingEngine};

const COMMAND_BUFFER: usize = 32;

enum WorkerCommand {
    Rebalance(oneshot::Sender<RebalanceOutcome>),
    Status(oneshot::Sender<LtvStatus>),
    Plan(oneshot::Sender<Vec<RebalanceAction>>),
    Settings(oneshot::Sender<RebalanceSettings>),
    UpdateSettings(
        SettingsUpdate,
        oneshot::Sender<Result<RebalanceSettings, ConfigError>>,
    ),
    History(usize, oneshot::Sender<Vec<RebalanceAction>>),
    Governor(oneshot::Sender<GovernorStatus>),
    Shutdown,
}

pub struct RebalanceWorker {
    engine: Arc<RebalancingEngine>,
    commands: mpsc::Receiver<WorkerCommand>,
    interval: Option<Duration>,
}

/// Cheap, cloneable entry point to a running worker
#[derive(Clone)]
pub struct RebalanceHandle {
    tx: mpsc::Sender<WorkerCommand>,
}

impl RebalanceWorker {
    /// Start the worker on its own task. With `interval` set, a pass also
    /// runs on every tick, starting immediately.
    pub fn spawn(
        engine: Arc<RebalancingEngine>,
        interval: Option<Duration>,
    ) -> (RebalanceHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let worker = Self {
            engine,
            commands,
            interval: interval.filter(|d| !d.is_zero()),
        };
        let task = tokio::spawn(worker.run());
        (RebalanceHandle { tx }, task)
    }

    async fn run(mut self) {
        let mut ticker = self.interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        match self.interval {
            Some(period) => info!("🔄 Rebalance worker started (auto every {}s)", period.as_secs()),
            None => info!("🔄 Rebalance worker started (on demand only)"),
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(WorkerCommand::Shutdown) | None => break,
                        Some(command) => self.handle(command).await,
                    }
                }
                _ = next_tick(&mut ticker) => {
                    debug!("Automatic rebalance tick");
                    let outcome = self.engine.perform_full_rebalance().await;
                    if outcome.was_executed() || !outcome.success() {
                        info!("🔁 Automatic rebalance: {}", outcome.message());
                    }
                }
            }
        }

        info!("🛑 Rebalance worker stopped");
    }

    async fn handle(&self, command: WorkerCommand) {
        // A dropped receiver only means the caller gave up waiting
        let delivered = match command {
            WorkerCommand::Rebalance(reply) => {
                reply.send(self.engine.perform_full_rebalance().await).is_ok()
            }
            WorkerCommand::Status(reply) => reply.send(self.engine.get_ltv_status().await).is_ok(),
            WorkerCommand::Plan(reply) => reply
                .send(self.engine.calculate_optimal_rebalance().await)
                .is_ok(),
            WorkerCommand::Settings(reply) => reply.send(self.engine.settings()).is_ok(),
            WorkerCommand::UpdateSettings(update, reply) => {
                reply.send(self.engine.update_settings(update)).is_ok()
            }
            WorkerCommand::History(limit, reply) => reply.send(self.engine.history(limit)).is_ok(),
            WorkerCommand::Governor(reply) => reply.send(self.engine.governor_status()).is_ok(),
            WorkerCommand::Shutdown => true,
        };
        if !delivered {
            warn!("Rebalance worker reply dropped: requester went away");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl RebalanceHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| eyre!("rebalance worker is not running"))?;
        response
            .await
            .map_err(|_| eyre!("rebalance worker stopped before replying"))
    }

    pub async fn rebalance(&self) -> Result<RebalanceOutcome> {
        self.request(WorkerCommand::Rebalance).await
    }

    pub async fn status(&self) -> Result<LtvStatus> {
        self.request(WorkerCommand::Status).await
    }

    pub async fn plan(&self) -> Result<Vec<RebalanceAction>> {
        self.request(WorkerCommand::Plan).await
    }

    pub async fn settings(&self) -> Result<RebalanceSettings> {
        self.request(WorkerCommand::Settings).await
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<RebalanceSettings> {
        Ok(self
            .request(|reply| WorkerCommand::UpdateSettings(update, reply))
            .await??)
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<RebalanceAction>> {
        self.request(|reply| WorkerCommand::History(limit, reply)).await
    }

    pub async fn governor_status(&self) -> Result<GovernorStatus> {
        self.request(WorkerCommand::Governor).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(WorkerCommand::Shutdown)
            .await
            .map_err(|_| eyre!("rebalance worker is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValuationConfig;
    use crate::exchange::mock::{MockExchange, MockOracle};
    use crate::models::{AccountSnapshot, AssetBalance, LtvAction};

    fn engine(exchange: Arc<MockExchange>) -> Arc<RebalancingEngine> {
        Arc::new(RebalancingEngine::new(
            exchange,
            Arc::new(MockOracle::new(&[("BTC", 50_000.0)])),
            RebalanceSettings::default(),
            ValuationConfig::default(),
        ))
    }

    fn over_target() -> AccountSnapshot {
        AccountSnapshot::new(1.0, 0.8).with_balance(
            "USDT",
            AssetBalance {
                free: 10_000.0,
                locked: 0.0,
                borrowed: 40_000.0,
            },
        )
    }

    #[tokio::test]
    async fn test_on_demand_commands() {
        let exchange = Arc::new(MockExchange::new(over_target()));
        let (handle, task) = RebalanceWorker::spawn(engine(exchange.clone()), None);

        let status = handle.status().await.unwrap();
        assert_eq!(status.action_required, LtvAction::ReduceLtv);

        let plan = handle.plan().await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(exchange.action_calls(), 0);

        let outcome = handle.rebalance().await.unwrap();
        assert!(outcome.was_executed());
        assert_eq!(exchange.action_calls(), 1);

        let second = handle.rebalance().await.unwrap();
        assert!(matches!(second, RebalanceOutcome::Throttled { .. }));
        assert_eq!(exchange.action_calls(), 1);

        assert_eq!(handle.history(10).await.unwrap().len(), 1);
        assert_eq!(handle.governor_status().await.unwrap().stats.passes_throttled, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.status().await.is_err());
    }

    #[tokio::test]
    async fn test_settings_round_trip_through_worker() {
        let exchange = Arc::new(MockExchange::new(over_target()));
        let (handle, _task) = RebalanceWorker::spawn(engine(exchange), None);

        let updated = handle
            .update_settings(SettingsUpdate {
                target_ltv: Some(82.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.target_ltv(), 82.0);
        assert_eq!(handle.settings().await.unwrap().target_ltv(), 82.0);

        let rejected = handle
            .update_settings(SettingsUpdate {
                rebalance_threshold: Some(-1.0),
                ..Default::default()
            })
            .await;
        assert!(rejected.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drives_passes() {
        let exchange = Arc::new(MockExchange::new(over_target()));
        let engine = engine(exchange.clone());
        engine
            .update_settings(SettingsUpdate {
                min_rebalance_interval_secs: Some(0),
                ..Default::default()
            })
            .unwrap();
        let (handle, task) = RebalanceWorker::spawn(engine, Some(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(exchange.action_calls() >= 2);

        drop(handle);
        task.await.unwrap();
    }
}
