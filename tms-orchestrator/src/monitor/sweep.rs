//! Timeout sweep
//!
//! The only component permitted to force-fail an execution without a
//! webhook. Each sweep fails running executions and shards whose deadline
//! elapsed, then re-checks allocation totals so stale `exceeded` flags
//! clear as capacity frees up.

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::repository::runner_repository;
use crate::service::{parallel_service, queue_service, resource_service};
use crate::state::AppState;

pub struct TimeoutSweeper {
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl TimeoutSweeper {
    pub fn new(state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self { state, shutdown_rx }
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.state.config.sweep_interval.as_secs(),
            "Timeout sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Timeout sweeper shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.state.config.sweep_interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        match queue_service::fail_timed_out(&self.state).await {
            Ok(failed) if failed > 0 => {
                warn!(failed, "Force-failed timed out executions");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "Execution timeout sweep failed"),
        }

        match parallel_service::fail_timed_out_shards(&self.state).await {
            Ok(failed) if failed > 0 => {
                warn!(failed, "Force-failed timed out shards");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "Shard timeout sweep failed"),
        }

        // Allocation totals drift as work completes; re-check per runner
        match runner_repository::list_all(&self.state.pool).await {
            Ok(runners) => {
                for runner in runners {
                    if let Err(err) =
                        resource_service::optimize_runner_allocations(&self.state, runner.id).await
                    {
                        error!(
                            runner_id = %runner.id,
                            error = %err,
                            "Allocation re-check failed"
                        );
                    }
                }
            }
            Err(err) => error!(error = %err, "Listing runners for allocation re-check failed"),
        }
    }
}
