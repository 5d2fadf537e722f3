//! Dispatch tick
//!
//! Assignment returning `None` leaves work queued; this loop is the retry
//! path. Each tick re-offers queued executions (priority descending, oldest
//! first) and queued shards to the assignment engine. Work that still finds
//! no eligible runner simply waits for the next tick: backpressure, not an
//! error.

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::repository::{execution_repository, shard_repository};
use crate::service::assignment::{AssignmentError, AssignmentSpec, ShardAssignment, allocation_request};
use crate::state::AppState;

const DISPATCH_BATCH: i64 = 50;

pub struct Dispatcher {
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self { state, shutdown_rx }
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.state.config.dispatch_interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.state.config.dispatch_interval) => {
                    if let Err(err) = self.dispatch_once().await {
                        error!(error = %err, "Dispatch tick failed");
                    }
                }
            }
        }
    }

    async fn dispatch_once(&self) -> Result<(), DispatchError> {
        let mut assigned = 0usize;

        let queued = execution_repository::find_queued(&self.state.pool, DISPATCH_BATCH).await?;
        for execution in &queued {
            if self
                .state
                .assignment
                .assign_execution(&self.state, execution)
                .await?
                .is_some()
            {
                assigned += 1;
            }
        }

        let queued_shards = shard_repository::find_queued(&self.state.pool, DISPATCH_BATCH).await?;
        for shard in &queued_shards {
            let metadata: std::collections::HashMap<String, serde_json::Value> =
                serde_json::from_value(shard.metadata.clone()).unwrap_or_default();
            let (cpu, memory_mb) = allocation_request(&metadata);

            let request = ShardAssignment {
                parent_execution_id: shard.parent_execution_id,
                shard_index: shard.shard_index,
                spec: AssignmentSpec {
                    test_suite: shard.test_suite.clone(),
                    environment: shard.environment.clone(),
                    requested_runner_type: shard.requested_runner_type.clone(),
                    requested_runner_id: shard.requested_runner_id,
                },
                cpu_allocation: cpu,
                memory_allocation_mb: memory_mb,
            };

            if self
                .state
                .assignment
                .assign_shard(&self.state, &request)
                .await?
                .is_some()
            {
                assigned += 1;
            }
        }

        if assigned > 0 {
            info!(assigned, "Dispatch tick assigned queued work");
        } else {
            debug!(
                queued = queued.len(),
                queued_shards = queued_shards.len(),
                "Dispatch tick found nothing assignable"
            );
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}
