//! Runner health monitor
//!
//! Periodically probes each active runner's health-check URL. A successful
//! probe promotes the runner to healthy and records a response-time metric;
//! a streak of failures past the configured threshold demotes it to
//! unhealthy, which the assignment engine treats as ineligible. Recovery is
//! automatic on the next successful probe.

use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tms_core::domain::metric::{ExecutionMetric, MetricType};
use tms_core::domain::runner::{HealthStatus, TestRunner};

use crate::repository::{metric_repository, runner_repository};
use crate::state::AppState;

pub struct HealthMonitor {
    state: AppState,
    client: reqwest::Client,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            state,
            client: reqwest::Client::new(),
            shutdown_rx,
        }
    }

    /// Run the probe loop until shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.state.config.health_check_interval.as_secs(),
            unhealthy_after = self.state.config.unhealthy_after_failures,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.state.config.health_check_interval) => {
                    if let Err(err) = self.probe_all().await {
                        error!(error = %err, "Health check sweep failed");
                    }
                }
            }
        }
    }

    async fn probe_all(&self) -> Result<(), sqlx::Error> {
        let runners = runner_repository::list_probeable(&self.state.pool).await?;

        debug!(count = runners.len(), "Probing runner health");

        for runner in runners {
            self.probe_runner(&runner).await?;
        }

        Ok(())
    }

    async fn probe_runner(&self, runner: &TestRunner) -> Result<(), sqlx::Error> {
        let Some(url) = runner.health_check_url.as_deref() else {
            return Ok(());
        };

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(self.state.config.health_check_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

                if runner.health_status == HealthStatus::Unhealthy {
                    info!(runner_id = %runner.id, "Runner recovered, promoting to healthy");
                }

                runner_repository::mark_healthy(&self.state.pool, runner.id).await?;
                metric_repository::record(
                    &self.state.pool,
                    &ExecutionMetric {
                        execution_id: None,
                        runner_id: Some(runner.id),
                        metric_type: MetricType::HealthCheckResponseTime,
                        metric_value: elapsed_ms,
                        recorded_at: chrono::Utc::now(),
                    },
                )
                .await?;
            }
            outcome => {
                let failures =
                    runner_repository::record_probe_failure(&self.state.pool, runner.id).await?;

                let detail = match outcome {
                    Ok(resp) => format!("status {}", resp.status()),
                    Err(err) => err.to_string(),
                };

                debug!(
                    runner_id = %runner.id,
                    failures,
                    detail = %detail,
                    "Health probe failed"
                );

                if failures >= self.state.config.unhealthy_after_failures as i32
                    && runner.health_status != HealthStatus::Unhealthy
                {
                    warn!(
                        runner_id = %runner.id,
                        failures,
                        "Demoting runner to unhealthy"
                    );
                    runner_repository::mark_unhealthy(&self.state.pool, runner.id).await?;
                }
            }
        }

        Ok(())
    }
}
