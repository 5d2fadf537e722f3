//! Execution Metric Repository
//!
//! Append-only time-series samples. Rows are never updated or deleted.

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::metric::{ExecutionMetric, MetricType};

/// Append one sample.
pub async fn record(pool: &PgPool, metric: &ExecutionMetric) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO execution_metrics (execution_id, runner_id, metric_type, metric_value, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(metric.execution_id)
    .bind(metric.runner_id)
    .bind(metric_type_to_string(metric.metric_type))
    .bind(metric.metric_value)
    .bind(metric.recorded_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// All samples for one execution, oldest first.
pub async fn find_by_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<ExecutionMetric>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MetricRow>(
        r#"
        SELECT execution_id, runner_id, metric_type, metric_value, recorded_at
        FROM execution_metrics
        WHERE execution_id = $1
        ORDER BY recorded_at ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn metric_type_to_string(metric_type: MetricType) -> &'static str {
    match metric_type {
        MetricType::ExecutionTime => "execution_time",
        MetricType::HealthCheckResponseTime => "health_check_response_time",
        MetricType::QueueWait => "queue_wait",
    }
}

fn string_to_metric_type(s: &str) -> MetricType {
    match s {
        "execution_time" => MetricType::ExecutionTime,
        "health_check_response_time" => MetricType::HealthCheckResponseTime,
        "queue_wait" => MetricType::QueueWait,
        _ => MetricType::ExecutionTime,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct MetricRow {
    execution_id: Option<Uuid>,
    runner_id: Option<Uuid>,
    metric_type: String,
    metric_value: f64,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl From<MetricRow> for ExecutionMetric {
    fn from(row: MetricRow) -> Self {
        ExecutionMetric {
            execution_id: row.execution_id,
            runner_id: row.runner_id,
            metric_type: string_to_metric_type(&row.metric_type),
            metric_value: row.metric_value,
            recorded_at: row.recorded_at,
        }
    }
}
