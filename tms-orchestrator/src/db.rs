use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            test_suite VARCHAR(255) NOT NULL,
            environment VARCHAR(255) NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            status VARCHAR(50) NOT NULL,
            requested_runner_type VARCHAR(255),
            requested_runner_id UUID,
            assigned_runner_id UUID,
            estimated_duration_seconds BIGINT,
            timeout_at TIMESTAMPTZ,
            retry_count INTEGER NOT NULL DEFAULT 0,
            retry_of UUID,
            total_shards INTEGER,
            created_at TIMESTAMPTZ NOT NULL,
            assigned_at TIMESTAMPTZ,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            results JSONB,
            error_message TEXT,
            metadata JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create runners table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runners (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            runner_type VARCHAR(255) NOT NULL,
            endpoint_url TEXT NOT NULL,
            webhook_url TEXT,
            health_check_url TEXT,
            capabilities JSONB NOT NULL DEFAULT '{}',
            max_concurrent_jobs INTEGER NOT NULL DEFAULT 1,
            current_jobs INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 50,
            status VARCHAR(50) NOT NULL,
            health_status VARCHAR(50) NOT NULL,
            consecutive_health_failures INTEGER NOT NULL DEFAULT 0,
            last_health_check TIMESTAMPTZ,
            registered_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create parallel execution shards table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parallel_execution_shards (
            parent_execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            shard_index INTEGER NOT NULL,
            runner_id UUID,
            status VARCHAR(50) NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            results JSONB,
            error_message TEXT,
            PRIMARY KEY (parent_execution_id, shard_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create load balancing rules table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS load_balancing_rules (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            rule_type VARCHAR(50) NOT NULL,
            test_suite_pattern VARCHAR(255),
            environment_pattern VARCHAR(255),
            runner_type_filter VARCHAR(255),
            priority INTEGER NOT NULL DEFAULT 0,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            rule_config JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resource allocations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_allocations (
            id UUID PRIMARY KEY,
            runner_id UUID NOT NULL REFERENCES runners(id) ON DELETE CASCADE,
            execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            shard_index INTEGER,
            cpu_allocation DOUBLE PRECISION NOT NULL,
            memory_allocation_mb BIGINT NOT NULL,
            status VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            released_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create execution metrics table (append-only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_metrics (
            id SERIAL PRIMARY KEY,
            execution_id UUID,
            runner_id UUID,
            metric_type VARCHAR(100) NOT NULL,
            metric_value DOUBLE PRECISION NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_executions_queued ON executions(priority DESC, created_at ASC) WHERE status = 'queued'",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_timeout ON executions(timeout_at) WHERE status = 'running'")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_shards_status ON parallel_execution_shards(status)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runners_status ON runners(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_allocations_runner ON resource_allocations(runner_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_allocations_execution ON resource_allocations(execution_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_runner ON execution_metrics(runner_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rules_priority ON load_balancing_rules(priority DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
