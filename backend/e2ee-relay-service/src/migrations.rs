use crate::error::AppError;
use deadpool_postgres::Pool;

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_key_bundles.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_conversations.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_messages.sql");

/// Apply all migrations in order. Every statement is idempotent, so this runs on each start.
pub async fn run_all(pool: &Pool) -> Result<(), AppError> {
    let client = pool
        .get()
        .await
        .map_err(|e| AppError::StartServer(format!("migration connection: {e}")))?;

    for (i, sql) in [MIG_0001, MIG_0002, MIG_0003].into_iter().enumerate() {
        let label = i + 1;
        client.batch_execute(sql).await.map_err(|e| {
            tracing::error!(migration = %label, error = %e, "migration failed");
            AppError::StartServer(format!("migration {label}: {e}"))
        })?;
        tracing::info!(migration = %label, "e2ee-relay-service migration applied");
    }
    Ok(())
}
