use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{error, info};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a deadpool-postgres pool and verify that the database answers.
pub async fn init_pool(database_url: &str, max_connections: usize) -> Result<Pool, AppError> {
    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(max_connections)
        .wait_timeout(Some(ACQUIRE_TIMEOUT))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| AppError::StartServer(format!("database pool: {e}")))?;

    let verify = async {
        let client = pool
            .get()
            .await
            .map_err(|e| AppError::StartServer(format!("database connect: {e}")))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| AppError::StartServer(format!("database ping: {e}")))?;
        Ok::<(), AppError>(())
    };

    match tokio::time::timeout(CONNECT_TIMEOUT, verify).await {
        Ok(Ok(())) => {
            info!(max_connections, "database pool created and verified");
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(error = %e, "database connection verification failed");
            Err(e)
        }
        Err(_) => {
            error!(
                timeout_secs = CONNECT_TIMEOUT.as_secs(),
                "database connection verification timeout"
            );
            Err(AppError::StartServer("database connection timeout".into()))
        }
    }
}
