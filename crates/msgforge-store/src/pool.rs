//! Connection pool setup (§5: bounded, ≤25 connections per worker instance).

use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use msgforge_core::config::DatabaseConfig;
use msgforge_core::error::PipelineError;
use std::time::Duration;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type DbConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

pub fn init_pool(config: &DatabaseConfig) -> Result<DbPool, PipelineError> {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);
    r2d2::Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(Duration::from_secs(config.connection_timeout.as_secs()))
        .build(manager)
        .map_err(|e| PipelineError::ConfigurationError { message: format!("failed to build db pool: {e}") })
}

/// Runs a blocking diesel closure on the blocking thread pool, the standard way to call
/// diesel's synchronous API from an async worker.
pub async fn run_blocking<F, T>(pool: DbPool, f: F) -> Result<T, PipelineError>
where
    F: FnOnce(&mut DbConnection) -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| PipelineError::DatabaseError { message: format!("blocking task panicked: {e}") })?
}
