//! Connection handling for the target databases the pipeline loads into.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Dump files are applied one target at a time; a small pool is enough.
const TARGET_POOL_MAX_CONNECTIONS: u32 = 2;

/// How long to wait for a connection before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a lazily-connecting pool for a target database.
///
/// No connection is opened until the first query, so an unreachable target
/// surfaces as an import error for that target rather than a startup
/// failure.
pub fn create_lazy_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(TARGET_POOL_MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(database_url)
}

/// Execute a multi-statement SQL script.
///
/// The script is sent as one simple-query message, which PostgreSQL runs as
/// a single implicit transaction: a failing statement rolls back the ones
/// before it. Scripts with their own `BEGIN`/`COMMIT` manage that
/// themselves.
pub async fn apply_sql_script(pool: &DbPool, script: &str) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(script).execute(pool).await?;
    tracing::debug!(bytes = script.len(), "SQL script applied");
    Ok(())
}
