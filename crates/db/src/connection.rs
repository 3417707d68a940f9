use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    pool_options(max_connections, timeout_secs).connect(database_url).await
}

/// Builds the pool without touching the network; the first query establishes a connection.
pub fn connect_lazy_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    pool_options(max_connections, timeout_secs).connect_lazy(database_url)
}

fn pool_options(max_connections: u32, timeout_secs: u64) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET application_name = 'supplyq'").execute(&mut *conn).await?;
                Ok(())
            })
        })
}
