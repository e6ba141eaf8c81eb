//! Postgres connection pool.

use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Build the shared connection pool.
///
/// Every running backup or restore pins one extra connection for its
/// tenant advisory lock on top of its query traffic, so the ceiling is
/// sized for a handful of concurrent tenant operations plus API reads.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;

    Ok(pool)
}
