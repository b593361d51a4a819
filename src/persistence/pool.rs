//! Connection pool management for the authoritative store.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::core::error::{TitanError, TitanResult};

/// Result of a pool health probe.
#[derive(Debug, Clone)]
pub struct PoolHealth {
    pub is_healthy: bool,
    pub latency: Duration,
    pub active_connections: u32,
    pub idle_connections: u32,
}

/// Open a PostgreSQL pool with the configured limits.
pub async fn connect_pool(config: &DatabaseConfig) -> TitanResult<PgPool> {
    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
        .connect(&config.url)
        .await
        .map_err(|e| TitanError::StoreUnavailable(e.to_string()))
}

/// Round-trip probe used by the health endpoint.
pub async fn health_check(pool: &PgPool) -> PoolHealth {
    let start = Instant::now();
    let is_healthy = sqlx::query("SELECT 1").execute(pool).await.is_ok();

    PoolHealth {
        is_healthy,
        latency: start.elapsed(),
        active_connections: pool.size(),
        idle_connections: pool.num_idle() as u32,
    }
}
