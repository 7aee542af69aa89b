//! Connection pools for the repositories and the migration tool.
//!
//! Repositories share one pool sized by [`PoolConfig::default`]; the
//! migration tool uses [`PoolConfig::single`] so every statement of a run
//! shares one session.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use lectern_core::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long `acquire` waits for a free connection.
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` keeps connections until they go idle.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            connect_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: Some(DEFAULT_MAX_LIFETIME),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// One connection, never recycled mid-run.
    pub fn single() -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            max_lifetime: None,
            ..Self::default()
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self.min_connections = self.min_connections.min(n);
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

/// Pool with [`PoolConfig::default`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    debug!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening connection pool"
    );

    let pool = config
        .options()
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Connection pool ready"
    );
    Ok(pool)
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub size: u32,
    pub idle: usize,
}

impl PoolHealth {
    /// Every open connection is checked out.
    pub fn is_saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }
}

/// Log pool usage; warns when no connection is idle.
pub fn log_pool_metrics(pool: &PgPool) -> PoolHealth {
    let health = PoolHealth {
        size: pool.size(),
        idle: pool.num_idle(),
    };

    if health.is_saturated() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = health.size,
            "No idle connections left in pool"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            op = "metrics",
            pool_size = health.size,
            pool_idle = health.idle,
            "Pool usage"
        );
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_is_one_unrecycled_connection() {
        let config = PoolConfig::single();
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_lifetime, None);
        assert_eq!(config.connect_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn test_shrinking_max_caps_min() {
        let config = PoolConfig::new().min_connections(5).max_connections(2);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.min_connections, 2);
    }

    #[test]
    fn test_saturation() {
        assert!(PoolHealth { size: 3, idle: 0 }.is_saturated());
        assert!(!PoolHealth { size: 3, idle: 1 }.is_saturated());
        assert!(!PoolHealth { size: 0, idle: 0 }.is_saturated());
    }

    #[tokio::test]
    async fn test_metrics_on_unopened_pool() {
        let pool = PoolConfig::single()
            .min_connections(0)
            .options()
            .connect_lazy("postgres://lectern@127.0.0.1:1/unreachable")
            .unwrap();
        let health = log_pool_metrics(&pool);
        assert_eq!(health, PoolHealth { size: 0, idle: 0 });
    }
}
