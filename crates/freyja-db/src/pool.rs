//! Postgres pools for the primary and legacy metadata stores.
//!
//! Both stores hold `orm_resources` rows. Each gets its own pool, sized and
//! configured through its own environment prefix: `DATABASE_*` for the
//! primary store and `LEGACY_DATABASE_*` for the legacy one.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use freyja_core::{defaults, Error, Result};

/// Metadata store a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Primary,
    /// Read-only during migration, so it needs fewer connections.
    Legacy,
}

impl StoreRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreRole::Primary => "primary",
            StoreRole::Legacy => "legacy",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            StoreRole::Primary => "DATABASE",
            StoreRole::Legacy => "LEGACY_DATABASE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub role: StoreRole,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl PoolConfig {
    pub fn new(role: StoreRole) -> Self {
        let max_connections = match role {
            StoreRole::Primary => defaults::DB_MAX_CONNECTIONS,
            StoreRole::Legacy => defaults::LEGACY_DB_MAX_CONNECTIONS,
        };
        Self {
            role,
            max_connections,
            min_connections: 1,
            connect_timeout: Duration::from_secs(defaults::DB_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Config for `role` with `{PREFIX}_MAX_CONNECTIONS` and
    /// `{PREFIX}_CONNECT_TIMEOUT_SECS` applied.
    pub fn from_env(role: StoreRole) -> Self {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    fn from_lookup(role: StoreRole, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = role.env_prefix();
        let mut config = Self::new(role);

        if let Some(n) = lookup(&format!("{}_MAX_CONNECTIONS", prefix))
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_connections = n.max(1);
        }
        if let Some(secs) = lookup(&format!("{}_CONNECT_TIMEOUT_SECS", prefix))
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }
}

/// Open a pool for one metadata store.
///
/// A store that cannot be reached is reported as
/// [`Error::BackendUnavailable`] naming the store.
pub async fn connect(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let store = config.role.as_str();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| {
            warn!(subsystem = "db", component = "pool", store, error = %e, "Connection failed");
            Error::BackendUnavailable {
                backend: store,
                message: e.to_string(),
            }
        })?;

    info!(
        subsystem = "db",
        component = "pool",
        store,
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}
