//! Connection provider
//!
//! Maps opaque database identifiers to lazily created, cached connection
//! pools. The engine never sees hosts or credentials directly; it asks the
//! provider to open a named database and receives a pool or a
//! `ConnectionUnavailable` error.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use schemasync_core::config::DatabaseConfig;
use schemasync_core::error::{SyncError, SyncResult};

/// Named database configurations and their opened pools.
pub struct ConnectionProvider {
    configs: HashMap<String, DatabaseConfig>,
    pools: RwLock<HashMap<String, PgPool>>,
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted: Vec<_> = self
            .configs
            .iter()
            .map(|(id, config)| (id, config.redacted()))
            .collect();
        f.debug_struct("ConnectionProvider")
            .field("configs", &redacted)
            .finish()
    }
}

impl ConnectionProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a database under an identifier. The password may be
    /// overridden from the process environment
    /// (`SCHEMASYNC_<ID>_PASSWORD`).
    pub fn register(&mut self, id: impl Into<String>, mut config: DatabaseConfig) {
        let id = id.into();
        config.apply_env_password(&id);
        self.configs.insert(id, config);
    }

    /// Register a database using builder pattern.
    #[must_use]
    pub fn with_database(mut self, id: impl Into<String>, config: DatabaseConfig) -> Self {
        self.register(id, config);
        self
    }

    /// Check whether an identifier is registered.
    #[must_use]
    pub fn knows(&self, id: &str) -> bool {
        self.configs.contains_key(id)
    }

    /// Get the configuration registered under an identifier.
    #[must_use]
    pub fn config(&self, id: &str) -> Option<&DatabaseConfig> {
        self.configs.get(id)
    }

    /// Open (or reuse) the pool for a registered database.
    pub async fn open(&self, id: &str) -> SyncResult<PgPool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(id) {
                return Ok(pool.clone());
            }
        }

        let config = self
            .configs
            .get(id)
            .ok_or_else(|| SyncError::connection_unavailable(id))?;
        config.validate()?;

        debug!(database = %id, host = %config.host, "Opening connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.connection.pool_size)
            .acquire_timeout(Duration::from_secs(config.connection.connect_timeout_secs))
            .connect(&config.connection_url())
            .await
            .map_err(|e| SyncError::connection_unavailable_with_source(id, e))?;

        info!(database = %id, host = %config.host, "Connection pool established");

        let mut pools = self.pools.write().await;
        let pool = pools.entry(id.to_string()).or_insert(pool);
        Ok(pool.clone())
    }

    /// Close every opened pool.
    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (id, pool) in pools.drain() {
            debug!(database = %id, "Closing connection pool");
            pool.close().await;
        }
    }
}

impl Default for ConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_knows() {
        let provider = ConnectionProvider::new()
            .with_database("erp_v16", DatabaseConfig::new("v16.internal", "erp", "sync"))
            .with_database("erp_v18", DatabaseConfig::new("v18.internal", "erp", "sync"));

        assert!(provider.knows("erp_v16"));
        assert!(provider.knows("erp_v18"));
        assert!(!provider.knows("erp_v20"));
    }

    #[tokio::test]
    async fn test_open_unknown_database() {
        let provider = ConnectionProvider::new();
        let err = provider.open("nowhere").await.unwrap_err();

        assert_eq!(err.error_code(), "CONNECTION_UNAVAILABLE");
        assert!(err.is_fatal_for_run());
    }

    #[tokio::test]
    async fn test_open_invalid_config() {
        let provider =
            ConnectionProvider::new().with_database("bad", DatabaseConfig::new("", "erp", "sync"));
        let err = provider.open("bad").await.unwrap_err();

        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let provider = ConnectionProvider::new().with_database(
            "erp_v16",
            DatabaseConfig::new("v16.internal", "erp", "sync").with_password("s3cr3t"),
        );

        let debug = format!("{provider:?}");
        assert!(!debug.contains("s3cr3t"));
    }
}
