//! Builds one connection pool for one target's configuration.

use crate::config::TargetConfig;
use crate::pool::connection::{ConnectionError, PoolSizing, TargetPool};
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Dial timeout applied to every pool. An implementation default, not a
/// per-target setting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors scoped to building a single target's pool. At startup these are
/// logged and the target skipped; other targets are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("target \"{name}\" has an unparseable server address \"{server}\": {source}")]
    Address {
        name: String,
        server: String,
        #[source]
        source: AddrParseError,
    },

    #[error("target \"{name}\" has a non-numeric maxWait value \"{value}\"")]
    WaitMillis { name: String, value: String },

    #[error("liveness probe failed for target \"{name}\": {source}")]
    Probe {
        name: String,
        #[source]
        source: ConnectionError,
    },
}

/// Factory for [`TargetPool`]s. Carries the process-wide connect timeout.
#[derive(Debug, Clone)]
pub struct PoolFactory {
    connect_timeout: Duration,
}

impl Default for PoolFactory {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build, probe, and return a pool for `target`.
    ///
    /// The freshly built pool immediately borrows and returns one
    /// connection. A pool that cannot produce a live connection here fails
    /// loudly now instead of on its first real use, and must not be
    /// registered by the caller.
    pub async fn create(
        &self,
        name: &str,
        target: &TargetConfig,
    ) -> Result<Arc<TargetPool>, FactoryError> {
        let addr: SocketAddr =
            target
                .server
                .parse()
                .map_err(|source| FactoryError::Address {
                    name: name.to_string(),
                    server: target.server.clone(),
                    source,
                })?;

        let max_wait = target
            .pool
            .max_wait
            .as_millis()
            .map_err(|_| FactoryError::WaitMillis {
                name: name.to_string(),
                value: match &target.pool.max_wait {
                    crate::config::WaitMillis::Millis(ms) => ms.to_string(),
                    crate::config::WaitMillis::Text(text) => text.clone(),
                },
            })?;

        let sizing = PoolSizing {
            max_total: target.pool.max_total,
            max_idle: target.pool.max_idle,
            max_wait: Duration::from_millis(max_wait),
            connect_timeout: self.connect_timeout,
        };

        let pool = Arc::new(TargetPool::new(name, addr, sizing));

        // Borrow-then-release as a liveness probe; the stream lands on the
        // idle list for the first real borrower.
        let probe = pool.acquire().await.map_err(|source| FactoryError::Probe {
            name: name.to_string(),
            source,
        })?;
        drop(probe);

        info!(target_name = %name, addr = %addr, "connection pool ready");
        Ok(pool)
    }
}
