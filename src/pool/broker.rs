//! Borrow entry point with single-flight pool recovery.
//!
//! The fast path resolves a pool and borrows from it without any broker
//! locking. Any borrow failure funnels into a recovery path serialized by
//! one process-wide mutex: whoever holds it re-probes the current pool and
//! only rebuilds when the probe fails too, so concurrent callers hitting
//! the same outage produce a single rebuild instead of a reconnect storm.

use crate::config::Config;
use crate::pool::connection::{ConnectionError, PooledConnection};
use crate::pool::factory::PoolFactory;
use crate::pool::registry::PoolRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Counters for the broker, snapshot via [`ConnectionBroker::stats`].
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Borrow calls received.
    pub borrows: u64,

    /// Times the recovery path was entered.
    pub recoveries: u64,

    /// Pool rebuilds attempted inside recovery.
    pub rebuilds: u64,
}

/// Resolves target names to pools and hands out connections, rebuilding a
/// target's pool when its connections have gone stale.
pub struct ConnectionBroker {
    config: Arc<Config>,
    registry: Arc<PoolRegistry>,
    factory: PoolFactory,
    // One recovery at a time across all targets. Private to this type, so
    // refining it to per-target locking would not touch any call site.
    recovery: Mutex<()>,
    borrows: AtomicU64,
    recoveries: AtomicU64,
    rebuilds: AtomicU64,
}

impl ConnectionBroker {
    pub fn new(config: Arc<Config>, registry: Arc<PoolRegistry>, factory: PoolFactory) -> Self {
        Self {
            config,
            registry,
            factory,
            recovery: Mutex::new(()),
            borrows: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Borrow a connection for `name` (falling back to `"default"`).
    ///
    /// On a fast-path failure the broker runs one serialized recovery pass
    /// for the target and then retries the borrow exactly once; the retry's
    /// error is the caller's error.
    pub async fn borrow(&self, name: &str) -> Result<PooledConnection, ConnectionError> {
        self.borrows.fetch_add(1, Ordering::Relaxed);

        match self.registry.get(name).await {
            Some(pool) => match pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(target_name = %name, error = %err, "borrow failed, entering recovery");
                }
            },
            None => {
                debug!(target_name = %name, "no pool registered, entering recovery");
            }
        }

        self.recover(name).await;

        match self.registry.get(name).await {
            Some(pool) => pool.acquire().await,
            None => Err(ConnectionError::NoPool(name.to_string())),
        }
    }

    /// Serialized re-validation-or-rebuild for the target `name` resolves to.
    ///
    /// Queued callers each re-check before rebuilding, so one broken pool
    /// causes at most one rebuild no matter how many borrowers hit the
    /// failure together. Never returns an error: a failed rebuild leaves the
    /// registry as it was and the caller's retry reports the outcome.
    async fn recover(&self, name: &str) {
        let _guard = self.recovery.lock().await;
        self.recoveries.fetch_add(1, Ordering::Relaxed);

        // Double-check under the lock: the original failure may have been
        // transient contention, or an earlier holder of this lock may have
        // already replaced the pool.
        if let Some(pool) = self.registry.get(name).await {
            if pool.acquire().await.is_ok() {
                debug!(target_name = %name, "pool healthy on re-check, no rebuild needed");
                return;
            }
        }

        let effective = self.config.effective_name(name);
        let Some(target) = self.config.targets.get(effective) else {
            // Unreachable after config validation, which guarantees a
            // "default" entry.
            warn!(target_name = %name, "no configuration for target, cannot rebuild");
            return;
        };

        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        match self.factory.create(effective, target).await {
            Ok(pool) => {
                self.registry.put(effective, pool).await;
                info!(target_name = %effective, "rebuilt connection pool");
            }
            Err(err) => {
                warn!(target_name = %effective, error = %err, "pool rebuild failed");
            }
        }
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            borrows: self.borrows.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConnectionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBroker")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
