//! The manager object tying config, registry, factory, and broker together.
//!
//! Constructed once at process start and passed by handle to all callers;
//! clones share the same registry and broker.

use crate::config::{Config, ConfigError};
use crate::pool::{
    BrokerStats, ConnectionBroker, ConnectionError, PoolFactory, PoolRegistry, PoolStats,
    PooledConnection,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Multi-target connection-pool manager.
#[derive(Debug, Clone)]
pub struct PoolManager {
    config: Arc<Config>,
    registry: Arc<PoolRegistry>,
    factory: PoolFactory,
    broker: Arc<ConnectionBroker>,
}

impl PoolManager {
    /// Validate `config` and build an empty manager. Pools are built by
    /// [`initialize`](Self::initialize).
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(PoolRegistry::new());
        let factory = PoolFactory::new();
        let broker = Arc::new(ConnectionBroker::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            factory.clone(),
        ));
        Ok(Self {
            config,
            registry,
            factory,
            broker,
        })
    }

    /// Eagerly build a pool for every configured target. Targets whose pool
    /// cannot be built are logged and skipped; they are retried lazily by
    /// the broker's recovery path on their first borrow.
    pub async fn initialize(&self) {
        self.registry.init_all(&self.config, &self.factory).await;
        info!(
            targets = self.config.targets.len(),
            pools = self.registry.len().await,
            "pool manager initialized"
        );
    }

    /// Borrow a connection for `name`, falling back to `"default"`. Returns
    /// the connection to its pool when the handle is dropped.
    pub async fn get(&self, name: &str) -> Result<PooledConnection, ConnectionError> {
        self.broker.borrow(name).await
    }

    /// The validated configuration this manager was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-target pool counters.
    pub async fn pool_stats(&self) -> HashMap<String, PoolStats> {
        self.registry.stats().await
    }

    /// Broker counters.
    pub fn broker_stats(&self) -> BrokerStats {
        self.broker.stats()
    }

    /// Drop every pool. Outstanding connections drain as their handles
    /// drop; subsequent borrows rebuild pools lazily through recovery.
    pub async fn shutdown(&self) {
        self.registry.clear().await;
        info!("connection pools shut down");
    }
}
