//! Concurrent mapping from target name to its live pool.

use crate::config::{Config, DEFAULT_TARGET};
use crate::pool::connection::{PoolStats, TargetPool};
use crate::pool::factory::PoolFactory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Owns the name -> pool mapping. Entries are whole `Arc`s swapped under a
/// write lock, so readers never observe a partially built pool.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<TargetPool>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool for `name`, else the `"default"` pool, else `None`. A `None`
    /// here is a caller error the broker must turn into a connection error.
    pub async fn get(&self, name: &str) -> Option<Arc<TargetPool>> {
        let pools = self.pools.read().await;
        pools
            .get(name)
            .or_else(|| pools.get(DEFAULT_TARGET))
            .cloned()
    }

    /// Insert or replace the pool for `name`. The previous pool, if any, is
    /// abandoned; its outstanding connections drain as their guards drop.
    pub async fn put(&self, name: impl Into<String>, pool: Arc<TargetPool>) {
        let name = name.into();
        let mut pools = self.pools.write().await;
        if pools.insert(name.clone(), pool).is_some() {
            debug!(target_name = %name, "replaced pool");
        }
    }

    /// Build and register a pool for every configured target. A target whose
    /// pool cannot be built is logged and skipped; one bad target does not
    /// abort the others once config validation has passed.
    pub async fn init_all(&self, config: &Config, factory: &PoolFactory) {
        for (name, target) in &config.targets {
            match factory.create(name, target).await {
                Ok(pool) => self.put(name.clone(), pool).await,
                Err(err) => {
                    warn!(target_name = %name, error = %err, "skipping target: pool initialization failed");
                }
            }
        }
    }

    /// Number of registered pools.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Drop every registered pool. Outstanding connections drain
    /// independently as their guards drop.
    pub async fn clear(&self) {
        self.pools.write().await.clear();
    }

    /// Per-target counters for every registered pool.
    pub async fn stats(&self) -> HashMap<String, PoolStats> {
        let pools = self.pools.read().await;
        pools
            .iter()
            .map(|(name, pool)| (name.clone(), pool.stats()))
            .collect()
    }
}
