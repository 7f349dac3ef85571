//! Connection pooling module
//!
//! This module provides:
//! - Bounded per-target TCP connection pools with idle reuse
//! - A factory that probes each pool for liveness before it is registered
//! - A concurrent registry mapping target names to live pools
//! - A broker with single-flight recovery for stale pools

pub mod broker;
pub mod connection;
pub mod factory;
pub mod registry;

pub use broker::{BrokerStats, ConnectionBroker};
pub use connection::{ConnectionError, PoolSizing, PoolStats, PooledConnection, TargetPool};
pub use factory::{FactoryError, PoolFactory, DEFAULT_CONNECT_TIMEOUT};
pub use registry::PoolRegistry;
