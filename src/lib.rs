//! kvpool - multi-target TCP connection pool manager with transparent recovery

pub mod config;
pub mod manager;
pub mod pool;

pub use config::{Config, ConfigError};
pub use manager::PoolManager;
pub use pool::{ConnectionError, FactoryError, PooledConnection};
