use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

/// Name of the target every configuration must define. Lookups for unknown
/// target names fall back to this entry.
pub const DEFAULT_TARGET: &str = "default";

/// Strict `ip:port` form: four dot-separated octets 0-255, a colon, and up
/// to five port digits. The port value itself is not range-checked here;
/// an out-of-range port fails later when the address is parsed for dialing.
static IP_PORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(2[5][0-5]|2[0-4]\d|1\d{2}|\d{1,2})\.(25[0-5]|2[0-4]\d|1\d{2}|\d{1,2})\.(25[0-5]|2[0-4]\d|1\d{2}|\d{1,2})\.(25[0-5]|2[0-4]\d|1\d{2}|\d{1,2}):\d{0,5}$",
    )
    .expect("ip:port pattern is valid")
});

/// Errors raised while loading or validating configuration. All of these are
/// fatal at startup; none are recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("configuration contains no targets")]
    Empty,

    #[error("configuration has no \"default\" target")]
    MissingDefault,

    #[error("target \"{name}\" has a malformed server address: {server}")]
    InvalidAddress { name: String, server: String },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Wait limit as it appears in configuration. The file format accepts both
/// `maxWait: 100` and `maxWait: "100"`; the pool factory resolves this to
/// milliseconds and rejects non-numeric text per target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitMillis {
    Millis(u64),
    Text(String),
}

impl WaitMillis {
    /// Resolve to milliseconds.
    pub fn as_millis(&self) -> Result<u64, ParseIntError> {
        match self {
            WaitMillis::Millis(ms) => Ok(*ms),
            WaitMillis::Text(text) => text.trim().parse(),
        }
    }
}

/// Sizing limits for one target's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    /// Maximum connections checked out concurrently.
    pub max_total: u32,

    /// Maximum idle connections kept for reuse.
    pub max_idle: u32,

    /// How long a borrow may wait for a free connection, in milliseconds.
    pub max_wait: WaitMillis,
}

/// One named backend endpoint with its pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Backend address in strict `ip:port` form.
    pub server: String,

    /// Pool sizing limits.
    pub pool: PoolSettings,
}

/// The full target map, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    pub targets: HashMap<String, TargetConfig>,
}

impl Config {
    /// Parse a configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Look up a target by name, falling back to `"default"`.
    pub fn get_target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets
            .get(name)
            .or_else(|| self.targets.get(DEFAULT_TARGET))
    }

    /// The effective target name a lookup for `name` resolves to.
    pub fn effective_name<'a>(&self, name: &'a str) -> &'a str {
        if self.targets.contains_key(name) {
            name
        } else {
            DEFAULT_TARGET
        }
    }

    /// Check the loaded target map: it must be non-empty, contain a
    /// `"default"` entry, and every server address must match the strict
    /// `ip:port` form. Any violation aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Empty);
        }
        if !self.targets.contains_key(DEFAULT_TARGET) {
            return Err(ConfigError::MissingDefault);
        }
        for (name, target) in &self.targets {
            if !IP_PORT_PATTERN.is_match(&target.server) {
                return Err(ConfigError::InvalidAddress {
                    name: name.clone(),
                    server: target.server.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file.
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    })?;
    Config::from_yaml_str(&content)
}

/// Load a single-target configuration from environment variables:
///
/// - `KVPOOL_SERVER` (required, `ip:port`)
/// - `KVPOOL_MAX_TOTAL` (optional, default 8)
/// - `KVPOOL_MAX_IDLE` (optional, default 4)
/// - `KVPOOL_MAX_WAIT` (optional, milliseconds, default 1000)
///
/// The resulting map contains one `"default"` entry.
pub fn load_from_env() -> Result<Config, ConfigError> {
    // Pick up a .env file when present, ignore when absent.
    let _ = dotenvy::dotenv();

    let server =
        std::env::var("KVPOOL_SERVER").map_err(|_| ConfigError::MissingEnv("KVPOOL_SERVER"))?;

    let max_total = env_u32("KVPOOL_MAX_TOTAL", 8)?;
    let max_idle = env_u32("KVPOOL_MAX_IDLE", 4)?;
    let max_wait = env_u64("KVPOOL_MAX_WAIT", 1000)?;

    let mut targets = HashMap::new();
    targets.insert(
        DEFAULT_TARGET.to_string(),
        TargetConfig {
            server,
            pool: PoolSettings {
                max_total,
                max_idle,
                max_wait: WaitMillis::Millis(max_wait),
            },
        },
    );

    Ok(Config { targets })
}

/// Load configuration from a YAML file when a path is given, else from
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}

fn env_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(default),
    }
}
