// ⚙️ Configuration - environment variables (optionally from .env)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::store::{MemoryStoreConfig, DEFAULT_TTL_SECS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where session rosters live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
    Cookie,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Sqlite => "sqlite",
            StoreKind::Cookie => "cookie",
        }
    }

    /// True when the server holds the roster and can push updates
    pub fn is_server_held(&self) -> bool {
        !matches!(self, StoreKind::Cookie)
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "sqlite" => Ok(StoreKind::Sqlite),
            "cookie" => Ok(StoreKind::Cookie),
            other => Err(format!("unknown store {:?} (expected memory, sqlite or cookie)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub db_path: PathBuf,
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_value_bytes: usize,
    pub static_dir: PathBuf,
    /// Cookie signing secret; `None` means generate one at startup
    pub session_secret: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        let memory = MemoryStoreConfig::default();
        Config {
            port: 8080,
            store: StoreKind::Memory,
            db_path: PathBuf::from("masterscalc.db"),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_entries: memory.max_entries,
            max_value_bytes: memory.max_value_bytes,
            static_dir: PathBuf::from("static"),
            session_secret: None,
        }
    }
}

impl Config {
    /// Read from the process environment, after loading `.env` if present
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenvy::dotenv().ok();
        Config::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            config.port = parse("PORT", &v)?;
        }
        if let Some(v) = get("MASTERSCALC_STORE") {
            config.store = parse("MASTERSCALC_STORE", &v)?;
        }
        if let Some(v) = get("MASTERSCALC_DB") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("MASTERSCALC_TTL_SECS") {
            config.ttl = Duration::from_secs(parse("MASTERSCALC_TTL_SECS", &v)?);
        }
        if let Some(v) = get("MASTERSCALC_MAX_ENTRIES") {
            config.max_entries = parse("MASTERSCALC_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("MASTERSCALC_MAX_VALUE_BYTES") {
            config.max_value_bytes = parse("MASTERSCALC_MAX_VALUE_BYTES", &v)?;
        }
        if let Some(v) = get("MASTERSCALC_STATIC_DIR") {
            config.static_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SESSION_KEY") {
            let secret = STANDARD.decode(v.trim()).map_err(|e| ConfigError::Invalid {
                var: "SESSION_KEY",
                value: v.clone(),
                reason: e.to_string(),
            })?;
            config.session_secret = Some(secret);
        }

        if config.max_entries == 0 {
            return Err(ConfigError::Invalid {
                var: "MASTERSCALC_MAX_ENTRIES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    pub fn memory_store(&self) -> MemoryStoreConfig {
        MemoryStoreConfig {
            ttl: self.ttl,
            max_entries: self.max_entries,
            max_value_bytes: self.max_value_bytes,
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
