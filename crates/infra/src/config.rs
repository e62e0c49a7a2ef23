//! Configuration loading and representation.
//!
//! Everything is read from environment variables at startup. `from_lookup`
//! takes the lookup function as a parameter so tests never touch the real
//! process environment.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use bakeshop_orders::{TotalPolicy, TransitionPolicyKind};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Postgres connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

// Keeps credentials embedded in the URL out of logs.
impl core::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub total_policy: TotalPolicy,
    pub status_policy: TransitionPolicyKind,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset and empty are treated the same.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = match get("HOST") {
            Some(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|e| ConfigError::invalid("HOST", &raw, e))?,
            None => DEFAULT_HOST
                .parse()
                .map_err(|e| ConfigError::invalid("HOST", DEFAULT_HOST, e))?,
        };

        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;

        let database = match get("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(
                    "DB_MAX_CONNECTIONS",
                    get("DB_MAX_CONNECTIONS"),
                    DEFAULT_MAX_CONNECTIONS,
                )?,
                acquire_timeout: Duration::from_secs(parse_or(
                    "DB_ACQUIRE_TIMEOUT_SECS",
                    get("DB_ACQUIRE_TIMEOUT_SECS"),
                    DEFAULT_ACQUIRE_TIMEOUT_SECS,
                )?),
            }),
            None => None,
        };

        if let Some(db) = &database {
            if db.max_connections == 0 {
                return Err(ConfigError::invalid(
                    "DB_MAX_CONNECTIONS",
                    "0",
                    "must be at least 1",
                ));
            }
        }

        let total_policy = parse_or("ORDER_TOTAL_POLICY", get("ORDER_TOTAL_POLICY"), TotalPolicy::default())?;
        let status_policy = parse_or(
            "ORDER_STATUS_POLICY",
            get("ORDER_STATUS_POLICY"),
            TransitionPolicyKind::default(),
        )?;

        Ok(Self {
            host,
            port,
            database,
            total_policy,
            status_policy,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(key, &raw, e)),
        None => Ok(default),
    }
}
