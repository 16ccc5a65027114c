// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the gateway server.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::mysql::MySqlConnectOptions;
use wa_gateway_core::session::BridgeConfig;
use wa_gateway_core::store::mysql::is_valid_prefix;

/// Where the CMS database lives.
#[derive(Clone)]
pub enum DatabaseTarget {
    /// A full `mysql://` URL.
    Url(String),
    /// Individual coordinates.
    Parts {
        /// Host name.
        host: String,
        /// Port.
        port: u16,
        /// User name.
        user: String,
        /// Password, possibly empty.
        password: String,
        /// Database name.
        database: String,
    },
}

impl DatabaseTarget {
    /// Connection options for the pool.
    pub fn connect_options(&self) -> Result<MySqlConnectOptions, sqlx::Error> {
        match self {
            Self::Url(url) => MySqlConnectOptions::from_str(url),
            Self::Parts {
                host,
                port,
                user,
                password,
                database,
            } => {
                let options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(user)
                    .database(database);
                Ok(if password.is_empty() {
                    options
                } else {
                    options.password(password)
                })
            }
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(_) => f.write_str("Url(<redacted>)"),
            Self::Parts {
                host,
                port,
                user,
                database,
                ..
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("database", database)
                .finish_non_exhaustive(),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address
    pub bind_addr: SocketAddr,
    /// CMS database
    pub database: DatabaseTarget,
    /// Table-name prefix of the CMS tables
    pub db_prefix: String,
    /// Pool size
    pub db_max_connections: u32,
    /// How long a query waits for a pooled connection
    pub db_acquire_timeout: Duration,
    /// Root of the per-instance session directories
    pub sessions_path: PathBuf,
    /// How long `/instance/init` waits for a QR code
    pub qr_wait_timeout: Duration,
    /// Session bridge process
    pub bridge: BridgeConfig,
    /// Maximum JSON body size in bytes
    pub body_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let host: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::Invalid { var: "HOST", value: host })?;
        let port: u16 = parse_or(&var, "PORT", 3000)?;

        let database = match var("DATABASE_URL") {
            Some(url) => DatabaseTarget::Url(url),
            None => DatabaseTarget::Parts {
                host: var("DB_HOST").ok_or(ConfigError::MissingEnvVar("DATABASE_URL or DB_HOST"))?,
                port: parse_or(&var, "DB_PORT", 3306)?,
                user: var("DB_USER").ok_or(ConfigError::MissingEnvVar("DB_USER"))?,
                password: lookup("DB_PASS").unwrap_or_default(),
                database: var("DB_NAME").ok_or(ConfigError::MissingEnvVar("DB_NAME"))?,
            },
        };

        // An empty prefix is legitimate, so this one is read unfiltered.
        let db_prefix = lookup("DB_PREFIX").unwrap_or_else(|| "wp_".to_string());
        if !is_valid_prefix(&db_prefix) {
            return Err(ConfigError::Invalid {
                var: "DB_PREFIX",
                value: db_prefix,
            });
        }

        let bridge_defaults = BridgeConfig::default();
        let bridge = BridgeConfig {
            command: var("BRIDGE_COMMAND")
                .map(PathBuf::from)
                .unwrap_or(bridge_defaults.command),
            args: var("BRIDGE_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or(bridge_defaults.args),
            request_timeout: Duration::from_secs(parse_or(
                &var,
                "BRIDGE_REQUEST_TIMEOUT_SECS",
                bridge_defaults.request_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            database,
            db_prefix,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout: Duration::from_secs(parse_or(&var, "DB_ACQUIRE_TIMEOUT_SECS", 5)?),
            sessions_path: PathBuf::from(
                var("SESSIONS_PATH").unwrap_or_else(|| "./sessions".to_string()),
            ),
            qr_wait_timeout: Duration::from_secs(parse_or(&var, "QR_WAIT_TIMEOUT_SECS", 30)?),
            bridge,
            body_limit: parse_or(&var, "BODY_LIMIT_BYTES", 50 * 1024 * 1024)?,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var: key, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
