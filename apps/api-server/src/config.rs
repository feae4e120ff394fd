//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time. A `.env` file, if present,
//! is loaded into the environment by `main` before this runs.

use axum::http::HeaderValue;
use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./data/records.db";

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("memory") {
            Some(Self::Memory)
        } else if s.eq_ignore_ascii_case("sqlite") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    fn default_for_build() -> Self {
        if cfg!(feature = "sqlite") {
            Self::Sqlite
        } else {
            Self::Memory
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error for {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: PathBuf,
    /// Log format
    pub log_format: LogFormat,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Port
        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError {
                field: "PORT",
                message: format!("Invalid port '{}': {}", raw, e),
            })?,
            None => DEFAULT_PORT,
        };

        // CORS allow origin
        let cors_origin_str = get("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider = match get("STORAGE_PROVIDER") {
            Some(raw) => StorageProvider::parse(&raw).ok_or_else(|| ConfigError {
                field: "STORAGE_PROVIDER",
                message: format!("Unknown provider '{}', expected memory or sqlite", raw),
            })?,
            None => StorageProvider::default_for_build(),
        };
        if storage_provider == StorageProvider::Sqlite && !cfg!(feature = "sqlite") {
            return Err(ConfigError {
                field: "STORAGE_PROVIDER",
                message: "sqlite requested but the server was built without the `sqlite` feature"
                    .into(),
            });
        }

        // DB path (for sqlite)
        let db_path = get("DB_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        // Log format
        let log_format = LogFormat::from_str(&get("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        Ok(Self {
            port,
            cors_allow_origin,
            storage_provider,
            db_path,
            log_format,
        })
    }

    /// Log warnings about configuration that loses data.
    pub fn warn_if_volatile(&self) {
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!(
                "STORAGE_PROVIDER=memory: users and tasks are kept in process memory \
                 and are lost on restart."
            );
        }
    }
}
