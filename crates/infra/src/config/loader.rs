//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are absent, falls back to a config file
//! 3. Probes `./config.json`, `./config.toml`, `./relay.json`,
//!    `./relay.toml`
//!
//! ## Environment Variables
//! - `RELAY_DB_PATH`: Database file path (required for env loading)
//! - `RELAY_DB_POOL_SIZE`: Connection pool size
//! - `RELAY_HTTP_TIMEOUT_SECS`: Outbound HTTP timeout
//! - `RELAY_HTTP_MAX_ATTEMPTS`: Outbound HTTP attempts (1 = no retry)
//! - `RELAY_HTTP_BASE_BACKOFF_MS`: Retry backoff base delay
//! - `RELAY_SYNC_PAGE_SIZE`: Default provider sync page size
//!
//! OAuth client id/secret pairs (`RELAY_GOOGLE_CLIENT_ID`, …) are NOT
//! part of this config; provider adapters read them directly inside
//! their token-refresh implementations.

use std::path::{Path, PathBuf};

use relay_domain::{Config, DatabaseConfig, HttpConfig, RelayError, Result, SyncConfig};

/// Load configuration with automatic fallback strategy.
///
/// # Errors
/// Returns `RelayError::Config` when neither source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "environment config incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables.
///
/// `RELAY_DB_PATH` must be present; the remaining variables fall back
/// to their defaults.
///
/// # Errors
/// Returns `RelayError::Config` when `RELAY_DB_PATH` is missing or any
/// present variable fails to parse.
pub fn load_from_env() -> Result<Config> {
    let db_path = std::env::var("RELAY_DB_PATH")
        .map_err(|_| RelayError::Config("RELAY_DB_PATH is not set".into()))?;

    let defaults = Config::default();
    Ok(Config {
        database: DatabaseConfig {
            path: db_path,
            pool_size: env_parse("RELAY_DB_POOL_SIZE", defaults.database.pool_size)?,
        },
        http: HttpConfig {
            timeout_secs: env_parse("RELAY_HTTP_TIMEOUT_SECS", defaults.http.timeout_secs)?,
            max_attempts: env_parse("RELAY_HTTP_MAX_ATTEMPTS", defaults.http.max_attempts)?,
            base_backoff_ms: env_parse("RELAY_HTTP_BASE_BACKOFF_MS", defaults.http.base_backoff_ms)?,
        },
        sync: SyncConfig {
            page_size: env_parse("RELAY_SYNC_PAGE_SIZE", defaults.sync.page_size)?,
        },
    })
}

/// Load configuration from a JSON or TOML file.
///
/// When `path` is `None`, the default probe locations are tried in
/// order.
///
/// # Errors
/// Returns `RelayError::Config` when no file is found or parsing fails.
pub fn load_from_file(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(explicit) => explicit.to_path_buf(),
        None => probe_default_paths()
            .ok_or_else(|| RelayError::Config("no config file found".into()))?,
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {e}", path.display())))?;

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("invalid TOML in {}: {e}", path.display())))?,
        _ => serde_json::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("invalid JSON in {}: {e}", path.display())))?,
    };

    tracing::info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn probe_default_paths() -> Option<PathBuf> {
    ["config.json", "config.toml", "relay.json", "relay.toml"]
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}
