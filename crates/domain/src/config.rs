//! Configuration structures for the automation core.
//!
//! Values are populated by the infra config loader (environment first,
//! file fallback). OAuth client id/secret pairs are deliberately absent:
//! they stay in the environment and are read only inside provider
//! token-refresh implementations.

use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
    /// Connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "relay.db".into(), pool_size: 5 }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum attempts per request (1 = no retries)
    pub max_attempts: usize,
    /// Base backoff delay between retries, in milliseconds
    pub base_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, max_attempts: 3, base_backoff_ms: 200 }
    }
}

/// Provider sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default page size requested from providers
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}
