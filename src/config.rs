//! TOML configuration for the Chronos backend.
//!
//! Every field has a serde default, so a partial (or absent) file parses.
//! Resolution order: `--config` flag, then the `CHRONOS_CONFIG` env var,
//! then `chronos.toml` in the working directory, then pure defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration. Sections map to TOML tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// `[http]` — gateway bind address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// `[database]` — SQLite file location and pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file. Missing parent directories are
    /// created on startup.
    pub path: PathBuf,
    /// Upper bound on open connections; the pool never grows past this.
    /// Zero is rejected at startup.
    pub pool_size: u32,
    /// How long one acquisition attempt waits for a free connection.
    pub acquire_timeout_ms: u64,
    /// SQLite busy handler timeout applied to every pooled connection.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chronos.db"),
            pool_size: 32,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
        }
    }
}

/// `[auth]` — authentication knobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enables the fixed demo credentials used by app-store reviewers.
    /// Off unless explicitly set in the config file.
    pub demo_login_enabled: bool,
}

/// `[logging]` — tracing filter directive used when `RUST_LOG` is unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolve configuration from the usual places. Explicitly named files
    /// (flag or env var) must exist; the `chronos.toml` fallback may be
    /// absent, in which case defaults apply.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os("CHRONOS_CONFIG").map(PathBuf::from) {
            return Self::load(&path);
        }
        let fallback = Path::new("chronos.toml");
        if fallback.exists() {
            Self::load(fallback)
        } else {
            Ok(Self::default())
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
