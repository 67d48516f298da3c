//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TelemetryError};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "NDH_TELEMETRY_";

/// Full service configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
    pub export: ExportConfig,
    /// Path the config was loaded from (never serialized).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Request bodies above this size are rejected as malformed.
    pub max_body_bytes: usize,
}

/// Location and retention of the aggregate document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub document_path: PathBuf,
    pub max_retained_events: usize,
}

/// Admission control and write-guard knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    pub rate_limit_enabled: bool,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_events: usize,
    pub lock_timeout_secs: u64,
}

/// Activity log destination and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub activity_log: PathBuf,
    pub fallback_log: Option<PathBuf>,
    pub max_log_bytes: u64,
    pub max_rotated_files: u32,
}

/// Offline export target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportConfig {
    pub database_path: PathBuf,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[NDH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir()
        .join(".local")
        .join("share")
        .join("ndh-telemetry")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            document_path: data_dir().join("telemetry.json"),
            max_retained_events: 10_000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            rate_limit_window_secs: 60,
            rate_limit_max_events: 100,
            lock_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            activity_log: data_dir().join("activity.jsonl"),
            fallback_log: None,
            max_log_bytes: 16 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            database_path: data_dir().join("export.sqlite3"),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir()
            .join(".config")
            .join("ndh-telemetry")
            .join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| TelemetryError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(TelemetryError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.source = Some(path_buf);
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parsed listener address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|error| TelemetryError::InvalidConfig {
                details: format!("server.bind_addr {:?}: {error}", self.server.bind_addr),
            })
    }

    /// Deterministic FNV-1a hash of the effective config for the startup log line.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|raw| (name, raw))
        };

        // server
        if let Some((_, raw)) = var("SERVER_BIND_ADDR") {
            self.server.bind_addr = raw;
        }
        if let Some((name, raw)) = var("SERVER_MAX_BODY_BYTES") {
            self.server.max_body_bytes = parse_env(&name, &raw)?;
        }

        // store
        if let Some((_, raw)) = var("STORE_DOCUMENT_PATH") {
            self.store.document_path = PathBuf::from(raw);
        }
        if let Some((name, raw)) = var("STORE_MAX_RETAINED_EVENTS") {
            self.store.max_retained_events = parse_env(&name, &raw)?;
        }

        // ingest
        if let Some((name, raw)) = var("INGEST_RATE_LIMIT_ENABLED") {
            self.ingest.rate_limit_enabled = parse_env(&name, &raw)?;
        }
        if let Some((name, raw)) = var("INGEST_RATE_LIMIT_WINDOW_SECS") {
            self.ingest.rate_limit_window_secs = parse_env(&name, &raw)?;
        }
        if let Some((name, raw)) = var("INGEST_RATE_LIMIT_MAX_EVENTS") {
            self.ingest.rate_limit_max_events = parse_env(&name, &raw)?;
        }
        if let Some((name, raw)) = var("INGEST_LOCK_TIMEOUT_SECS") {
            self.ingest.lock_timeout_secs = parse_env(&name, &raw)?;
        }

        // logging
        if let Some((_, raw)) = var("LOGGING_ACTIVITY_LOG") {
            self.logging.activity_log = PathBuf::from(raw);
        }
        if let Some((_, raw)) = var("LOGGING_FALLBACK_LOG") {
            self.logging.fallback_log = Some(PathBuf::from(raw));
        }
        if let Some((name, raw)) = var("LOGGING_MAX_LOG_BYTES") {
            self.logging.max_log_bytes = parse_env(&name, &raw)?;
        }

        // export
        if let Some((_, raw)) = var("EXPORT_DATABASE_PATH") {
            self.export.database_path = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        for (name, val) in [
            ("server.max_body_bytes", self.server.max_body_bytes),
            ("store.max_retained_events", self.store.max_retained_events),
            ("ingest.rate_limit_max_events", self.ingest.rate_limit_max_events),
        ] {
            if val == 0 {
                return Err(TelemetryError::InvalidConfig {
                    details: format!("{name} must be >= 1"),
                });
            }
        }

        if self.ingest.rate_limit_window_secs == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "ingest.rate_limit_window_secs must be > 0".to_string(),
            });
        }

        if self.ingest.lock_timeout_secs == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "ingest.lock_timeout_secs must be > 0".to_string(),
            });
        }

        if self.logging.max_rotated_files == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "logging.max_rotated_files must be >= 1".to_string(),
            });
        }

        if self.store.document_path.as_os_str().is_empty() {
            return Err(TelemetryError::InvalidConfig {
                details: "store.document_path must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| TelemetryError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
