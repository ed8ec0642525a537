//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides for secrets and deployment specific values.
//! ```
//!
//! structure:
//! ```text
//!     - ServerConfig: Where the JSON api listens.
//!     - AntaresConfig: Platform url, access key, application and device ids.
//!     - SyncConfig: Periodic sync toggle, interval and the cron bearer secret.
//!     - StorageConfig: Memory or sqlite backend, demo seeding.
//!     - LoggingConfig: Log level and per-reading output.
//! ```
//!
//! environment overrides:
//! ```text
//!     ANTARES_API_KEY, ANTARES_DEVICE_ID, ANTARES_APPLICATION_ID,
//!     ANTARES_BASE_URL, CRON_SECRET, DATABASE_PATH, BIND_ADDR
//! ```
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_ANTARES_URL: &str = "https://platform.antares.id:8443/~/antares-cse/antares-id";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub antares: AntaresConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Connection details for one antares device.
/// Passed explicitly into the client, never read from globals.
#[derive(Debug, Deserialize, Clone)]
pub struct AntaresConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_application_id")]
    pub application_id: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// run the periodic sync loop inside the host
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// how many content instances to backfill on startup (0 disables)
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// bearer token required by POST /api/cron/sync-antares
    #[serde(default)]
    pub cron_secret: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
    /// fill an empty store with a day of simulated readings
    #[serde(default)]
    pub seed_demo_data: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub show_sensor_data: bool,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_base_url() -> String {
    DEFAULT_ANTARES_URL.to_string()
}

fn default_application_id() -> String {
    "DRTPM-Hidroponik".to_string()
}

fn default_device_id() -> String {
    "Monitoring_Hidroponik".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    300
}

fn default_history_limit() -> u32 {
    100
}

fn default_db_path() -> String {
    "hydro.db".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for AntaresConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_key: String::new(),
            application_id: default_application_id(),
            device_id: default_device_id(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_interval(),
            history_limit: default_history_limit(),
            cron_secret: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: default_db_path(),
            seed_demo_data: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), show_sensor_data: true }
    }
}

/// Where the configuration came from
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded_from: Option<PathBuf>,
    /// files that exist but failed to read or parse
    pub failures: Vec<(PathBuf, String)>,
}

impl LoadReport {
    pub fn log(&self) {
        for (path, error) in &self.failures {
            warn!(path = %path.display(), %error, "failed to load config");
        }
        match &self.loaded_from {
            Some(path) => info!(path = %path.display(), "config loaded"),
            None => warn!("no usable config file found - using defaults"),
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from a toml string
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback, then apply environment overrides.
    ///
    /// Nothing is logged here since this runs before the subscriber is
    /// installed. Call `LoadReport::log` once it is.
    pub fn load_or_default() -> (Self, LoadReport) {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        let (mut config, report) = Self::load_first(&paths);
        config.apply_env(|key| std::env::var(key).ok());
        (config, report)
    }

    /// First path that exists and parses wins, otherwise defaults
    pub fn load_first(paths: &[PathBuf]) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        for path in paths.iter().filter(|path| path.exists()) {
            match Self::load(path) {
                Ok(config) => {
                    report.loaded_from = Some(path.clone());
                    return (config, report);
                }
                Err(e) => report.failures.push((path.clone(), e.to_string())),
            }
        }

        (Self::default(), report)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("ANTARES_API_KEY") {
            self.antares.access_key = v;
        }
        if let Some(v) = lookup("ANTARES_DEVICE_ID") {
            self.antares.device_id = v;
        }
        if let Some(v) = lookup("ANTARES_APPLICATION_ID") {
            self.antares.application_id = v;
        }
        if let Some(v) = lookup("ANTARES_BASE_URL") {
            self.antares.base_url = v;
        }
        if let Some(v) = lookup("CRON_SECRET") {
            self.sync.cron_secret = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = v;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            self.server.bind = v;
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind,
            application = %self.antares.application_id,
            device = %self.antares.device_id,
            access_key_set = !self.antares.access_key.is_empty(),
            sync_enabled = self.sync.enabled,
            interval_seconds = self.sync.interval_seconds,
            storage = ?self.storage.backend,
            log_level = %self.logging.level,
            "host configuration"
        );
    }
}
