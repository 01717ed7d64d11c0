use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STORAGE_BACKEND: &str = "in-memory";
const DEFAULT_STAGE_LOCK_TIMEOUT_MS: u64 = 2000;
const DEFAULT_REVISION_RETRY_INTERVAL_MS: u64 = 10;
const DEFAULT_LOCK_REGISTRY_PRUNE_THRESHOLD: usize = 10_000;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Where production orders and process records are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Database,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// "in-memory" or "database"
    #[serde(default = "default_storage_backend")]
    #[validate(custom = "validate_storage_backend")]
    pub storage_backend: String,

    /// Database connection URL, used by the "database" backend
    pub database_url: String,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Database pool size
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// Longest a transition waits for its stage lock
    #[serde(default = "default_stage_lock_timeout_ms")]
    #[validate(range(min = 1))]
    pub stage_lock_timeout_ms: u64,

    /// Pause between attempts after a revision conflict
    #[serde(default = "default_revision_retry_interval_ms")]
    #[validate(range(min = 1))]
    pub revision_retry_interval_ms: u64,

    /// Registry size past which idle stage locks are dropped
    #[serde(default = "default_lock_registry_prune_threshold")]
    #[validate(range(min = 1))]
    pub lock_registry_prune_threshold: usize,

    /// Capacity of the audit event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a development configuration with in-memory storage
    pub fn new(host: String, port: u16, environment: String) -> Self {
        Self {
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            storage_backend: default_storage_backend(),
            database_url: "sqlite::memory:".to_string(),
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            stage_lock_timeout_ms: DEFAULT_STAGE_LOCK_TIMEOUT_MS,
            revision_retry_interval_ms: DEFAULT_REVISION_RETRY_INTERVAL_MS,
            lock_registry_prune_threshold: DEFAULT_LOCK_REGISTRY_PRUNE_THRESHOLD,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn storage_backend(&self) -> StorageBackend {
        if self.storage_backend.eq_ignore_ascii_case("database") {
            StorageBackend::Database
        } else {
            StorageBackend::InMemory
        }
    }

    pub fn stage_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_lock_timeout_ms)
    }

    pub fn revision_retry_interval(&self) -> Duration {
        Duration::from_millis(self.revision_retry_interval_ms)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.revision_retry_interval_ms >= self.stage_lock_timeout_ms {
            let mut err = ValidationError::new("revision_retry_interval_ms");
            err.message = Some(
                "revision_retry_interval_ms must be shorter than stage_lock_timeout_ms".into(),
            );
            errors.add("revision_retry_interval_ms", err);
        }

        if self.storage_backend() == StorageBackend::Database
            && self.database_url.trim().is_empty()
        {
            let mut err = ValidationError::new("database_url_required");
            err.message = Some("Set APP__DATABASE_URL when storage_backend is database".into());
            errors.add("database_url", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_storage_backend() -> String {
    DEFAULT_STORAGE_BACKEND.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_stage_lock_timeout_ms() -> u64 {
    DEFAULT_STAGE_LOCK_TIMEOUT_MS
}

fn default_revision_retry_interval_ms() -> u64 {
    DEFAULT_REVISION_RETRY_INTERVAL_MS
}

fn default_lock_registry_prune_threshold() -> usize {
    DEFAULT_LOCK_REGISTRY_PRUNE_THRESHOLD
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_storage_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "database" => Ok(()),
        _ => {
            let mut err = ValidationError::new("storage_backend");
            err.message = Some("Must be one of: in-memory, database".into());
            Err(err)
        }
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stageflow_api={},audit={},tower_http=debug", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; using defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("storage_backend", DEFAULT_STORAGE_BACKEND)?
        .set_default("database_url", "sqlite://stageflow.db?mode=rwc")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
