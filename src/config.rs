use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_API_BASE_URL: &str = "http://localhost:8001";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_STORE: &str = "Store A";
const CONFIG_DIR: &str = "config";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;
const DEFAULT_REFRESH_LEAD_SECS: u64 = 60;
const DEFAULT_FILTER_DEBOUNCE_MS: u64 = 500;
const DEFAULT_STATUS_DISMISS_SECS: u64 = 6;

/// Shortcut variable for the backend host, checked after the `APP__` layer.
pub const API_URL_ENV: &str = "FORECASTAI_API_URL";

/// Client configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the forecasting backend
    #[validate(url)]
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Assumed access token lifetime when the token carries no `exp` claim
    #[validate(range(min = 60))]
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,

    /// How long before expiry the scheduled refresh fires
    #[serde(default = "default_refresh_lead_secs")]
    pub refresh_lead_secs: u64,

    /// Quiet period for date filter edits
    #[validate(range(max = 10000))]
    #[serde(default = "default_filter_debounce_ms")]
    pub filter_debounce_ms: u64,

    /// Lifetime of status banners
    #[serde(default = "default_status_dismiss_secs")]
    pub status_dismiss_secs: u64,

    /// Where the token cache lives; in-memory only when unset
    #[serde(default)]
    pub session_file: Option<PathBuf>,

    /// Store used when the user does not pick one
    #[serde(default = "default_store")]
    pub default_store: String,

    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates a configuration pointing at `api_base_url` with every other value defaulted
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout_secs: default_request_timeout_secs(),
            token_lifetime_secs: default_token_lifetime_secs(),
            refresh_lead_secs: default_refresh_lead_secs(),
            filter_debounce_ms: default_filter_debounce_ms(),
            status_dismiss_secs: default_status_dismiss_secs(),
            session_file: None,
            default_store: default_store(),
            environment: default_env(),
            log_level: default_log_level(),
            log_json: false,
        }
    }

    /// Base URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_secs)
    }

    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }

    pub fn status_dismiss(&self) -> Duration {
        Duration::from_secs(self.status_dismiss_secs)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Local backends are fine in development, a likely mistake elsewhere
    pub fn points_at_localhost(&self) -> bool {
        url::Url::parse(&self.api_base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == "localhost" || h == "127.0.0.1"))
            .unwrap_or(false)
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

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_token_lifetime_secs() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

fn default_refresh_lead_secs() -> u64 {
    DEFAULT_REFRESH_LEAD_SECS
}

fn default_filter_debounce_ms() -> u64 {
    DEFAULT_FILTER_DEBOUNCE_MS
}

fn default_status_dismiss_secs() -> u64 {
    DEFAULT_STATUS_DISMISS_SECS
}

fn default_store() -> String {
    DEFAULT_STORE.to_string()
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("forecastai_client={},forecastai={}", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Loads client configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `config/default.toml`
/// 3. `config/{RUN_ENV}.toml`
/// 4. Environment variables (`APP__*`)
/// 5. `FORECASTAI_API_URL` for the backend host
pub fn load_config() -> Result<ClientConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with an explicit config directory
pub fn load_config_from(config_dir: &Path) -> Result<ClientConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let mut builder = Config::builder()
        .set_default("api_base_url", DEFAULT_API_BASE_URL)?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    if let Ok(url) = env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            builder = builder.set_override("api_base_url", url)?;
        }
    }

    let client_config: ClientConfig = builder.build()?.try_deserialize()?;

    client_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if client_config.is_production() && client_config.points_at_localhost() {
        tracing::warn!(
            "api_base_url is not set for production; the client is using {} and will fail for remote users",
            client_config.api_base_url
        );
    }

    info!("Configuration loaded successfully");
    Ok(client_config)
}
