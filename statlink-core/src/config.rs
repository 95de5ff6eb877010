//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/statlink/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/statlink/` (~/.config/statlink/)
//! - State/Logs: `$XDG_STATE_HOME/statlink/` (~/.local/state/statlink/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Monitoring server connection
    #[serde(default)]
    pub service: ServiceSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[service]` section as written in the config file.
///
/// Fields are optional here so that a partial file (or CLI overrides) can be
/// merged before validation. See [`ServiceConfig`] for the validated form.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSection {
    /// Monitoring server URL (`ws://`, `wss://`, `http://` or `https://`)
    pub endpoint: Option<String>,

    /// Bearer token sent in the upgrade request
    pub credential: Option<String>,

    /// Report interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Log application-level reporting failures
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            credential: None,
            interval_ms: default_interval_ms(),
            verbose: false,
        }
    }
}

impl ServiceSection {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("service.endpoint is required".to_string()));
        }
        if self.credential.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("service.credential is required".to_string()));
        }
        if self.interval_ms == 0 {
            return Err(Error::Config(
                "service.interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_interval_ms() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Validated, immutable settings of one monitoring client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    endpoint: Url,
    credential: String,
    interval: Duration,
    verbose: bool,
}

impl ServiceConfig {
    /// Default report interval
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    /// Build a config with the default interval and quiet failure logging.
    ///
    /// Fails if the endpoint is empty, unparsable or uses a scheme other than
    /// ws/wss/http/https, or if the credential is empty.
    pub fn new(endpoint: &str, credential: &str) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(Error::Config("endpoint is required".to_string()));
        }
        if credential.is_empty() {
            return Err(Error::Config("credential is required".to_string()));
        }

        let url = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;

        Ok(Self {
            endpoint: websocket_url(url)?,
            credential: credential.to_string(),
            interval: Self::DEFAULT_INTERVAL,
            verbose: false,
        })
    }

    /// Set the report interval. A zero interval is rejected.
    pub fn with_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("interval must be greater than 0".to_string()));
        }
        self.interval = interval;
        Ok(self)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// WebSocket URL of the monitoring server
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Steady-state report interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

impl TryFrom<&ServiceSection> for ServiceConfig {
    type Error = Error;

    fn try_from(section: &ServiceSection) -> Result<Self> {
        section.validate()?;
        let endpoint = section.endpoint.as_deref().unwrap_or_default();
        let credential = section.credential.as_deref().unwrap_or_default();

        Ok(ServiceConfig::new(endpoint, credential)?
            .with_interval(Duration::from_millis(section.interval_ms))?
            .with_verbose(section.verbose))
    }
}

/// Map http(s) endpoints onto ws(s); keep ws(s) as-is
fn websocket_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::Config(format!(
                "unsupported endpoint scheme {other:?} (expected ws, wss, http or https)"
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use {scheme} for endpoint {url}")))?;
    Ok(url)
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/statlink/config.toml` (~/.config/statlink/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("statlink").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/statlink/` (~/.local/state/statlink/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("statlink")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/statlink/statlink.log` (~/.local/state/statlink/statlink.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("statlink.log")
    }
}
