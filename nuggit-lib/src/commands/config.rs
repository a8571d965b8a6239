use crate::Result;
use crate::github::{CircuitBreakerConfig, DEFAULT_API_URL, DEFAULT_REFRESH_INTERVAL, FetchConfig, RetryConfig};
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err, bail};
use serde::Deserialize;
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "nuggit.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubSettings,

    /// Retry policy for the primary repository request
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retry policy for secondary attribute requests
    #[serde(default = "RetryConfig::secondary")]
    pub secondary_retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubSettings {
    pub api_url: String,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Minimum time between two queries of the quota endpoint
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    pub database: Option<Utf8PathBuf>,
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `nuggit.toml` in the current directory is used when present.
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading nuggit configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = Utf8PathBuf::from(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading nuggit configuration file '{path}'")),
            }
        };

        Self::parse(&text).map_err(|e| app_err!("loading configuration file '{final_path}': {e}"))
    }

    /// Parse and validate configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).into_app_err("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().map_err(|e| app_err!("invalid [retry] section: {e}"))?;
        self.secondary_retry.validate().map_err(|e| app_err!("invalid [secondary_retry] section: {e}"))?;
        self.circuit_breaker.validate().map_err(|e| app_err!("invalid [circuit_breaker] section: {e}"))?;

        if self.github.api_url.trim().is_empty() {
            bail!("github.api_url must not be empty");
        }

        if self.github.request_timeout.is_zero() || self.github.connect_timeout.is_zero() {
            bail!("github timeouts must be greater than zero");
        }

        if self.rate_limit.refresh_interval.is_zero() {
            bail!("rate_limit.refresh_interval must be greater than zero");
        }

        Ok(())
    }

    /// The retry and breaker settings used when fetching repositories
    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            retry: self.retry.clone(),
            secondary_retry: self.secondary_retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
