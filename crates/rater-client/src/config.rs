use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

pub mod env_vars {
    pub const API_URL: &str = "RATER_API_URL";
    pub const CONNECT_TIMEOUT_SECS: &str = "RATER_CONNECT_TIMEOUT_SECS";
    pub const REQUEST_TIMEOUT_SECS: &str = "RATER_REQUEST_TIMEOUT_SECS";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
    #[error("api url must start with http:// or https://, got {0:?}")]
    InvalidUrl(String),
}

/// Where the backend lives and how long to wait for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `RATER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup(env_vars::API_URL).filter(|u| !u.trim().is_empty()) {
            config = config.with_base_url(url)?;
        }
        if let Some(secs) = lookup(env_vars::CONNECT_TIMEOUT_SECS) {
            config.connect_timeout = parse_secs(env_vars::CONNECT_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = lookup(env_vars::REQUEST_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(env_vars::REQUEST_TIMEOUT_SECS, &secs)?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url));
        }
        self.base_url = trimmed.to_string();
        Ok(self)
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidSeconds {
            var,
            value: value.to_string(),
        })
}
