//! Adapter configuration
//!
//! Client-wide settings (time budgets, locale, request identity) plus the
//! [`EnvSource`] seam used by both this module and the model registry so that
//! tests never have to mutate the process environment.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::LlmError;
use crate::fallback::Locale;

pub const ENV_STREAM_TIMEOUT_SECS: &str = "HKGAI_STREAM_TIMEOUT_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "HKGAI_REQUEST_TIMEOUT_SECS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "HKGAI_CONNECT_TIMEOUT_SECS";
pub const ENV_LOCALE: &str = "HKGAI_LOCALE";
pub const ENV_USER_ID: &str = "HKGAI_USER_ID";

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_ID: &str = "refly-user";

/// Source of environment values.
pub trait EnvSource: Send + Sync {
    /// Return the value of `key`, `None` when unset or blank.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Settings shared by every call made through one adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Wall-clock budget of a streamed call, measured from the request.
    pub stream_timeout: Duration,
    /// Budget of a blocking call including the body read.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Language of fallback text.
    pub locale: Locale,
    /// Fixed `user` field of dify/hkgai bodies.
    pub user_id: String,
    /// Branding headers sent with every request.
    pub branding_headers: Vec<(String, String)>,
    /// Maximum characters of an error body written to logs.
    pub error_body_log_limit: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            locale: Locale::default(),
            user_id: DEFAULT_USER_ID.to_string(),
            branding_headers: vec![
                ("HTTP-Referer".to_string(), "https://refly.ai".to_string()),
                ("X-Title".to_string(), "Refly".to_string()),
            ],
            error_body_log_limit: 512,
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_env_source(&ProcessEnv)
    }

    /// Read overrides from `env`, keeping defaults for unset keys.
    pub fn from_env_source(env: &dyn EnvSource) -> Result<Self, LlmError> {
        let mut config = Self::default();

        if let Some(secs) = env.var(ENV_STREAM_TIMEOUT_SECS) {
            config.stream_timeout = parse_secs(ENV_STREAM_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = env.var(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(ENV_REQUEST_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = env.var(ENV_CONNECT_TIMEOUT_SECS) {
            config.connect_timeout = parse_secs(ENV_CONNECT_TIMEOUT_SECS, &secs)?;
        }
        if let Some(locale) = env.var(ENV_LOCALE) {
            config.locale = locale.parse()?;
        }
        if let Some(user) = env.var(ENV_USER_ID) {
            config.user_id = user;
        }

        Ok(config)
    }

    pub const fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub const fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Replace the branding headers.
    pub fn with_branding_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.branding_headers = headers;
        self
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, LlmError> {
    let secs: u64 = raw.trim().parse().map_err(|_| {
        LlmError::ConfigurationError(format!("{key} must be a whole number of seconds, got '{raw}'"))
    })?;
    if secs == 0 {
        return Err(LlmError::ConfigurationError(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(Duration::from_secs(secs))
}
