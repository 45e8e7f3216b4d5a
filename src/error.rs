//! Error Handling Module
//!
//! Errors are split in two groups:
//! - hard errors (configuration, protocol contract, companion process) that are
//!   always returned to the caller, and
//! - soft errors (transport, parse, timeout) that the adapter converts into
//!   fallback text instead of surfacing them.
//!
//! ```rust,ignore
//! use hkgai_llm::error::{FailureKind, LlmError};
//!
//! let error = LlmError::api_error(500, "boom");
//! assert_eq!(error.failure_kind(), Some(FailureKind::Http));
//! assert!(!error.is_configuration_error());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type shared by every component of the crate.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Malformed registry entry or invalid client setup.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The requested model id is not present in the registry.
    #[error("Model not configured: {0}")]
    ModelNotConfigured(String),

    /// Neither the model specific nor the default API key is set.
    #[error("Missing API key for model {model_id} (set {env_var})")]
    MissingApiKey { model_id: String, env_var: String },

    /// The caller used an operation the model does not allow.
    #[error("Protocol violation for model {model_id}: {reason}")]
    ProtocolViolation { model_id: String, reason: String },

    /// Connection level failure (refused, reset, TLS, DNS).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The backend answered with a non-2xx status.
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// A payload could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("JSON error: {0}")]
    JsonError(String),

    /// The wall-clock budget of a call elapsed.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The byte stream broke after the response headers were received.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// The backend produced no usable content.
    #[error("Empty answer: {0}")]
    EmptyAnswer(String),

    /// The caller aborted the call.
    #[error("Cancelled")]
    Cancelled,

    /// A local companion process could not be started.
    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Fallback class of a soft failure.
///
/// Each class has its own apology wording, see [`crate::fallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Http,
    Unparsable,
    EmptyAnswer,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Http => "http_error",
            Self::Unparsable => "unparsable_payload",
            Self::EmptyAnswer => "empty_answer",
        }
    }
}

impl LlmError {
    /// Create an API error from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Whether this error points at a deployment or programming mistake.
    ///
    /// These are never converted into fallback text.
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_)
                | Self::ModelNotConfigured(_)
                | Self::MissingApiKey { .. }
                | Self::ProtocolViolation { .. }
        )
    }

    /// Classify a soft failure, `None` for errors that must reach the caller.
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::TimeoutError(_) => Some(FailureKind::Timeout),
            Self::HttpError(_) | Self::ApiError { .. } | Self::StreamError(_) => {
                Some(FailureKind::Http)
            }
            Self::ParseError(_) | Self::JsonError(_) => Some(FailureKind::Unparsable),
            Self::EmptyAnswer(_) => Some(FailureKind::EmptyAnswer),
            Self::ConfigurationError(_)
            | Self::ModelNotConfigured(_)
            | Self::MissingApiKey { .. }
            | Self::ProtocolViolation { .. }
            | Self::Cancelled
            | Self::ProcessError(_)
            | Self::IoError(_) => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimeoutError(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
