//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Binaries embedding it may call
//! [`init_from_env`] once at startup, or build a [`SubscriberConfig`] by hand.
//!
//! ```rust,ignore
//! let _guard = hkgai_llm::telemetry::init_subscriber(
//!     SubscriberConfig::builder().log_level(tracing::Level::DEBUG).build(),
//! )?;
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{EnvSource, ProcessEnv};
use crate::error::LlmError;

pub const ENV_LOG_LEVEL: &str = "HKGAI_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "HKGAI_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "HKGAI_LOG_FILE";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl FromStr for OutputFormat {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            other => Err(LlmError::ConfigurationError(format!(
                "Invalid log format: {other}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// Write to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Read `HKGAI_LOG_LEVEL`, `HKGAI_LOG_FORMAT` and `HKGAI_LOG_FILE`.
    pub fn from_env_source(env: &dyn EnvSource) -> Result<Self, LlmError> {
        let mut builder = Self::builder();
        if let Some(level) = env.var(ENV_LOG_LEVEL) {
            builder = builder.log_level_str(&level)?;
        }
        if let Some(format) = env.var(ENV_LOG_FORMAT) {
            builder = builder.output_format(format.parse()?);
        }
        if let Some(path) = env.var(ENV_LOG_FILE) {
            builder = builder.log_file(PathBuf::from(path));
        }
        Ok(builder.build())
    }
}

/// Builder for SubscriberConfig
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn log_level_str(mut self, level: &str) -> Result<Self, LlmError> {
        let level = tracing::Level::from_str(level.trim()).map_err(|_| {
            LlmError::ConfigurationError(format!(
                "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
            ))
        })?;
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            log_file: self.log_file,
        }
    }
}

/// Install the global subscriber.
///
/// Returns the appender guard when logging to a file; keep it alive for the
/// lifetime of the program. An already installed subscriber is left in place.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>, LlmError> {
    let level = config.log_level.as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_new(format!("hkgai_llm={level}"))
        .map_err(|e| LlmError::ConfigurationError(format!("Invalid log filter: {e}")))?;

    let (writer, guard) = match config.log_file.as_deref() {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    macro_rules! install {
        ($builder:expr) => {
            match writer {
                Some(writer) => $builder.with_writer(writer).with_ansi(false).try_init(),
                None => $builder.with_writer(std::io::stderr).try_init(),
            }
        };
    }

    let base = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let init_result = match config.output_format {
        OutputFormat::Json => install!(base.json().with_current_span(true)),
        OutputFormat::JsonCompact => install!(base.json().flatten_event(true)),
        OutputFormat::Text => install!(base.compact()),
    };

    match init_result {
        Ok(()) => Ok(guard),
        // Either the dispatcher or the `log` bridge is already installed.
        Err(e) if e.to_string().contains("already") => Ok(None),
        Err(e) => Err(LlmError::ConfigurationError(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Install the global subscriber configured from the process environment.
pub fn init_from_env() -> Result<Option<WorkerGuard>, LlmError> {
    init_subscriber(SubscriberConfig::from_env_source(&ProcessEnv)?)
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, LlmError> {
    let file_name = path.file_name().ok_or_else(|| {
        LlmError::ConfigurationError(format!("Log file path has no file name: {}", path.display()))
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(tracing_appender::rolling::never(dir, file_name))
}
