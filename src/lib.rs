//! # hkgai-llm - Multi-provider model adapter
//!
//! One client for three wire protocols: OpenAI-compatible chat completions,
//! Dify `chat-messages`, and the HKGAI dialect of the latter. Callers name a
//! model id and get text back, either as a stream of increments or as one
//! aggregated response.
//!
#![deny(unsafe_code)]

//! ## Failure model
//!
//! Misconfiguration (unknown model, missing key, a blocking call to a
//! streaming-only model) is returned as [`LlmError`]. Everything that goes
//! wrong on the wire (timeouts, error statuses, unreadable payloads, empty
//! answers) is answered with a short, localized fallback sentence instead,
//! marked with `fallback: true` in the metadata.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use hkgai_llm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let adapter = ModelAdapter::from_env()?;
//!
//!     let mut handle = adapter.stream("hkgai/general", "What is HKGAI?", &CallOptions::new())?;
//!     while let Some(chunk) = handle.stream.next().await {
//!         print!("{}", chunk.content);
//!     }
//!
//!     let answer = adapter
//!         .call("hkgai/searchentry", "latest policy address", &CallOptions::new())
//!         .await?;
//!     println!("{}", answer.content);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod companion;
pub mod config;
pub mod error;
pub mod fallback;
pub mod registry;
pub mod request;
pub mod response;
pub mod streaming;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod utils;

pub use client::{ExclusiveCaller, ModelAdapter};
pub use config::AdapterConfig;
pub use error::{FailureKind, LlmError};
pub use registry::{ModelConfig, ModelRegistry, ModelResolver};
pub use types::{ApiFormat, CallOptions, ModelResponse, ModelUsage, StreamChunk};

/// Commonly used types
pub mod prelude {
    pub use crate::client::{ExclusiveCaller, ModelAdapter};
    pub use crate::config::AdapterConfig;
    pub use crate::error::{FailureKind, LlmError};
    pub use crate::fallback::Locale;
    pub use crate::registry::{ModelConfig, ModelRegistry, ModelResolver};
    pub use crate::streaming::{ChunkStream, ChunkStreamHandle};
    pub use crate::transport::{HttpTransport, ReqwestTransport};
    pub use crate::types::{ApiFormat, CallOptions, ImageAttachment, ModelResponse, ModelUsage, StreamChunk};
    pub use crate::utils::cancel::CancelHandle;
}
