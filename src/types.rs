//! Core data types shared by the builder, normalizer, parser and adapter.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LlmError;

/// Free-form metadata attached to responses and chunks.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Wire protocol family spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// `/v1/chat/completions` style.
    OpenAi,
    /// Dify `chat-messages` style.
    Dify,
    /// HKGAI dialect of the Dify shape.
    Hkgai,
}

impl ApiFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Dify => "dify",
            Self::Hkgai => "hkgai",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiFormat {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "dify" => Ok(Self::Dify),
            "hkgai" => Ok(Self::Hkgai),
            other => Err(LlmError::ConfigurationError(format!(
                "Unknown api format '{other}'. Valid options: openai, dify, hkgai"
            ))),
        }
    }
}

/// Token usage reported by a backend.
///
/// Kept as `Option<ModelUsage>` on responses: `None` means the backend did not
/// report usage, which is different from zero usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Aggregated answer of one logical call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Never empty for a completed call: fallback text is substituted on failure.
    pub content: String,
    pub usage: Option<ModelUsage>,
    pub metadata: Metadata,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            metadata: Metadata::new(),
        }
    }

    /// Whether the content is synthesized fallback text.
    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get("fallback")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// One increment of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    /// Set on exactly one chunk per completed stream.
    pub is_last: bool,
    pub metadata: Metadata,
}

impl StreamChunk {
    pub fn new(content: impl Into<String>, is_last: bool) -> Self {
        Self {
            content: content.into(),
            is_last,
            metadata: Metadata::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get("fallback")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Image attached to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// `https://` URL or `data:` URL.
    pub url: String,
}

impl ImageAttachment {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Encode raw image bytes as a `data:` URL, sniffing the mime type.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mime = infer::get(bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            url: format!("data:{mime};base64,{encoded}"),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Overrides the model's default temperature.
    pub temperature: Option<f64>,
    /// Document text for contract models.
    pub document_content: Option<String>,
    pub images: Vec<ImageAttachment>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_document(mut self, content: impl Into<String>) -> Self {
        self.document_content = Some(content.into());
        self
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }
}
