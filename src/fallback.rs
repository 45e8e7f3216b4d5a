//! Fallback text synthesis
//!
//! When a call fails softly the adapter answers with a short apology instead
//! of an error. Wording depends on the failure class, the locale and the kind
//! of model (retrieval, contract review, general chat). The original query is
//! quoted so the user can see which question went unanswered. Backend error
//! text is never included.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{FailureKind, LlmError};
use crate::registry::ModelConfig;
use crate::types::{Metadata, ModelResponse, StreamChunk};

/// Longest query excerpt quoted in fallback text, in characters.
pub const MAX_QUOTED_QUERY_CHARS: usize = 200;

/// Language of synthesized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Locale {
    #[serde(rename = "en")]
    En,
    #[default]
    #[serde(rename = "zh-Hans")]
    ZhHans,
    #[serde(rename = "zh-Hant")]
    ZhHant,
}

impl Locale {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::ZhHans => "zh-Hans",
            Self::ZhHant => "zh-Hant",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "en" | "en-us" | "en-gb" => Ok(Self::En),
            "zh-hans" | "zh-cn" | "zh" => Ok(Self::ZhHans),
            "zh-hant" | "zh-hk" | "zh-tw" => Ok(Self::ZhHant),
            other => Err(LlmError::ConfigurationError(format!(
                "Unknown locale '{other}'. Valid options: en, zh-Hans, zh-Hant"
            ))),
        }
    }
}

/// Kind of model, as far as the wording is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Rag,
    Contract,
    General,
}

impl ModelClass {
    pub fn of(model: &ModelConfig) -> Self {
        if model.is_rag_model {
            Self::Rag
        } else if model.is_contract_model {
            Self::Contract
        } else {
            Self::General
        }
    }
}

/// Synthesize the fallback sentence for `kind`.
pub fn fallback_text(kind: FailureKind, locale: Locale, class: ModelClass, query: &str) -> String {
    let quoted = quote(query);
    let subject = subject(locale, class);
    match locale {
        Locale::En => {
            let reason = match kind {
                FailureKind::Timeout => "took too long to respond",
                FailureKind::Http => "is temporarily unavailable",
                FailureKind::Unparsable => "returned a reply that could not be read",
                FailureKind::EmptyAnswer => "returned an empty answer",
            };
            format!(
                "Sorry, the {subject} {reason}, so your question \"{quoted}\" could not be answered. Please try again later."
            )
        }
        Locale::ZhHans => {
            let reason = match kind {
                FailureKind::Timeout => "响应超时",
                FailureKind::Http => "暂时无法访问",
                FailureKind::Unparsable => "返回了无法解析的内容",
                FailureKind::EmptyAnswer => "没有返回答案",
            };
            format!("抱歉，{subject}{reason}，暂时无法回答您的问题「{quoted}」。请稍后重试。")
        }
        Locale::ZhHant => {
            let reason = match kind {
                FailureKind::Timeout => "回應逾時",
                FailureKind::Http => "暫時無法存取",
                FailureKind::Unparsable => "傳回了無法解析的內容",
                FailureKind::EmptyAnswer => "沒有傳回答案",
            };
            format!("抱歉，{subject}{reason}，暫時無法回答您的問題「{quoted}」。請稍後重試。")
        }
    }
}

/// Metadata marking synthesized content.
pub fn fallback_metadata(kind: FailureKind) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("fallback".to_string(), Value::Bool(true));
    metadata.insert(
        "fallback_reason".to_string(),
        Value::String(kind.as_str().to_string()),
    );
    metadata
}

/// Fallback answer for a blocking call.
pub fn fallback_response(
    kind: FailureKind,
    locale: Locale,
    model: &ModelConfig,
    query: &str,
) -> ModelResponse {
    ModelResponse {
        content: fallback_text(kind, locale, ModelClass::of(model), query),
        usage: None,
        metadata: fallback_metadata(kind),
    }
}

/// Final fallback chunk for a stream that produced no content.
pub fn fallback_chunk(
    kind: FailureKind,
    locale: Locale,
    model: &ModelConfig,
    query: &str,
) -> StreamChunk {
    StreamChunk {
        content: fallback_text(kind, locale, ModelClass::of(model), query),
        is_last: true,
        metadata: fallback_metadata(kind),
    }
}

fn subject(locale: Locale, class: ModelClass) -> &'static str {
    match (locale, class) {
        (Locale::En, ModelClass::Rag) => "knowledge base service",
        (Locale::En, ModelClass::Contract) => "contract review service",
        (Locale::En, ModelClass::General) => "model service",
        (Locale::ZhHans, ModelClass::Rag) => "知识库检索服务",
        (Locale::ZhHans, ModelClass::Contract) => "合同审查服务",
        (Locale::ZhHans, ModelClass::General) => "模型服务",
        (Locale::ZhHant, ModelClass::Rag) => "知識庫檢索服務",
        (Locale::ZhHant, ModelClass::Contract) => "合約審查服務",
        (Locale::ZhHant, ModelClass::General) => "模型服務",
    }
}

// Collapse whitespace so multi-line queries stay on one line, and cap the
// excerpt length on a char boundary.
fn quote(query: &str) -> String {
    let flat = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_QUOTED_QUERY_CHARS {
        return flat;
    }
    let mut excerpt: String = flat.chars().take(MAX_QUOTED_QUERY_CHARS).collect();
    excerpt.push('…');
    excerpt
}
