//! Built-in model definitions.
//!
//! Static part of the registry. Base URLs and keys are resolved against the
//! environment once, when the registry is built.

use crate::types::ApiFormat;

/// Default base URL for HKGAI hosted models.
pub const DEFAULT_HKGAI_BASE_URL: &str = "https://dify.hkgai.net";
/// Variable overriding [`DEFAULT_HKGAI_BASE_URL`] for every HKGAI model.
pub const ENV_DEFAULT_BASE_URL: &str = "HKGAI_BASE_URL";
/// Key used when a model specific key is not set.
pub const ENV_DEFAULT_API_KEY: &str = "HKGAI_API_KEY";

const DIFY_ENDPOINT: &str = "/v1/chat-messages";
const OPENAI_ENDPOINT: &str = "/v1/chat/completions";

/// Static description of one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelDefinition {
    pub model_id: &'static str,
    pub provider_key: &'static str,
    /// Name sent in the `model` field of OpenAI bodies.
    pub api_model: &'static str,
    pub default_base_url: &'static str,
    /// Per-model base URL override.
    pub base_url_env_var: &'static str,
    /// Whether the crate-wide [`ENV_DEFAULT_BASE_URL`] applies.
    pub uses_default_base_url: bool,
    pub endpoint: &'static str,
    pub request_format: ApiFormat,
    pub response_format: ApiFormat,
    pub supports_streaming: bool,
    pub requires_streaming: bool,
    pub is_rag_model: bool,
    pub is_contract_model: bool,
    pub default_temperature: f64,
    pub api_key_env_var: &'static str,
}

const fn dify_app(
    model_id: &'static str,
    base_url_env_var: &'static str,
    api_key_env_var: &'static str,
) -> ModelDefinition {
    ModelDefinition {
        model_id,
        provider_key: "hkgai",
        api_model: model_id,
        default_base_url: DEFAULT_HKGAI_BASE_URL,
        base_url_env_var,
        uses_default_base_url: true,
        endpoint: DIFY_ENDPOINT,
        request_format: ApiFormat::Dify,
        response_format: ApiFormat::Dify,
        supports_streaming: true,
        requires_streaming: false,
        is_rag_model: false,
        is_contract_model: false,
        default_temperature: 0.7,
        api_key_env_var,
    }
}

pub const BUILTIN_MODELS: &[ModelDefinition] = &[
    dify_app(
        "hkgai/searchentry",
        "HKGAI_SEARCHENTRY_BASE_URL",
        "HKGAI_SEARCHENTRY_API_KEY",
    ),
    dify_app(
        "hkgai/missinginfo",
        "HKGAI_MISSINGINFO_BASE_URL",
        "HKGAI_MISSINGINFO_API_KEY",
    ),
    dify_app(
        "hkgai/timeline",
        "HKGAI_TIMELINE_BASE_URL",
        "HKGAI_TIMELINE_API_KEY",
    ),
    ModelDefinition {
        request_format: ApiFormat::Hkgai,
        response_format: ApiFormat::Hkgai,
        ..dify_app(
            "hkgai/general",
            "HKGAI_GENERAL_BASE_URL",
            "HKGAI_GENERAL_API_KEY",
        )
    },
    // The RAG pipeline only emits its answer through `message` events.
    ModelDefinition {
        default_base_url: "https://ragpipeline.hkgai.net",
        uses_default_base_url: false,
        request_format: ApiFormat::Hkgai,
        response_format: ApiFormat::Hkgai,
        requires_streaming: true,
        is_rag_model: true,
        default_temperature: 0.3,
        ..dify_app("hkgai/rag", "HKGAI_RAG_BASE_URL", "HKGAI_RAG_API_KEY")
    },
    ModelDefinition {
        is_contract_model: true,
        default_temperature: 0.2,
        ..dify_app(
            "hkgai/contract",
            "HKGAI_CONTRACT_BASE_URL",
            "HKGAI_CONTRACT_API_KEY",
        )
    },
    OPENAI_GPT_4O_MINI,
    ModelDefinition {
        model_id: "openai/gpt-4o",
        api_model: "gpt-4o",
        ..OPENAI_GPT_4O_MINI
    },
];

const OPENAI_GPT_4O_MINI: ModelDefinition = ModelDefinition {
    model_id: "openai/gpt-4o-mini",
    provider_key: "openai",
    api_model: "gpt-4o-mini",
    default_base_url: "https://api.openai.com",
    base_url_env_var: "OPENAI_BASE_URL",
    uses_default_base_url: false,
    endpoint: OPENAI_ENDPOINT,
    request_format: ApiFormat::OpenAi,
    response_format: ApiFormat::OpenAi,
    supports_streaming: true,
    requires_streaming: false,
    is_rag_model: false,
    is_contract_model: false,
    default_temperature: 0.7,
    api_key_env_var: "OPENAI_API_KEY",
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_ids_are_unique() {
        let ids: HashSet<_> = BUILTIN_MODELS.iter().map(|d| d.model_id).collect();
        assert_eq!(ids.len(), BUILTIN_MODELS.len());
    }

    #[test]
    fn streaming_requirement_implies_support() {
        for def in BUILTIN_MODELS {
            assert!(
                !def.requires_streaming || def.supports_streaming,
                "{}",
                def.model_id
            );
        }
    }
}
