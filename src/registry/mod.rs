//! Model Configuration Registry
//!
//! Maps a model id to its protocol family and connection parameters. The
//! registry is built once (from [`definitions::BUILTIN_MODELS`] plus the
//! environment, or explicitly through [`RegistryBuilder`]) and is immutable
//! afterwards, so it can be shared across tasks behind an `Arc` without locks.
//!
//! Lookups never fail: unknown ids yield `None`/`false`. Turning a missing
//! entry into an error is the job of [`ModelResolver::resolve`].

pub mod definitions;

use reqwest::Url;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EnvSource, ProcessEnv};
use crate::error::LlmError;
use crate::types::ApiFormat;
use definitions::{BUILTIN_MODELS, ENV_DEFAULT_API_KEY, ENV_DEFAULT_BASE_URL, ModelDefinition};

/// Connection and protocol parameters of one logical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub provider_key: String,
    /// Name sent in the `model` field of OpenAI bodies.
    pub api_model: String,
    pub base_url: String,
    pub endpoint: String,
    pub request_format: ApiFormat,
    pub response_format: ApiFormat,
    pub supports_streaming: bool,
    pub requires_streaming: bool,
    pub is_rag_model: bool,
    pub is_contract_model: bool,
    pub default_temperature: f64,
    pub api_key_env_var: String,
}

impl ModelConfig {
    /// A streaming capable model speaking `format` for both directions.
    pub fn new(
        model_id: impl Into<String>,
        format: ApiFormat,
        base_url: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let model_id = model_id.into();
        let provider_key = model_id
            .split_once('/')
            .map(|(provider, _)| provider.to_string())
            .unwrap_or_else(|| model_id.clone());
        Self {
            api_model: model_id.clone(),
            api_key_env_var: format!("{}_API_KEY", provider_key.to_uppercase()),
            provider_key,
            model_id,
            base_url: base_url.into(),
            endpoint: endpoint.into(),
            request_format: format,
            response_format: format,
            supports_streaming: true,
            requires_streaming: false,
            is_rag_model: false,
            is_contract_model: false,
            default_temperature: 0.7,
        }
    }

    pub(crate) fn from_definition(def: &ModelDefinition, base_url: String) -> Self {
        Self {
            model_id: def.model_id.to_string(),
            provider_key: def.provider_key.to_string(),
            api_model: def.api_model.to_string(),
            base_url,
            endpoint: def.endpoint.to_string(),
            request_format: def.request_format,
            response_format: def.response_format,
            supports_streaming: def.supports_streaming,
            requires_streaming: def.requires_streaming,
            is_rag_model: def.is_rag_model,
            is_contract_model: def.is_contract_model,
            default_temperature: def.default_temperature,
            api_key_env_var: def.api_key_env_var.to_string(),
        }
    }

    /// Set streaming support and requirement.
    pub const fn with_streaming(mut self, supports: bool, requires: bool) -> Self {
        self.supports_streaming = supports;
        self.requires_streaming = requires;
        self
    }

    /// Mark as a RAG model, which implies mandatory streaming.
    pub const fn rag(mut self) -> Self {
        self.is_rag_model = true;
        self.supports_streaming = true;
        self.requires_streaming = true;
        self
    }

    pub const fn contract(mut self) -> Self {
        self.is_contract_model = true;
        self
    }

    pub fn with_api_model(mut self, api_model: impl Into<String>) -> Self {
        self.api_model = api_model.into();
        self
    }

    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub const fn with_response_format(mut self, format: ApiFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_api_key_env_var(mut self, var: impl Into<String>) -> Self {
        self.api_key_env_var = var.into();
        self
    }

    /// Full request URL, `{base_url}{endpoint}` without a doubled slash.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    fn validate(&self) -> Result<(), LlmError> {
        if self.model_id.trim().is_empty() {
            return Err(LlmError::ConfigurationError(
                "model id must not be empty".to_string(),
            ));
        }
        if self.requires_streaming && !self.supports_streaming {
            return Err(LlmError::ConfigurationError(format!(
                "model {} requires streaming but does not support it",
                self.model_id
            )));
        }
        if !self.endpoint.starts_with('/') {
            return Err(LlmError::ConfigurationError(format!(
                "endpoint of model {} must start with '/', got '{}'",
                self.model_id, self.endpoint
            )));
        }
        Url::parse(&self.base_url).map_err(|e| {
            LlmError::ConfigurationError(format!(
                "invalid base URL '{}' for model {}: {e}",
                self.base_url, self.model_id
            ))
        })?;
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(LlmError::ConfigurationError(format!(
                "default temperature of model {} must be within 0.0..=2.0",
                self.model_id
            )));
        }
        Ok(())
    }
}

/// Everything the adapter needs to issue a request for one model.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub config: Arc<ModelConfig>,
    pub api_key: SecretString,
}

/// Read-only model lookup injected into the adapter.
pub trait ModelResolver: Send + Sync {
    /// Resolve config and credential, failing with a configuration error.
    fn resolve(&self, model_id: &str) -> Result<ResolvedModel, LlmError>;

    /// Whether non-streaming calls are forbidden; `false` for unknown models.
    fn requires_streaming(&self, model_id: &str) -> bool;
}

/// Immutable map of model configs and their credentials.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelConfig>>,
    api_keys: HashMap<String, SecretString>,
    default_api_key: Option<SecretString>,
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Built-in models resolved against the process environment.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_env_source(&ProcessEnv)
    }

    /// Built-in models resolved against `env`.
    pub fn from_env_source(env: &dyn EnvSource) -> Result<Self, LlmError> {
        let default_base_url = env.var(ENV_DEFAULT_BASE_URL);
        let mut builder = Self::builder();

        for def in BUILTIN_MODELS {
            let base_url = env
                .var(def.base_url_env_var)
                .or_else(|| {
                    def.uses_default_base_url
                        .then(|| default_base_url.clone())
                        .flatten()
                })
                .unwrap_or_else(|| def.default_base_url.to_string());
            builder = builder.model(ModelConfig::from_definition(def, base_url));
            if let Some(key) = env.var(def.api_key_env_var) {
                builder = builder.api_key(def.model_id, key);
            }
        }
        if let Some(key) = env.var(ENV_DEFAULT_API_KEY) {
            builder = builder.default_api_key(key);
        }

        let registry = builder.build()?;
        tracing::debug!(
            target: "hkgai_llm::registry",
            models = registry.models.len(),
            keyed = registry.api_keys.len(),
            "model registry initialised"
        );
        Ok(registry)
    }

    pub fn get_config(&self, model_id: &str) -> Option<Arc<ModelConfig>> {
        self.models.get(model_id).cloned()
    }

    /// Model specific key, else the default key.
    pub fn get_api_key(&self, model_id: &str) -> Option<SecretString> {
        self.api_keys
            .get(model_id)
            .or(self.default_api_key.as_ref())
            .cloned()
    }

    pub fn requires_streaming(&self, model_id: &str) -> bool {
        self.models
            .get(model_id)
            .is_some_and(|config| config.requires_streaming)
    }

    /// Registered model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ModelResolver for ModelRegistry {
    fn resolve(&self, model_id: &str) -> Result<ResolvedModel, LlmError> {
        let config = self
            .get_config(model_id)
            .ok_or_else(|| LlmError::ModelNotConfigured(model_id.to_string()))?;
        let api_key = self
            .get_api_key(model_id)
            .ok_or_else(|| LlmError::MissingApiKey {
                model_id: model_id.to_string(),
                env_var: config.api_key_env_var.clone(),
            })?;
        Ok(ResolvedModel { config, api_key })
    }

    fn requires_streaming(&self, model_id: &str) -> bool {
        ModelRegistry::requires_streaming(self, model_id)
    }
}

/// Builder for [`ModelRegistry`]; validation happens in [`RegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelConfig>,
    api_keys: HashMap<String, SecretString>,
    default_api_key: Option<SecretString>,
}

impl RegistryBuilder {
    pub fn model(mut self, config: ModelConfig) -> Self {
        self.models.push(config);
        self
    }

    pub fn api_key(mut self, model_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys
            .insert(model_id.into(), SecretString::from(key.into()));
        self
    }

    pub fn default_api_key(mut self, key: impl Into<String>) -> Self {
        self.default_api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn build(self) -> Result<ModelRegistry, LlmError> {
        let mut models = HashMap::with_capacity(self.models.len());
        for config in self.models {
            config.validate()?;
            let id = config.model_id.clone();
            if models.insert(id.clone(), Arc::new(config)).is_some() {
                return Err(LlmError::ConfigurationError(format!(
                    "model {id} is registered twice"
                )));
            }
        }
        Ok(ModelRegistry {
            models,
            api_keys: self.api_keys,
            default_api_key: self.default_api_key,
        })
    }
}
