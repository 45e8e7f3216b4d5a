//! Request Builder
//!
//! Pure functions turning a model config, a query and [`CallOptions`] into a
//! protocol-correct body and header set. Same inputs always produce the same
//! request.
//!
//! Body shapes:
//! - `openai`: `{model, messages: [{role: "user", content}], stream}`
//! - `dify`: `{inputs, query, response_mode, user, conversation_id, temperature}`
//!   plus `model: "contract"` for contract models
//! - `hkgai`: the dify shape without the `model` override

pub mod contract;
pub mod headers;

use reqwest::header::HeaderMap;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::config::AdapterConfig;
use crate::error::LlmError;
use crate::registry::{ModelConfig, ResolvedModel};
use crate::types::{ApiFormat, CallOptions};
pub use contract::compose_contract_query;
pub use headers::HttpHeaderBuilder;

/// Fully prepared request for one call.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
    pub stream: bool,
}

/// Build the request for `resolved` in streaming or blocking mode.
pub fn build_request(
    resolved: &ResolvedModel,
    query: &str,
    opts: &CallOptions,
    stream: bool,
    adapter: &AdapterConfig,
) -> Result<BuiltRequest, LlmError> {
    let mut headers = HttpHeaderBuilder::new()
        .with_json_content_type()
        .with_bearer_auth(resolved.api_key.expose_secret())?
        .with_headers(&adapter.branding_headers)?;
    if stream {
        headers = headers.with_event_stream_accept();
    }

    Ok(BuiltRequest {
        url: resolved.config.url(),
        headers: headers.build(),
        body: build_body(&resolved.config, query, opts, stream, &adapter.user_id),
        stream,
    })
}

/// Build the JSON body in the model's request format.
pub fn build_body(
    model: &ModelConfig,
    query: &str,
    opts: &CallOptions,
    stream: bool,
    user_id: &str,
) -> Value {
    let query = effective_query(model, query, opts);

    match model.request_format {
        ApiFormat::OpenAi => json!({
            "model": model.api_model,
            "messages": [{ "role": "user", "content": openai_content(&query, opts) }],
            "stream": stream,
        }),
        ApiFormat::Dify | ApiFormat::Hkgai => {
            if !opts.images.is_empty() {
                tracing::debug!(
                    target: "hkgai_llm::request",
                    model_id = %model.model_id,
                    images = opts.images.len(),
                    "image attachments are not sent in {} bodies",
                    model.request_format
                );
            }
            let inputs = if model.is_contract_model {
                json!({ "doc": [] })
            } else {
                json!({})
            };
            let mut body = json!({
                "inputs": inputs,
                "query": query,
                "response_mode": if stream { "streaming" } else { "blocking" },
                "user": user_id,
                "conversation_id": "",
                "temperature": opts.temperature.unwrap_or(model.default_temperature),
            });
            if model.request_format == ApiFormat::Dify && model.is_contract_model {
                body["model"] = json!("contract");
            }
            body
        }
    }
}

fn effective_query(model: &ModelConfig, query: &str, opts: &CallOptions) -> String {
    match opts.document_content.as_deref() {
        Some(doc) if model.is_contract_model && !doc.trim().is_empty() => {
            compose_contract_query(doc, query)
        }
        Some(_) if !model.is_contract_model => {
            tracing::debug!(
                target: "hkgai_llm::request",
                model_id = %model.model_id,
                "document content ignored for non-contract model"
            );
            query.to_string()
        }
        _ => query.to_string(),
    }
}

fn openai_content(query: &str, opts: &CallOptions) -> Value {
    if opts.images.is_empty() {
        return json!(query);
    }
    let mut parts = vec![json!({ "type": "text", "text": query })];
    parts.extend(
        opts.images
            .iter()
            .map(|image| json!({ "type": "image_url", "image_url": { "url": image.url } })),
    );
    Value::Array(parts)
}
