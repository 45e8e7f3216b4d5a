//! Shared test support: a scripted, recording `HttpTransport` and small
//! builders for registries, adapters and SSE bodies.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use hkgai_llm::config::AdapterConfig;
use hkgai_llm::error::LlmError;
use hkgai_llm::registry::{ModelConfig, ModelRegistry};
use hkgai_llm::transport::{
    HttpTransport, HttpTransportRequest, HttpTransportResponse, HttpTransportStreamBody,
    HttpTransportStreamResponse,
};
use hkgai_llm::types::ApiFormat;
use hkgai_llm::ModelAdapter;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

pub const TEST_KEY: &str = "test-key";
pub const BASE_URL: &str = "http://backend.test";

/// What the transport answers with for one request.
pub enum Scripted {
    /// Complete body with a status.
    Body { status: u16, body: Vec<u8> },
    /// Successful stream delivered in the given pieces.
    Chunks(Vec<Vec<u8>>),
    /// Successful stream that delivers the pieces and then stalls forever.
    ChunksThenStall(Vec<Vec<u8>>),
    /// Like `ChunksThenStall`, raising `released` when the body is dropped.
    Guarded {
        chunks: Vec<Vec<u8>>,
        released: Arc<AtomicBool>,
    },
    /// Never answers.
    Stall,
    /// Fails before any response.
    Fail(LlmError),
}

impl Scripted {
    pub fn json(body: serde_json::Value) -> Self {
        Self::Body {
            status: 200,
            body: serde_json::to_vec(&body).expect("serialize"),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Body {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn sse(body: &str) -> Self {
        Self::Chunks(vec![body.as_bytes().to_vec()])
    }
}

#[derive(Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<HttpTransportRequest>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
}

impl RecordingTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(Mutex::new(script.into())),
        }
    }

    pub fn calls(&self) -> Vec<HttpTransportRequest> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn next(&self, request: HttpTransportRequest) -> Scripted {
        self.calls.lock().expect("lock").push(request);
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .expect("unexpected request: script exhausted")
    }
}

fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn execute_json(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportResponse, LlmError> {
        match self.next(request) {
            Scripted::Body { status, body } => Ok(HttpTransportResponse {
                status,
                headers: HeaderMap::new(),
                body,
            }),
            Scripted::Stall => futures_util::future::pending().await,
            Scripted::Fail(e) => Err(e),
            Scripted::Chunks(_) | Scripted::ChunksThenStall(_) | Scripted::Guarded { .. } => {
                panic!("stream scripted for a blocking request")
            }
        }
    }

    async fn execute_stream(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportStreamResponse, LlmError> {
        let (status, body) = match self.next(request) {
            Scripted::Body { status, body } => (status, HttpTransportStreamBody::from_bytes(body)),
            Scripted::Chunks(chunks) => (200, HttpTransportStreamBody::from_chunks(chunks)),
            Scripted::ChunksThenStall(chunks) => {
                (200, HttpTransportStreamBody::from_stream(stalling(chunks)))
            }
            Scripted::Guarded { chunks, released } => {
                let guarded = ReleaseGuard {
                    inner: Box::pin(stalling(chunks)),
                    released,
                };
                (200, HttpTransportStreamBody::from_stream(guarded))
            }
            Scripted::Stall => futures_util::future::pending().await,
            Scripted::Fail(e) => return Err(e),
        };
        Ok(HttpTransportStreamResponse {
            status,
            headers: sse_headers(),
            body,
        })
    }
}

fn stalling(chunks: Vec<Vec<u8>>) -> impl futures_util::Stream<Item = Result<Bytes, LlmError>> {
    let items = chunks.into_iter().map(|c| Ok(Bytes::from(c)));
    futures_util::stream::iter(items)
        .chain(futures_util::stream::pending::<Result<Bytes, LlmError>>())
}

/// Body wrapper that records when the adapter lets go of the connection.
struct ReleaseGuard {
    inner: Pin<Box<dyn futures_util::Stream<Item = Result<Bytes, LlmError>> + Send>>,
    released: Arc<AtomicBool>,
}

impl futures_util::Stream for ReleaseGuard {
    type Item = Result<Bytes, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// `data:` lines for each payload, each followed by a blank line.
pub fn sse(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|p| format!("data: {p}\n\n"))
        .collect()
}

pub fn hkgai_model(id: &str) -> ModelConfig {
    ModelConfig::new(id, ApiFormat::Hkgai, BASE_URL, "/v1/chat-messages")
}

pub fn dify_model(id: &str) -> ModelConfig {
    ModelConfig::new(id, ApiFormat::Dify, BASE_URL, "/v1/chat-messages")
}

pub fn openai_model(id: &str) -> ModelConfig {
    ModelConfig::new(id, ApiFormat::OpenAi, BASE_URL, "/v1/chat/completions")
        .with_api_model("gpt-4o-mini")
}

pub fn registry(models: Vec<ModelConfig>) -> Arc<ModelRegistry> {
    let builder = models
        .into_iter()
        .fold(ModelRegistry::builder(), |builder, model| builder.model(model));
    Arc::new(builder.default_api_key(TEST_KEY).build().expect("valid registry"))
}

pub fn adapter(transport: &RecordingTransport, models: Vec<ModelConfig>) -> ModelAdapter {
    adapter_with_config(transport, models, AdapterConfig::default())
}

pub fn adapter_with_config(
    transport: &RecordingTransport,
    models: Vec<ModelConfig>,
    config: AdapterConfig,
) -> ModelAdapter {
    ModelAdapter::new(registry(models), Arc::new(transport.clone()), config)
}
