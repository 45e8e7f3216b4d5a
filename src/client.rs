//! Model Adapter
//!
//! Public entry point. Resolves the model, builds the request, runs it through
//! the transport under a time budget and turns every soft failure into
//! fallback text. Only configuration and protocol mistakes reach the caller
//! as errors.
//!
//! Stream lifecycle:
//! 1. the deadline is fixed right before the request is issued;
//! 2. frames are parsed as bytes arrive, one chunk is held back so the final
//!    one can be marked `is_last`;
//! 3. a stream that produced no content ends with exactly one fallback chunk;
//!    a stream that fails after content ends with its last real chunk marked
//!    `truncated`.

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::AdapterConfig;
use crate::error::{FailureKind, LlmError};
use crate::fallback::{fallback_chunk, fallback_response};
use crate::registry::{ModelConfig, ModelRegistry, ModelResolver, ResolvedModel};
use crate::request::{BuiltRequest, build_request};
use crate::response::{
    extract_content, extract_delta, extract_identifiers, extract_stream_error, extract_usage,
};
use crate::streaming::{ByteStream, ChunkStream, ChunkStreamHandle, frame_stream};
use crate::transport::{HttpRequestContext, HttpTransport, HttpTransportRequest, ReqwestTransport};
use crate::types::{CallOptions, Metadata, ModelResponse, ModelUsage, StreamChunk};
use crate::utils::cancel::{CallSlot, CancelHandle, make_cancellable_stream, with_cancel};

/// Multi-provider model adapter.
///
/// Cheap to clone; clones share the resolver, the transport and the config.
#[derive(Clone)]
pub struct ModelAdapter {
    resolver: Arc<dyn ModelResolver>,
    transport: Arc<dyn HttpTransport>,
    config: Arc<AdapterConfig>,
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelAdapter {
    pub fn new(
        resolver: Arc<dyn ModelResolver>,
        transport: Arc<dyn HttpTransport>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            resolver,
            transport,
            config: Arc::new(config),
        }
    }

    /// Registry, adapter settings and a reqwest transport, all from the
    /// process environment.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = AdapterConfig::from_env()?;
        let registry = ModelRegistry::from_env()?;
        let transport = ReqwestTransport::new(config.connect_timeout)?;
        Ok(Self::new(Arc::new(registry), Arc::new(transport), config))
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Whether `model_id` must be called through [`ModelAdapter::stream`].
    pub fn requires_streaming(&self, model_id: &str) -> bool {
        self.resolver.requires_streaming(model_id)
    }

    /// Non-streaming call.
    ///
    /// Fails with `ProtocolViolation` for streaming-only models, before any
    /// network traffic. Transport, parse, timeout and empty-answer failures
    /// resolve to fallback text.
    pub async fn call(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
    ) -> Result<ModelResponse, LlmError> {
        // Checked before resolution so a missing credential cannot mask it.
        if self.resolver.requires_streaming(model_id) {
            return Err(LlmError::ProtocolViolation {
                model_id: model_id.to_string(),
                reason: "model only answers in streaming mode; use stream() or stream_and_collect()"
                    .to_string(),
            });
        }
        let resolved = self.resolver.resolve(model_id)?;
        let request = build_request(&resolved, query, opts, false, &self.config)?;
        Ok(self.execute_blocking(&resolved, request, query).await)
    }

    /// Streaming call with its own cancel handle.
    ///
    /// No request is issued until the stream is first polled.
    pub fn stream(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
    ) -> Result<ChunkStreamHandle, LlmError> {
        let (stream, cancel) = make_cancellable_stream(self.chunk_stream(model_id, query, opts)?);
        Ok(ChunkStreamHandle { stream, cancel })
    }

    /// Streaming call observing an externally owned cancel handle.
    pub fn stream_with_cancel(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
        cancel: CancelHandle,
    ) -> Result<ChunkStream, LlmError> {
        Ok(with_cancel(self.chunk_stream(model_id, query, opts)?, cancel))
    }

    fn chunk_stream(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
    ) -> Result<ChunkStream, LlmError> {
        let resolved = self.resolver.resolve(model_id)?;
        let streaming = resolved.config.supports_streaming;
        let request = build_request(&resolved, query, opts, streaming, &self.config)?;
        let query = query.to_string();
        let this = self.clone();

        if streaming {
            return Ok(Box::pin(this.run_stream(resolved.config, request, query)));
        }
        Ok(Box::pin(async_stream::stream! {
            let response = this.execute_blocking(&resolved, request, &query).await;
            yield response_as_chunk(response);
        }))
    }

    /// Stream and aggregate into one response.
    ///
    /// The supported way to get a complete answer from a streaming-only model.
    pub async fn stream_and_collect(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
    ) -> Result<ModelResponse, LlmError> {
        let handle = self.stream(model_id, query, opts)?;
        Ok(Self::collect(handle.stream).await)
    }

    /// Aggregate a chunk stream into a response.
    ///
    /// Content is concatenated in order. Usage and metadata come from the
    /// final chunk.
    pub async fn collect(stream: ChunkStream) -> ModelResponse {
        collect_chunks(stream).await
    }

    async fn execute_blocking(
        &self,
        resolved: &ResolvedModel,
        request: BuiltRequest,
        query: &str,
    ) -> ModelResponse {
        let model = &resolved.config;
        let ctx = HttpRequestContext::new(&model.model_id, &request.url, false);
        let base = base_metadata(model, &ctx.request_id);

        let outcome = match tokio::time::timeout(
            self.config.request_timeout,
            self.fetch_json(model, transport_request(ctx, request)),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::TimeoutError(format!(
                "no response within {:?}",
                self.config.request_timeout
            ))),
        };

        match outcome {
            Ok(mut response) => {
                response.metadata.extend(base);
                response
            }
            Err(e) => {
                let kind = e.failure_kind().unwrap_or(FailureKind::Http);
                tracing::warn!(
                    target: "hkgai_llm::http",
                    model_id = %model.model_id,
                    reason = kind.as_str(),
                    error = %e,
                    "call failed, answering with fallback text"
                );
                let mut response = fallback_response(kind, self.config.locale, model, query);
                response.metadata.extend(base);
                response
            }
        }
    }

    async fn fetch_json(
        &self,
        model: &ModelConfig,
        request: HttpTransportRequest,
    ) -> Result<ModelResponse, LlmError> {
        let request_id = request.ctx.request_id.clone();
        let response = self.transport.execute_json(request).await?;
        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            let excerpt = truncate_for_log(&body, self.config.error_body_log_limit);
            tracing::warn!(
                target: "hkgai_llm::http",
                request_id = %request_id,
                model_id = %model.model_id,
                status = response.status,
                body = %excerpt,
                "backend returned an error status"
            );
            return Err(LlmError::api_error(response.status, excerpt));
        }

        let json: Value = serde_json::from_slice(&response.body)?;
        let content = extract_content(model.response_format, &json);
        if content.is_empty() {
            return Err(LlmError::EmptyAnswer(format!(
                "no content in {} response",
                model.response_format
            )));
        }

        Ok(ModelResponse {
            content,
            usage: extract_usage(model.response_format, &json),
            metadata: extract_identifiers(&json),
        })
    }

    fn run_stream(
        self,
        model: Arc<ModelConfig>,
        request: BuiltRequest,
        query: String,
    ) -> impl Stream<Item = StreamChunk> + Send {
        async_stream::stream! {
            let deadline = Instant::now() + self.config.stream_timeout;
            let ctx = HttpRequestContext::new(&model.model_id, &request.url, true);
            let request_id = ctx.request_id.clone();
            let base = base_metadata(&model, &request_id);
            let format = model.response_format;
            let locale = self.config.locale;

            let opened = tokio::time::timeout_at(
                deadline,
                self.transport.execute_stream(transport_request(ctx, request)),
            )
            .await;
            let response = match opened {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let kind = e.failure_kind().unwrap_or(FailureKind::Http);
                    tracing::warn!(
                        target: "hkgai_llm::stream",
                        request_id = %request_id,
                        model_id = %model.model_id,
                        error = %e,
                        "stream request failed"
                    );
                    yield with_metadata(fallback_chunk(kind, locale, &model, &query), base);
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        target: "hkgai_llm::stream",
                        request_id = %request_id,
                        model_id = %model.model_id,
                        "stream request timed out before response headers"
                    );
                    yield with_metadata(
                        fallback_chunk(FailureKind::Timeout, locale, &model, &query),
                        base,
                    );
                    return;
                }
            };

            if !response.is_success() {
                let body = drain_body(
                    response.body.into_stream(),
                    deadline,
                    self.config.error_body_log_limit,
                )
                .await;
                tracing::warn!(
                    target: "hkgai_llm::http",
                    request_id = %request_id,
                    model_id = %model.model_id,
                    status = response.status,
                    body = %body,
                    "backend returned an error status"
                );
                yield with_metadata(fallback_chunk(FailureKind::Http, locale, &model, &query), base);
                return;
            }

            let mut frames = Box::pin(frame_stream(response.body.into_stream(), deadline));
            let mut pending: Option<StreamChunk> = None;
            let mut usage: Option<ModelUsage> = None;
            let mut identifiers = Metadata::new();
            let mut failure: Option<LlmError> = None;

            while let Some(item) = frames.next().await {
                let frame = match item {
                    Ok(frame) => frame,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                let event = frame.event.as_deref();
                if let Some(message) = extract_stream_error(format, &frame.data, event) {
                    tracing::warn!(
                        target: "hkgai_llm::stream",
                        request_id = %request_id,
                        model_id = %model.model_id,
                        message = %truncate_for_log(&message, self.config.error_body_log_limit),
                        "backend reported an error event"
                    );
                    failure = Some(LlmError::StreamError(message));
                    break;
                }
                if let Some(reported) = extract_usage(format, &frame.data) {
                    usage = Some(reported);
                }
                identifiers.extend(extract_identifiers(&frame.data));

                let delta = extract_delta(format, &frame.data, event);
                if delta.is_empty() {
                    continue;
                }
                if let Some(previous) = pending.replace(StreamChunk::new(delta, false)) {
                    yield previous;
                }
            }
            // Release the connection before the final chunk is handed out.
            drop(frames);

            match pending.take() {
                Some(mut last) => {
                    last.is_last = true;
                    last.metadata.extend(identifiers);
                    last.metadata.extend(base);
                    if let Some(usage) = usage.and_then(|u| serde_json::to_value(u).ok()) {
                        last.metadata.insert("usage".to_string(), usage);
                    }
                    if let Some(e) = failure {
                        let reason = e.failure_kind().unwrap_or(FailureKind::Http);
                        tracing::warn!(
                            target: "hkgai_llm::stream",
                            request_id = %request_id,
                            model_id = %model.model_id,
                            reason = reason.as_str(),
                            error = %e,
                            "stream ended early after partial answer"
                        );
                        last.metadata.insert("truncated".to_string(), Value::Bool(true));
                        last.metadata.insert(
                            "truncated_reason".to_string(),
                            Value::String(reason.as_str().to_string()),
                        );
                    }
                    yield last;
                }
                None => {
                    let kind = failure
                        .as_ref()
                        .and_then(LlmError::failure_kind)
                        .unwrap_or(FailureKind::EmptyAnswer);
                    tracing::warn!(
                        target: "hkgai_llm::stream",
                        request_id = %request_id,
                        model_id = %model.model_id,
                        reason = kind.as_str(),
                        "stream produced no content, answering with fallback text"
                    );
                    yield with_metadata(fallback_chunk(kind, locale, &model, &query), base);
                }
            }
        }
    }
}

/// Keeps at most one streaming call in flight.
///
/// Each new [`ExclusiveCaller::stream`] cancels the previous stream, which
/// then ends without a final chunk. Meant for long-running research callers
/// where only the latest question matters.
#[derive(Debug, Clone)]
pub struct ExclusiveCaller {
    adapter: ModelAdapter,
    slot: CallSlot,
}

impl ExclusiveCaller {
    pub fn new(adapter: ModelAdapter) -> Self {
        Self {
            adapter,
            slot: CallSlot::new(),
        }
    }

    pub fn stream(
        &self,
        model_id: &str,
        query: &str,
        opts: &CallOptions,
    ) -> Result<ChunkStreamHandle, LlmError> {
        let cancel = self.slot.begin();
        let stream = self
            .adapter
            .stream_with_cancel(model_id, query, opts, cancel.clone())?;
        Ok(ChunkStreamHandle { stream, cancel })
    }

    /// Abort the call in flight, if any.
    pub fn cancel(&self) {
        self.slot.cancel_current();
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }
}

async fn collect_chunks(mut stream: ChunkStream) -> ModelResponse {
    let mut content = String::new();
    let mut metadata = Metadata::new();
    while let Some(chunk) = stream.next().await {
        content.push_str(&chunk.content);
        if chunk.is_last {
            metadata = chunk.metadata;
        }
    }
    let usage = metadata
        .remove("usage")
        .and_then(|value| serde_json::from_value::<ModelUsage>(value).ok());
    ModelResponse {
        content,
        usage,
        metadata,
    }
}

fn response_as_chunk(response: ModelResponse) -> StreamChunk {
    let mut chunk = StreamChunk::new(response.content, true);
    chunk.metadata = response.metadata;
    if let Some(usage) = response.usage.and_then(|u| serde_json::to_value(u).ok()) {
        chunk.metadata.insert("usage".to_string(), usage);
    }
    chunk
}

fn with_metadata(mut chunk: StreamChunk, extra: Metadata) -> StreamChunk {
    chunk.metadata.extend(extra);
    chunk
}

fn base_metadata(model: &ModelConfig, request_id: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("model_id".to_string(), Value::String(model.model_id.clone()));
    metadata.insert(
        "format".to_string(),
        Value::String(model.response_format.as_str().to_string()),
    );
    metadata.insert("request_id".to_string(), Value::String(request_id.to_string()));
    metadata
}

fn transport_request(ctx: HttpRequestContext, request: BuiltRequest) -> HttpTransportRequest {
    HttpTransportRequest {
        ctx,
        url: request.url,
        headers: request.headers,
        body: request.body,
    }
}

// Read at most a few times `limit` bytes of an error body for logging.
async fn drain_body(mut body: ByteStream, deadline: Instant, limit: usize) -> String {
    let cap = limit.saturating_mul(4);
    let mut buf = Vec::new();
    while buf.len() < cap {
        match tokio::time::timeout_at(deadline, body.next()).await {
            Ok(Some(Ok(bytes))) => buf.extend_from_slice(&bytes),
            _ => break,
        }
    }
    truncate_for_log(&String::from_utf8_lossy(&buf), limit)
}

fn truncate_for_log(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
