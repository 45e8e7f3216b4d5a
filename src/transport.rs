//! HTTP transport abstraction
//!
//! The adapter never talks to `reqwest` directly. It hands a fully built
//! request to an [`HttpTransport`], which lets tests observe the final
//! URL/headers/body and return a synthetic response without a network.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::error::LlmError;
use crate::streaming::ByteStream;

/// Per-request context carried alongside the request for logging.
#[derive(Debug, Clone)]
pub struct HttpRequestContext {
    /// Locally generated id, also attached to response metadata.
    pub request_id: String,
    pub model_id: String,
    pub url: String,
    pub stream: bool,
}

impl HttpRequestContext {
    pub fn new(model_id: impl Into<String>, url: impl Into<String>, stream: bool) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            url: url.into(),
            stream,
        }
    }
}

/// Transport-level request data for JSON POST requests.
#[derive(Debug, Clone)]
pub struct HttpTransportRequest {
    pub ctx: HttpRequestContext,
    pub url: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Transport-level response data.
#[derive(Debug, Clone)]
pub struct HttpTransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpTransportResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Streaming response body.
pub struct HttpTransportStreamBody {
    inner: ByteStream,
}

impl HttpTransportStreamBody {
    /// Whole body delivered as one chunk.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_chunks(vec![bytes])
    }

    /// Body delivered in the given pieces, in order.
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let items = chunks
            .into_iter()
            .map(|chunk| Ok::<_, LlmError>(Bytes::from(chunk)));
        Self {
            inner: Box::pin(futures::stream::iter(items)),
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, LlmError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn into_stream(self) -> ByteStream {
        self.inner
    }
}

impl std::fmt::Debug for HttpTransportStreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransportStreamBody")
            .finish_non_exhaustive()
    }
}

/// Transport-level response for streaming requests.
#[derive(Debug)]
pub struct HttpTransportStreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: HttpTransportStreamBody,
}

impl HttpTransportStreamResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// HTTP transport for JSON POST requests.
///
/// Non-2xx statuses are returned as responses, not errors: the adapter owns
/// the decision of how to log and degrade them. Errors are reserved for
/// failures to get any response at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute_json(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportResponse, LlmError>;

    async fn execute_stream(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportStreamResponse, LlmError>;
}

/// Default transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LlmError::ConfigurationError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: HttpTransportRequest) -> Result<reqwest::Response, LlmError> {
        tracing::debug!(
            target: "hkgai_llm::http",
            request_id = %request.ctx.request_id,
            model_id = %request.ctx.model_id,
            url = %request.url,
            stream = request.ctx.stream,
            "sending request"
        );
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await?;
        tracing::debug!(
            target: "hkgai_llm::http",
            request_id = %request.ctx.request_id,
            status = response.status().as_u16(),
            "response headers received"
        );
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute_json(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportResponse, LlmError> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpTransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_stream(
        &self,
        request: HttpTransportRequest,
    ) -> Result<HttpTransportStreamResponse, LlmError> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(|e| LlmError::StreamError(e.to_string())));
        Ok(HttpTransportStreamResponse {
            status,
            headers,
            body: HttpTransportStreamBody::from_stream(bytes),
        })
    }
}
