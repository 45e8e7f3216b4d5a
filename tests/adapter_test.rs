//! Adapter behaviour against a scripted transport: request shapes, chunk
//! boundaries, and how every failure class degrades into fallback text.

mod support;

use futures_util::StreamExt;
use hkgai_llm::config::AdapterConfig;
use hkgai_llm::error::LlmError;
use hkgai_llm::fallback::Locale;
use hkgai_llm::registry::ModelRegistry;
use hkgai_llm::types::{CallOptions, StreamChunk};
use hkgai_llm::ModelAdapter;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use support::*;

async fn drain(handle: hkgai_llm::streaming::ChunkStreamHandle) -> Vec<StreamChunk> {
    handle.stream.collect().await
}

fn assert_single_fallback(chunks: &[StreamChunk], reason: &str) {
    assert_eq!(chunks.len(), 1, "{chunks:?}");
    let last = &chunks[0];
    assert!(last.is_last);
    assert!(last.is_fallback());
    assert!(!last.content.is_empty());
    assert_eq!(last.metadata["fallback_reason"], reason);
}

#[tokio::test]
async fn blocking_hkgai_call_returns_backend_answer() {
    let transport = RecordingTransport::new(vec![Scripted::json(json!({
        "answer": "hi there",
        "conversation_id": "conv-1",
    }))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let response = adapter
        .call("hkgai/general", "hello", &CallOptions::new())
        .await
        .unwrap();

    assert_eq!(response.content, "hi there");
    assert!(!response.is_fallback());
    assert_eq!(response.metadata["model_id"], "hkgai/general");
    assert_eq!(response.metadata["conversation_id"], "conv-1");

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "http://backend.test/v1/chat-messages");
    assert_eq!(calls[0].body["response_mode"], "blocking");
    assert_eq!(calls[0].body["query"], "hello");
    assert_eq!(
        calls[0].headers.get("authorization").unwrap(),
        "Bearer test-key"
    );
    assert_eq!(calls[0].headers.get("x-title").unwrap(), "Refly");
}

#[tokio::test]
async fn server_error_resolves_to_fallback_without_raw_body() {
    let transport = RecordingTransport::new(vec![Scripted::status(500, "boom")]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let response = adapter
        .call("hkgai/general", "hello", &CallOptions::new())
        .await
        .unwrap();

    assert!(response.is_fallback());
    assert!(!response.content.contains("boom"));
    assert!(response.content.contains("hello"));
    assert_eq!(response.metadata["fallback_reason"], "http_error");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn three_message_frames_become_three_chunks() {
    let body = sse(&[
        r#"{"event":"message","answer":"alpha "}"#,
        r#"{"event":"message","answer":"beta "}"#,
        r#"{"event":"message","answer":"gamma "}"#,
        "[DONE]",
    ]);
    // Deliver the body cut mid-line and mid-JSON.
    let bytes = body.into_bytes();
    let pieces = vec![bytes[..7].to_vec(), bytes[7..50].to_vec(), bytes[50..].to_vec()];
    let transport = RecordingTransport::new(vec![Scripted::Chunks(pieces)]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "words", &CallOptions::new())
            .unwrap(),
    )
    .await;

    let flags: Vec<bool> = chunks.iter().map(|c| c.is_last).collect();
    assert_eq!(flags, vec![false, false, true]);
    let content: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(content, "alpha beta gamma ");
    assert!(chunks.iter().all(|c| !c.is_fallback()));

    let calls = transport.calls();
    assert_eq!(calls[0].body["response_mode"], "streaming");
    assert_eq!(calls[0].headers.get("accept").unwrap(), "text/event-stream");
}

#[tokio::test]
async fn contract_query_carries_document_before_question() {
    let transport = RecordingTransport::new(vec![Scripted::json(json!({ "answer": "ok" }))]);
    let adapter = adapter(&transport, vec![dify_model("hkgai/contract").contract()]);

    adapter
        .call(
            "hkgai/contract",
            "review this",
            &CallOptions::new().with_document("Clause 1..."),
        )
        .await
        .unwrap();

    let body = &transport.calls()[0].body;
    let query = body["query"].as_str().unwrap();
    let doc_at = query.find("Clause 1...").expect("document in query");
    let question_at = query.find("review this").expect("question in query");
    assert!(doc_at < question_at);
    assert_eq!(body["model"], "contract");
    assert_eq!(body["inputs"], json!({ "doc": [] }));
}

#[tokio::test]
async fn blocking_call_on_streaming_only_model_never_reaches_transport() {
    let transport = RecordingTransport::new(vec![]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/rag").rag()]);

    for opts in [CallOptions::new(), CallOptions::new().with_temperature(0.1)] {
        let err = adapter.call("hkgai/rag", "q", &opts).await.unwrap_err();
        assert!(
            matches!(err, LlmError::ProtocolViolation { ref model_id, .. } if model_id == "hkgai/rag"),
            "{err:?}"
        );
    }
    assert_eq!(transport.call_count(), 0);
    assert!(adapter.requires_streaming("hkgai/rag"));
}

#[tokio::test]
async fn streaming_only_model_without_key_still_reports_protocol_violation() {
    let transport = RecordingTransport::new(vec![]);
    let registry = ModelRegistry::builder()
        .model(hkgai_model("hkgai/rag").rag())
        .build()
        .unwrap();
    let adapter = ModelAdapter::new(
        Arc::new(registry),
        Arc::new(transport.clone()),
        AdapterConfig::default(),
    );

    let err = adapter
        .call("hkgai/rag", "q", &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ProtocolViolation { .. }), "{err:?}");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn streaming_only_model_can_be_collected() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        r#"{"event":"message","answer":"from "}"#,
        r#"{"event":"message","answer":"rag"}"#,
        r#"{"event":"message_end","metadata":{"usage":{"prompt_tokens":4,"completion_tokens":2,"total_tokens":6}}}"#,
    ]))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/rag").rag()]);

    let response = adapter
        .stream_and_collect("hkgai/rag", "q", &CallOptions::new())
        .await
        .unwrap();

    assert_eq!(response.content, "from rag");
    assert_eq!(response.usage.map(|u| u.total_tokens), Some(6));
    assert!(!response.is_fallback());
}

#[tokio::test]
async fn configuration_errors_are_returned_not_swallowed() {
    let transport = RecordingTransport::new(vec![]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let err = adapter
        .call("hkgai/unknown", "q", &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ModelNotConfigured(_)));

    let err = adapter
        .stream("hkgai/unknown", "q", &CallOptions::new())
        .unwrap_err();
    assert!(err.is_configuration_error());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn empty_answer_resolves_to_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::json(json!({ "answer": "" }))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let response = adapter
        .call("hkgai/general", "q", &CallOptions::new())
        .await
        .unwrap();
    assert!(response.is_fallback());
    assert_eq!(response.metadata["fallback_reason"], "empty_answer");
}

#[tokio::test]
async fn unparsable_blocking_payload_resolves_to_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::status(200, "<html>gateway</html>")]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let response = adapter
        .call("hkgai/general", "q", &CallOptions::new())
        .await
        .unwrap();
    assert!(response.is_fallback());
    assert_eq!(response.metadata["fallback_reason"], "unparsable_payload");
}

#[tokio::test(start_paused = true)]
async fn blocking_timeout_resolves_to_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::Stall]);
    let config = AdapterConfig::default().with_request_timeout(Duration::from_secs(5));
    let adapter = adapter_with_config(&transport, vec![hkgai_model("hkgai/general")], config);

    let response = adapter
        .call("hkgai/general", "q", &CallOptions::new())
        .await
        .unwrap();
    assert!(response.is_fallback());
    assert_eq!(response.metadata["fallback_reason"], "timeout");
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_yields_single_timeout_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::ChunksThenStall(vec![
        b": keep-alive\n\n".to_vec(),
    ])]);
    let config = AdapterConfig::default().with_stream_timeout(Duration::from_secs(30));
    let adapter = adapter_with_config(&transport, vec![hkgai_model("hkgai/general")], config);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "timeout");
}

#[tokio::test(start_paused = true)]
async fn timeout_releases_connection_before_fallback_chunk() {
    let released = Arc::new(AtomicBool::new(false));
    let transport = RecordingTransport::new(vec![Scripted::Guarded {
        chunks: vec![b": keep-alive\n\n".to_vec()],
        released: released.clone(),
    }]);
    let config = AdapterConfig::default().with_stream_timeout(Duration::from_secs(3));
    let adapter = adapter_with_config(&transport, vec![hkgai_model("hkgai/general")], config);

    let mut stream = adapter
        .stream("hkgai/general", "q", &CallOptions::new())
        .unwrap()
        .stream;
    let chunk = stream.next().await.expect("fallback chunk");
    assert!(chunk.is_fallback());
    assert_eq!(chunk.metadata["fallback_reason"], "timeout");
    assert!(released.load(Ordering::SeqCst));
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn timeout_after_content_releases_connection_before_last_chunk() {
    let released = Arc::new(AtomicBool::new(false));
    let transport = RecordingTransport::new(vec![Scripted::Guarded {
        chunks: vec![sse(&[
            r#"{"event":"message","answer":"partial "}"#,
            r#"{"event":"message","answer":"answer"}"#,
        ])
        .into_bytes()],
        released: released.clone(),
    }]);
    let config = AdapterConfig::default().with_stream_timeout(Duration::from_secs(3));
    let adapter = adapter_with_config(&transport, vec![hkgai_model("hkgai/general")], config);

    let mut stream = adapter
        .stream("hkgai/general", "q", &CallOptions::new())
        .unwrap()
        .stream;
    let first = stream.next().await.expect("first chunk");
    assert!(!first.is_last);
    let last = stream.next().await.expect("last chunk");
    assert!(last.is_last);
    assert_eq!(last.metadata["truncated"], true);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn stream_that_never_answers_yields_single_timeout_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::Stall]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "timeout");
}

#[tokio::test]
async fn stream_server_error_yields_single_http_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::status(500, "boom")]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "http_error");
    assert!(!chunks[0].content.contains("boom"));
}

#[tokio::test]
async fn malformed_only_stream_yields_single_unparsable_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        "{not json",
        "{\"event\":\"message\",\"answer\":",
    ]))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "unparsable_payload");
}

#[tokio::test]
async fn connection_failure_yields_single_http_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::Fail(LlmError::HttpError(
        "connection refused".to_string(),
    ))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "http_error");
    assert!(!chunks[0].content.contains("refused"));
}

#[tokio::test]
async fn stream_without_answer_frames_yields_empty_answer_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        r#"{"event":"workflow_started"}"#,
        r#"{"event":"message_end"}"#,
    ]))]);
    let adapter = adapter(&transport, vec![dify_model("hkgai/searchentry")]);

    let chunks = drain(
        adapter
            .stream("hkgai/searchentry", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "empty_answer");
}

#[tokio::test]
async fn backend_error_event_before_content_yields_http_fallback() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        r#"{"event":"error","status":400,"message":"quota exceeded"}"#,
    ]))]);
    let adapter = adapter(&transport, vec![dify_model("hkgai/timeline")]);

    let chunks = drain(
        adapter
            .stream("hkgai/timeline", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "http_error");
    assert!(!chunks[0].content.contains("quota"));
}

#[tokio::test(start_paused = true)]
async fn failure_after_content_marks_last_chunk_truncated() {
    let transport = RecordingTransport::new(vec![Scripted::ChunksThenStall(vec![
        sse(&[
            r#"{"event":"message","answer":"partial "}"#,
            r#"{"event":"message","answer":"answer"}"#,
        ])
        .into_bytes(),
    ])]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let chunks = drain(
        adapter
            .stream("hkgai/general", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;

    assert_eq!(chunks.len(), 2);
    assert!(!chunks[0].is_last);
    let last = &chunks[1];
    assert!(last.is_last);
    assert_eq!(last.content, "answer");
    assert!(!last.is_fallback());
    assert_eq!(last.metadata["truncated"], true);
    assert_eq!(last.metadata["truncated_reason"], "timeout");
}

#[tokio::test]
async fn openai_stream_deltas_and_usage() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        "[DONE]",
    ]))]);
    let adapter = adapter(&transport, vec![openai_model("openai/gpt-4o-mini")]);

    let handle = adapter
        .stream("openai/gpt-4o-mini", "hi", &CallOptions::new())
        .unwrap();
    let response = ModelAdapter::collect(handle.stream).await;

    assert_eq!(response.content, "Hello");
    assert_eq!(response.usage.map(|u| u.total_tokens), Some(5));
    assert_eq!(response.metadata["format"], "openai");

    let body = &transport.calls()[0].body;
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn non_streaming_model_is_served_as_one_chunk() {
    let transport = RecordingTransport::new(vec![Scripted::json(json!({
        "choices": [{ "message": { "content": "whole answer" } }],
    }))]);
    let adapter = adapter(
        &transport,
        vec![openai_model("openai/legacy").with_streaming(false, false)],
    );

    let chunks = drain(
        adapter
            .stream("openai/legacy", "q", &CallOptions::new())
            .unwrap(),
    )
    .await;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_last);
    assert_eq!(chunks[0].content, "whole answer");
    assert_eq!(transport.calls()[0].body["stream"], false);
}

#[tokio::test]
async fn fallback_follows_configured_locale_and_model_class() {
    let transport = RecordingTransport::new(vec![Scripted::status(502, "bad gateway")]);
    let config = AdapterConfig::default().with_locale(Locale::En);
    let adapter = adapter_with_config(&transport, vec![hkgai_model("hkgai/rag").rag()], config);

    let chunks = drain(
        adapter
            .stream("hkgai/rag", "What is HKGAI?", &CallOptions::new())
            .unwrap(),
    )
    .await;
    assert_single_fallback(&chunks, "http_error");
    assert!(chunks[0].content.contains("knowledge base"));
    assert!(chunks[0].content.contains("What is HKGAI?"));
}

#[tokio::test]
async fn stream_issues_no_request_until_polled() {
    let transport = RecordingTransport::new(vec![Scripted::sse(&sse(&[
        r#"{"event":"message","answer":"x"}"#,
    ]))]);
    let adapter = adapter(&transport, vec![hkgai_model("hkgai/general")]);

    let handle = adapter
        .stream("hkgai/general", "q", &CallOptions::new())
        .unwrap();
    assert_eq!(transport.call_count(), 0);

    let chunks = drain(handle).await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(transport.call_count(), 1);
}
