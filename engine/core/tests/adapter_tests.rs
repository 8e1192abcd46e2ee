//! Adapter tests over real transports
//!
//! Cloud endpoints are served in-process by axum; llama-cli, llama-server
//! and Ollama are played by the protocol stub binary.
//!
//! # Running
//!
//! ```bash
//! cargo test -p hearth-core --test adapter_tests
//! ```

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Path as UrlPath;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use hearth_core::config::CloudConfig;
use hearth_core::{
    BackendAdapter, CloudAdapter, GenerationError, GenerationRequest, LlamaCliAdapter,
    LocalServerAdapter, OllamaAdapter, ProcessSupervisor, ReadyState, StreamingToken,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{model_file, serve_router, spawn_ollama_stub, stub_binary, stub_supervisor_config};

// ============================================================================
// Helpers
// ============================================================================

const API_KEY: &str = "hf_test";

/// Collect tokens until the terminal one
async fn drain(mut rx: mpsc::Receiver<StreamingToken>) -> (Vec<String>, StreamingToken) {
    let run = async {
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            match token {
                StreamingToken::Token(text) => tokens.push(text),
                terminal => return (tokens, terminal),
            }
        }
        panic!("channel closed without a terminal token");
    };
    timeout(Duration::from_secs(30), run)
        .await
        .expect("stream did not finish")
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"))
}

fn sse(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn cloud_model(UrlPath(model): UrlPath<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response();
    }
    match model.as_str() {
        "streaming" => sse(concat!(
            "data: {\"token\":{\"text\":\"Hel\",\"special\":false}}\n\n",
            "data: {\"token\":{\"text\":\"lo\",\"special\":false}}\n\n",
            "data: {\"token\":{\"text\":\"</s>\",\"special\":true},\"generated_text\":\"Hello\"}\n\n",
        )),
        "malformed" => sse(concat!(
            "data: {\"token\":{\"text\":\"A\",\"special\":false}}\n\n",
            "data: {\"token\": {oops\n\n",
            "data: {\"token\":{\"text\":\"B\",\"special\":false}}\n\n",
        )),
        "stalled" => {
            let first = futures::stream::once(async {
                Ok::<_, std::io::Error>(Bytes::from_static(
                    b"data: {\"token\":{\"text\":\"Hel\",\"special\":false}}\n\n",
                ))
            });
            let body = Body::from_stream(first.chain(futures::stream::pending()));
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        "plain" => (
            [(header::CONTENT_TYPE, "application/json")],
            r#"[{"generated_text":"Hello from JSON"}]"#,
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "no such model").into_response(),
    }
}

async fn whoami(headers: HeaderMap) -> Response {
    if authorized(&headers) {
        (StatusCode::OK, r#"{"name":"tester"}"#).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response()
    }
}

async fn cloud_adapter(key: &str) -> CloudAdapter {
    cloud_adapter_with_timeout(key, Duration::from_secs(10)).await
}

async fn cloud_adapter_with_timeout(key: &str, request_timeout: Duration) -> CloudAdapter {
    let url = serve_router(
        Router::new()
            .route("/models/:model", post(cloud_model))
            .route("/whoami", get(whoami)),
    )
    .await;
    let config = CloudConfig {
        api_key: Some(key.to_string()),
        base_url: format!("{url}/models"),
        whoami_url: format!("{url}/whoami"),
    };
    CloudAdapter::new(&config, request_timeout).unwrap()
}

// ============================================================================
// Cloud
// ============================================================================

#[tokio::test]
async fn test_cloud_streams_token_events() {
    let adapter = cloud_adapter(API_KEY).await;
    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Hi", "streaming"))
        .await
        .unwrap();

    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens, vec!["Hel", "lo"]);
    assert_eq!(
        terminal,
        StreamingToken::Complete {
            message: "Hello".to_string()
        }
    );
}

#[tokio::test]
async fn test_cloud_plain_json_is_one_fragment() {
    let adapter = cloud_adapter(API_KEY).await;
    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Hi", "plain"))
        .await
        .unwrap();

    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens, vec!["Hello from JSON"]);
    assert!(matches!(terminal, StreamingToken::Complete { .. }));
}

#[tokio::test]
async fn test_malformed_chunk_between_valid_ones_is_skipped() {
    let adapter = cloud_adapter(API_KEY).await;
    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Hi", "malformed"))
        .await
        .unwrap();

    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens, vec!["A", "B"]);
    assert_eq!(
        terminal,
        StreamingToken::Complete {
            message: "AB".to_string()
        }
    );
}

#[tokio::test]
async fn test_silent_backend_is_transport_error() {
    let adapter = cloud_adapter_with_timeout(API_KEY, Duration::from_secs(1)).await;
    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Hi", "stalled"))
        .await
        .unwrap();

    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens, vec!["Hel"]);
    assert!(
        matches!(terminal, StreamingToken::Error(GenerationError::Transport(_))),
        "{terminal:?}"
    );
}

#[tokio::test]
async fn test_cloud_rejected_key_is_configuration_error() {
    let adapter = cloud_adapter("hf_wrong").await;
    let err = adapter
        .generate_streaming(&GenerationRequest::new("Hi", "streaming"))
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Configuration(_)), "{err:?}");
}

#[tokio::test]
async fn test_cloud_key_validation() {
    let good = cloud_adapter(API_KEY).await;
    assert_eq!(good.validate_api_key().await, Ok(true));
    assert!(good.health_check().await);

    let bad = cloud_adapter("hf_wrong").await;
    assert_eq!(bad.validate_api_key().await, Ok(false));
    assert!(!bad.health_check().await);
}

// ============================================================================
// llama-cli
// ============================================================================

#[tokio::test]
async fn test_cli_output_is_filtered_to_the_answer() {
    let (_dir, model) = model_file("cli.gguf").await;
    let adapter = LlamaCliAdapter::new(stub_binary(), Some("Be brief".to_string()));
    let request = GenerationRequest::new("Say hi", model.display().to_string());

    let rx = adapter.generate_streaming(&request).await.unwrap();
    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens.concat(), "Hi there!\n");
    assert!(matches!(terminal, StreamingToken::Complete { .. }), "{terminal:?}");
}

#[tokio::test]
async fn test_cli_load_failure_carries_stderr() {
    let (_dir, model) = model_file("cli.gguf").await;
    let adapter = LlamaCliAdapter::new(stub_binary(), None)
        .with_extra_args(vec!["--stub-exit-code".to_string(), "4".to_string()]);
    let request = GenerationRequest::new("Say hi", model.display().to_string());

    let rx = adapter.generate_streaming(&request).await.unwrap();
    let (tokens, terminal) = drain(rx).await;

    assert!(tokens.is_empty());
    match terminal {
        StreamingToken::Error(GenerationError::Startup { diagnostics, .. }) => {
            assert!(diagnostics.contains("failed to load model"), "{diagnostics}");
        }
        other => panic!("expected startup error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cli_rejects_non_gguf_model() {
    let adapter = LlamaCliAdapter::new(stub_binary(), None);
    let err = adapter
        .generate_streaming(&GenerationRequest::new("Say hi", "/tmp/model.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Configuration(_)));
}

// ============================================================================
// Ollama
// ============================================================================

#[tokio::test]
async fn test_ollama_lists_models() {
    let (_stub, url) = spawn_ollama_stub(&[]).await;
    let adapter = OllamaAdapter::new(&url, Duration::from_secs(10), None).unwrap();

    assert!(adapter.health_check().await);
    let models = adapter.list_models().await.unwrap();

    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "stub:latest");
    assert_eq!(models[0].size, Some(1_234_567));
}

#[tokio::test]
async fn test_ollama_streams_ndjson() {
    let (_stub, url) = spawn_ollama_stub(&["--stub-reply", "Ahoy matey"]).await;
    let adapter = OllamaAdapter::new(&url, Duration::from_secs(10), None).unwrap();

    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Greet me", "stub:latest"))
        .await
        .unwrap();
    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens, vec!["Ahoy", " matey"]);
    assert_eq!(
        terminal,
        StreamingToken::Complete {
            message: "Ahoy matey".to_string()
        }
    );
}

#[tokio::test]
async fn test_slow_stream_outlives_request_timeout() {
    let (_stub, url) = spawn_ollama_stub(&[
        "--stub-reply",
        "one two three four five six",
        "--stub-token-delay-ms",
        "400",
    ])
    .await;
    let adapter = OllamaAdapter::new(&url, Duration::from_secs(1), None).unwrap();

    let rx = adapter
        .generate_streaming(&GenerationRequest::new("Count", "stub:latest"))
        .await
        .unwrap();
    let (tokens, terminal) = drain(rx).await;

    assert_eq!(tokens.concat(), "one two three four five six");
    assert_eq!(
        terminal,
        StreamingToken::Complete {
            message: "one two three four five six".to_string()
        }
    );
}

// ============================================================================
// Local Server
// ============================================================================

#[tokio::test]
async fn test_local_stop_mid_stream_keeps_partial_and_stops_server() {
    let (_dir, model) = model_file("slow.gguf").await;
    let supervisor = Arc::new(
        ProcessSupervisor::new(
            stub_supervisor_config(&[
                "--stub-reply",
                "one two three four five",
                "--stub-token-delay-ms",
                "300",
            ])
            .await,
        )
        .unwrap(),
    );
    let adapter =
        LocalServerAdapter::new(Arc::clone(&supervisor), Duration::from_secs(30), None).unwrap();

    let mut rx = adapter
        .generate_streaming(&GenerationRequest::new("Count", model.display().to_string()))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
    assert_eq!(first, Some(StreamingToken::Token("one".to_string())));

    adapter.stop_generation().await;
    let (rest, terminal) = drain(rx).await;

    match terminal {
        StreamingToken::Stopped { partial } => {
            assert_eq!(partial, format!("one{}", rest.concat()));
        }
        other => panic!("expected stop, got {other:?}"),
    }
    assert_eq!(supervisor.state(), ReadyState::Stopped);
    assert_eq!(adapter.history_len(&model.display().to_string()), 0);
}

#[tokio::test]
async fn test_local_health_tracks_server_lifecycle() {
    let (_dir, model) = model_file("a.gguf").await;
    let supervisor =
        Arc::new(ProcessSupervisor::new(stub_supervisor_config(&[]).await).unwrap());
    let adapter = LocalServerAdapter::new(Arc::clone(&supervisor), Duration::from_secs(30), None)
        .unwrap()
        .with_default_model(model.to_str());

    // Nothing running yet, but everything needed to start is there
    assert!(adapter.health_check().await);

    supervisor.ensure_running(&model).await.unwrap();
    assert_eq!(supervisor.state(), ReadyState::Ready);
    assert!(adapter.health_check().await);

    adapter.shutdown().await;
    assert!(supervisor.session_info().is_none());
    assert!(adapter.health_check().await);
}
