//! Shared fixtures for the integration tests
//!
//! The protocol stub (`hearth-stub-server`) stands in for llama-server,
//! llama-cli and the Ollama daemon. Cloud endpoints are served by an
//! in-process axum router.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use axum::Router;
use hearth_core::process::HealthPolicy;
use hearth_core::{GenerationEvent, GenerationOutcome, GenerationStream, SupervisorConfig};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

// ============================================================================
// Stub Binary
// ============================================================================

/// Path of the protocol stub built alongside the tests
pub fn stub_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hearth-stub-server"))
}

/// A temp dir holding an empty, correctly named model file
pub async fn model_file(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    tokio::fs::write(&path, b"GGUF")
        .await
        .expect("write model file");
    (dir, path)
}

/// A port the OS just reported free
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Supervisor settings that run the stub with `extra_args`
///
/// Each call gets its own single-port range so parallel tests don't race
/// for the same port.
pub async fn stub_supervisor_config(extra_args: &[&str]) -> SupervisorConfig {
    let port = free_port().await;
    let mut config = SupervisorConfig::new(stub_binary());
    config.port_range = port..=port;
    config.extra_args = extra_args.iter().map(ToString::to_string).collect();
    config.health = HealthPolicy {
        timeout: Duration::from_secs(15),
        poll_interval: Duration::from_millis(25),
        probe_timeout: Duration::from_millis(500),
    };
    config.shutdown_step_timeout = Duration::from_secs(2);
    config
}

/// Run the stub in Ollama mode on a free port; returns the child and base URL
pub async fn spawn_ollama_stub(extra_args: &[&str]) -> (Child, String) {
    let port = free_port().await;
    let url = format!("http://127.0.0.1:{port}");
    let child = Command::new(stub_binary())
        .arg("serve")
        .args(extra_args)
        .env("OLLAMA_HOST", format!("127.0.0.1:{port}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn ollama stub");

    let client = reqwest::Client::new();
    let tags = format!("{url}/api/tags");
    let ready = wait_for_async(Duration::from_secs(15), || {
        let request = client.get(&tags).send();
        async move { request.await.is_ok_and(|r| r.status().is_success()) }
    })
    .await;
    assert!(ready, "ollama stub did not come up on {url}");
    (child, url)
}

// ============================================================================
// In-Process Servers
// ============================================================================

/// Serve `router` on an ephemeral port; returns its base URL
pub async fn serve_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind router");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{address}")
}

// ============================================================================
// Waiting
// ============================================================================

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    let mut ticker = interval(Duration::from_millis(10));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
    }
}

/// Async flavour of [`wait_for`]
pub async fn wait_for_async<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    let mut ticker = interval(Duration::from_millis(25));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
    }
}

/// Drain a generation into its tokens and outcome, failing the test if it
/// hangs
pub async fn collect_events(mut stream: GenerationStream) -> (Vec<String>, GenerationOutcome) {
    let drain = async {
        let mut tokens = Vec::new();
        while let Some(event) = stream.next_event().await {
            match event {
                GenerationEvent::Token(text) => tokens.push(text),
                GenerationEvent::Finished(outcome) => return (tokens, outcome),
            }
        }
        panic!("stream closed without an outcome");
    };
    timeout(Duration::from_secs(30), drain)
        .await
        .expect("generation did not finish")
}

/// Read the next token, failing the test on anything else
pub async fn next_token(stream: &mut GenerationStream) -> String {
    let event = timeout(Duration::from_secs(30), stream.next_event())
        .await
        .expect("no event before timeout");
    match event {
        Some(GenerationEvent::Token(text)) => text,
        other => panic!("expected a token, got {other:?}"),
    }
}
