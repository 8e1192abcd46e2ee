//! Hearth Stub Server
//!
//! Development stand-in for the inference binaries hearth drives. It speaks
//! just enough of each protocol to exercise the generation core end to end
//! without model weights.
//!
//! # Modes
//!
//! ```bash
//! # llama-server: GET /health, POST /v1/chat/completions (SSE)
//! hearth-stub-server -m model.gguf --host 127.0.0.1 --port 8080
//!
//! # Ollama: GET /api/tags, POST /api/chat (NDJSON)
//! OLLAMA_HOST=127.0.0.1:11434 hearth-stub-server serve
//!
//! # llama-cli: loader noise, prompt echo, answer, timing line on stdout
//! hearth-stub-server --model model.gguf --prompt "User: Hi\nAssistant:"
//! ```
//!
//! Unknown flags are ignored so the real binaries' argument lists work
//! unchanged.
//!
//! # Test Knobs
//!
//! - `--stub-reply TEXT`: answer text (default `Hi there!`)
//! - `--stub-echo`: answer with the number of chat messages received
//! - `--stub-token-delay-ms N`: pause between fragments
//! - `--stub-startup-delay-ms N`: report "loading" from the health endpoint
//!   for this long
//! - `--stub-unhealthy`: never report healthy
//! - `--stub-exit-code N`: print a load error to stderr and exit with `N`
//!
//! # Signals
//!
//! - SIGINT/SIGTERM: graceful shutdown

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

const DEFAULT_REPLY: &str = "Hi there!";
const DEFAULT_OLLAMA_ADDRESS: &str = "127.0.0.1:11434";

/// Behaviour switches shared by every mode
#[derive(Clone, Debug)]
struct StubOptions {
    reply: String,
    echo: bool,
    token_delay: Duration,
    startup_delay: Duration,
    unhealthy: bool,
    exit_code: Option<i32>,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            reply: DEFAULT_REPLY.to_string(),
            echo: false,
            token_delay: Duration::ZERO,
            startup_delay: Duration::ZERO,
            unhealthy: false,
            exit_code: None,
        }
    }
}

impl StubOptions {
    fn reply_for(&self, body: &Value) -> String {
        if self.echo {
            let count = body["messages"].as_array().map_or(0, Vec::len);
            format!("{count} messages")
        } else {
            self.reply.clone()
        }
    }

    fn ticker(&self) -> Option<Interval> {
        (!self.token_delay.is_zero()).then(|| tokio::time::interval(self.token_delay))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    LlamaServer { host: String, port: u16 },
    Ollama,
    Cli { prompt: Option<String> },
}

#[derive(Debug)]
struct StubArgs {
    mode: Mode,
    model: Option<String>,
    options: StubOptions,
}

fn parse_args(args: &[String]) -> anyhow::Result<StubArgs> {
    let mut options = StubOptions::default();
    let mut host = "127.0.0.1".to_string();
    let mut port = None;
    let mut prompt = None;
    let mut model = None;

    let mut iter = args.iter();
    let serve = args.first().is_some_and(|a| a == "serve");
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .with_context(|| format!("{arg} needs a value"))
        };
        match arg.as_str() {
            "--stub-reply" => options.reply = value()?,
            "--stub-echo" => options.echo = true,
            "--stub-token-delay-ms" => options.token_delay = millis(&value()?)?,
            "--stub-startup-delay-ms" => options.startup_delay = millis(&value()?)?,
            "--stub-unhealthy" => options.unhealthy = true,
            "--stub-exit-code" => {
                options.exit_code = Some(value()?.parse().context("invalid exit code")?);
            }
            "--host" => host = value()?,
            "--port" => port = Some(value()?.parse::<u16>().context("invalid port")?),
            "-p" | "--prompt" => prompt = Some(value()?),
            "-m" | "--model" => model = Some(value()?),
            _ => {}
        }
    }

    let mode = if serve {
        Mode::Ollama
    } else if let Some(port) = port {
        Mode::LlamaServer { host, port }
    } else {
        Mode::Cli { prompt }
    };
    Ok(StubArgs {
        mode,
        model,
        options,
    })
}

fn millis(value: &str) -> anyhow::Result<Duration> {
    let ms = value
        .parse::<u64>()
        .with_context(|| format!("invalid milliseconds '{value}'"))?;
    Ok(Duration::from_millis(ms))
}

/// Split a reply into word-sized fragments: `Hi there!` → `Hi`, ` there`, `!`
fn fragments(reply: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in reply.chars() {
        let boundary = c.is_whitespace() || c.is_ascii_punctuation();
        let current_is_space = current.chars().all(char::is_whitespace);
        if boundary && !current.is_empty() && !current_is_space {
            out.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

async fn pace(ticker: &mut Option<Interval>) {
    if let Some(ticker) = ticker.as_mut() {
        ticker.tick().await;
    }
}

// =============================================================================
// HTTP Modes
// =============================================================================

#[derive(Clone)]
struct AppState {
    options: Arc<StubOptions>,
    started: Instant,
}

impl AppState {
    fn is_ready(&self) -> bool {
        !self.options.unhealthy && self.started.elapsed() >= self.options.startup_delay
    }
}

fn loading() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": { "code": 503, "message": "Loading model" } })),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    if state.is_ready() {
        Json(json!({ "status": "ok" })).into_response()
    } else {
        loading()
    }
}

async fn chat_completions(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    if !state.is_ready() {
        return loading();
    }
    let reply = state.options.reply_for(&body);

    if !body["stream"].as_bool().unwrap_or(false) {
        return Json(json!({
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": reply },
                "finish_reason": "stop",
            }],
        }))
        .into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    let options = Arc::clone(&state.options);
    tokio::spawn(async move {
        let mut ticker = options.ticker();
        for fragment in fragments(&reply) {
            pace(&mut ticker).await;
            let chunk = json!({
                "object": "chat.completion.chunk",
                "choices": [{ "index": 0, "delta": { "content": fragment }, "finish_reason": null }],
            });
            if tx.send(Ok(Event::default().data(chunk.to_string()))).await.is_err() {
                return;
            }
        }
        let last = json!({
            "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
        });
        let _ = tx.send(Ok(Event::default().data(last.to_string()))).await;
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    Sse::new(ReceiverStream::new(rx)).into_response()
}

async fn ollama_tags(State(state): State<AppState>) -> Response {
    if !state.is_ready() {
        return loading();
    }
    Json(json!({
        "models": [
            { "name": "stub:latest", "model": "stub:latest", "size": 1_234_567 },
        ],
    }))
    .into_response()
}

async fn ollama_chat(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    if !state.is_ready() {
        return loading();
    }
    let model = body["model"].as_str().unwrap_or("stub:latest").to_string();
    let reply = state.options.reply_for(&body);

    if !body["stream"].as_bool().unwrap_or(true) {
        return Json(json!({
            "model": model,
            "message": { "role": "assistant", "content": reply },
            "done": true,
        }))
        .into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(16);
    let options = Arc::clone(&state.options);
    tokio::spawn(async move {
        let mut ticker = options.ticker();
        for fragment in fragments(&reply) {
            pace(&mut ticker).await;
            let line = json!({
                "model": model,
                "message": { "role": "assistant", "content": fragment },
                "done": false,
            });
            if tx.send(Ok(format!("{line}\n"))).await.is_err() {
                return;
            }
        }
        let done = json!({
            "model": model,
            "message": { "role": "assistant", "content": "" },
            "done": true,
            "done_reason": "stop",
        });
        let _ = tx.send(Ok(format!("{done}\n"))).await;
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn serve(router: Router, address: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(address = %address, "Stub server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Stub server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received interrupt"),
        () = terminate => info!("Received terminate"),
    }
}

// =============================================================================
// CLI Mode
// =============================================================================

async fn run_cli(options: &StubOptions, prompt: Option<String>) -> anyhow::Result<()> {
    let prompt = match prompt {
        Some(prompt) => prompt,
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("failed to read prompt from stdin")?;
            input
        }
    };

    let reply = options.reply.clone();
    let mut out = tokio::io::stdout();
    let mut ticker = options.ticker();

    out.write_all(b"llama_model_loader: loaded meta data with 24 key-value pairs from stub\n")
        .await?;
    out.write_all(b"build = 0 (hearth-stub)\n\n").await?;
    // The echo ends with "Assistant:" and the answer continues that line
    out.write_all(format!("{} {reply}\n", prompt.trim_end()).as_bytes())
        .await?;
    out.flush().await?;
    pace(&mut ticker).await;
    // llama-cli sometimes repeats the last line
    out.write_all(format!("{reply}\n").as_bytes()).await?;
    out.write_all(b"\nllama_perf_context_print:        eval time =  1.00 ms\n")
        .await?;
    out.write_all(b"output after the timing summary\n").await?;
    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hearth_stub_server=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let StubArgs {
        mode,
        model,
        options,
    } = parse_args(&args)?;

    if let Some(code) = options.exit_code {
        eprintln!(
            "error: failed to load model '{}'",
            model.as_deref().unwrap_or("<none>")
        );
        std::process::exit(code);
    }

    let state = AppState {
        options: Arc::new(options),
        started: Instant::now(),
    };

    match mode {
        Mode::LlamaServer { host, port } => {
            let address: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {host}:{port}"))?;
            info!(model = ?model, "Serving llama-server protocol");
            let router = Router::new()
                .route("/health", get(health))
                .route("/v1/chat/completions", post(chat_completions))
                .with_state(state);
            serve(router, address).await
        }
        Mode::Ollama => {
            let host = std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| DEFAULT_OLLAMA_ADDRESS.to_string());
            let host = host
                .trim_start_matches("http://")
                .replace("localhost", "127.0.0.1");
            let address: SocketAddr = host
                .parse()
                .with_context(|| format!("invalid OLLAMA_HOST '{host}'"))?;
            info!("Serving Ollama protocol");
            let router = Router::new()
                .route("/api/tags", get(ollama_tags))
                .route("/api/chat", post(ollama_chat))
                .with_state(state);
            serve(router, address).await
        }
        Mode::Cli { prompt } => run_cli(&state.options, prompt).await,
    }
}
