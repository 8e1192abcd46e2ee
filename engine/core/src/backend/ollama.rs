//! Ollama Backend Implementation
//!
//! Generation backend for an Ollama daemon, local or remote.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history, streamed as NDJSON
//! - `/api/tags` - List available models (also used as the health probe)
//!
//! Ollama keeps no memory between calls and this adapter records none
//! either: each request carries the caller's history, or just the prompt.
//!
//! When the daemon is unreachable on a loopback address the adapter starts
//! `ollama serve` once and owns that process until [`shutdown`].
//!
//! [`shutdown`]: BackendAdapter::shutdown

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::ConversationContext;
use super::http::{build_client, ensure_success, send_or_stop, spawn_pump, InFlight};
use super::traits::{BackendAdapter, BackendKind, GenerationRequest, ModelInfo, StreamingToken};
use crate::error::GenerationError;
use crate::process::health::{probe, wait_until_healthy, HealthPolicy, WaitOutcome};
use crate::process::shutdown::DEFAULT_STEP_TIMEOUT;
use crate::process::{terminate_child, DiagnosticLog};
use crate::streaming::ChunkFormat;

/// Per-probe timeout for `/api/tags`
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama backend client
pub struct OllamaAdapter {
    base_url: String,
    client: reqwest::Client,
    context: Mutex<ConversationContext>,
    auto_start: bool,
    binary: String,
    startup: HealthPolicy,
    daemon: AsyncMutex<Option<Child>>,
    auto_start_attempted: AtomicBool,
    in_flight: InFlight,
}

impl OllamaAdapter {
    /// Create an adapter for the daemon at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] if `base_url` is not a
    /// valid URL or the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        system_prompt: Option<String>,
    ) -> Result<Self, GenerationError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            GenerationError::configuration(format!("invalid Ollama URL '{base_url}': {e}"))
        })?;

        Ok(Self {
            base_url,
            client: build_client(request_timeout)?,
            context: Mutex::new(ConversationContext::new(system_prompt)),
            auto_start: false,
            binary: "ollama".to_string(),
            startup: HealthPolicy {
                probe_timeout: PROBE_TIMEOUT,
                ..HealthPolicy::default()
            },
            daemon: AsyncMutex::new(None),
            auto_start_attempted: AtomicBool::new(false),
            in_flight: InFlight::default(),
        })
    }

    /// Start `binary serve` when the daemon is down
    #[must_use]
    pub fn with_auto_start(mut self, binary: impl Into<String>) -> Self {
        self.auto_start = true;
        self.binary = binary.into();
        self
    }

    /// How long to wait for an auto-started daemon
    #[must_use]
    pub fn with_startup_policy(mut self, policy: HealthPolicy) -> Self {
        self.startup = policy;
        self
    }

    /// The daemon URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// PID of the daemon this adapter started, if it is still owned
    pub async fn daemon_pid(&self) -> Option<u32> {
        self.daemon.lock().await.as_ref().and_then(Child::id)
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// `host:port` as `ollama serve` expects it in `OLLAMA_HOST`
    fn listen_address(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?;
        let is_loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1");
        if !is_loopback {
            return None;
        }
        Some(format!("{host}:{}", url.port_or_known_default()?))
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let messages = self.context.lock().messages_for(request);
        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": request.temperature,
            },
        })
    }

    /// Make sure the daemon answers, starting it once if allowed
    async fn ensure_available(&self, stop: &CancellationToken) -> Result<(), GenerationError> {
        if probe(&self.client, &self.tags_url(), PROBE_TIMEOUT).await {
            return Ok(());
        }
        if !self.auto_start {
            return Err(GenerationError::transport(format!(
                "Ollama is not reachable at {}",
                self.base_url
            )));
        }
        let Some(address) = self.listen_address() else {
            return Err(GenerationError::transport(format!(
                "Ollama is not reachable at {} (auto-start only applies to local addresses)",
                self.base_url
            )));
        };

        let mut daemon = self.daemon.lock().await;
        if probe(&self.client, &self.tags_url(), PROBE_TIMEOUT).await {
            return Ok(());
        }
        if self.auto_start_attempted.swap(true, Ordering::SeqCst) {
            return Err(GenerationError::transport(format!(
                "Ollama is not reachable at {} and was already auto-started once",
                self.base_url
            )));
        }

        info!(binary = %self.binary, address = %address, "Starting Ollama daemon");
        let mut child = Command::new(&self.binary)
            .arg("serve")
            .env("OLLAMA_HOST", &address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GenerationError::startup(format!("failed to spawn {} serve: {e}", self.binary), "")
            })?;

        let diagnostics = DiagnosticLog::default();
        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            let _ = diagnostics.attach(stdout, "stdout", pid);
        }
        if let Some(stderr) = child.stderr.take() {
            let _ = diagnostics.attach(stderr, "stderr", pid);
        }

        let outcome =
            wait_until_healthy(&self.client, &self.tags_url(), &mut child, &self.startup, stop)
                .await;
        match outcome {
            WaitOutcome::Ready => {
                info!(pid = ?pid, "Ollama daemon is ready");
                *daemon = Some(child);
                Ok(())
            }
            WaitOutcome::Exited(code) => Err(GenerationError::startup(
                format!("ollama serve exited with code {code:?} before becoming ready"),
                diagnostics.snapshot(),
            )),
            WaitOutcome::TimedOut => {
                terminate_child(&mut child, DEFAULT_STEP_TIMEOUT).await;
                Err(GenerationError::startup(
                    format!(
                        "ollama serve did not become ready within {:?}",
                        self.startup.timeout
                    ),
                    diagnostics.snapshot(),
                ))
            }
            WaitOutcome::Aborted => {
                terminate_child(&mut child, DEFAULT_STEP_TIMEOUT).await;
                Err(GenerationError::Cancelled)
            }
        }
    }
}

/// `/api/tags` response
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &self.tags_url(), PROBE_TIMEOUT).await
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError> {
        request.validate()?;
        let stop = self.in_flight.begin();
        self.ensure_available(&stop).await?;

        let url = self.chat_url();
        debug!(url = %url, model = %request.model, "Sending Ollama chat request");
        let http_request = self.client.post(&url).json(&self.request_body(request));
        let response = send_or_stop(http_request, &stop).await?;
        let response = ensure_success(response, self.name()).await?;

        Ok(spawn_pump(response, ChunkFormat::OllamaChat, stop, |_| {}))
    }

    async fn stop_generation(&self) {
        if self.in_flight.stop() {
            info!("Stopping Ollama generation");
        }
    }

    fn set_system_prompt(&self, prompt: Option<String>) {
        self.context.lock().set_system_prompt(prompt);
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        let response = self
            .client
            .get(self.tags_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let response = ensure_success(response, self.name()).await?;
        let tags: TagsResponse = response.json().await.map_err(|e| {
            GenerationError::Protocol(format!("unexpected /api/tags response: {e}"))
        })?;

        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelInfo {
                name: tag.name,
                size: tag.size,
                path: None,
            })
            .collect())
    }

    async fn shutdown(&self) {
        self.in_flight.stop();
        let owned = self.daemon.lock().await.take();
        if let Some(mut child) = owned {
            let step = terminate_child(&mut child, DEFAULT_STEP_TIMEOUT).await;
            info!(?step, "Stopped auto-started Ollama daemon");
        } else {
            debug!("No Ollama daemon to stop");
        }
    }
}

impl Drop for OllamaAdapter {
    fn drop(&mut self) {
        if let Ok(daemon) = self.daemon.try_lock() {
            if daemon.is_some() {
                warn!("Ollama adapter dropped without shutdown; daemon killed on drop");
            }
        }
    }
}
