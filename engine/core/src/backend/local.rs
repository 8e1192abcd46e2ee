//! Local Inference Server Backend
//!
//! Streams chat completions from a llama.cpp server that this process
//! spawns and supervises. The server is started on the first generation for
//! a model and reused until the model changes.
//!
//! # Server API
//!
//! - `POST /v1/chat/completions` - OpenAI-compatible chat, streamed as SSE
//! - `GET /health` - 200 once the model is loaded
//!
//! The server keeps no conversation state, so each adapter remembers the
//! exchanges per model and resends them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::context::ConversationContext;
use super::http::{build_client, ensure_success, send_or_stop, spawn_pump, InFlight};
use super::traits::{BackendAdapter, BackendKind, GenerationRequest, ModelInfo, StreamingToken};
use crate::error::GenerationError;
use crate::config::expand_home;
use crate::models::{discover_models, has_model_extension, validate_model_path};
use crate::process::health::probe;
use crate::process::{ProcessSupervisor, ReadyState};
use crate::streaming::{ChunkFormat, StreamEnd};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Chat completions against a supervised local server
pub struct LocalServerAdapter {
    supervisor: Arc<ProcessSupervisor>,
    client: reqwest::Client,
    context: Arc<Mutex<ConversationContext>>,
    in_flight: InFlight,
    models_dir: Option<PathBuf>,
    default_model: Option<PathBuf>,
}

impl LocalServerAdapter {
    /// Create an adapter driving `supervisor`
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] if the HTTP client cannot
    /// be built.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        request_timeout: Duration,
        system_prompt: Option<String>,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            supervisor,
            client: build_client(request_timeout)?,
            context: Arc::new(Mutex::new(ConversationContext::new(system_prompt))),
            in_flight: InFlight::default(),
            models_dir: None,
            default_model: None,
        })
    }

    /// Directory listed by [`list_models`](BackendAdapter::list_models)
    #[must_use]
    pub fn with_models_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.models_dir = dir;
        self
    }

    /// Model a server would be started for when none runs yet
    #[must_use]
    pub fn with_default_model(mut self, model: Option<&str>) -> Self {
        self.default_model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(expand_home);
        self
    }

    /// The supervisor owning the server process
    #[must_use]
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Messages recorded for `model`
    #[must_use]
    pub fn history_len(&self, model: &str) -> usize {
        self.context.lock().len(model)
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let messages = self.context.lock().messages_for(request);
        serde_json::json!({
            "messages": messages,
            "stream": true,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }
}

#[async_trait]
impl BackendAdapter for LocalServerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &str {
        "llama-server"
    }

    /// A running server must be ready and answer its health check. With no
    /// server, the backend is healthy when one could be started: the binary
    /// and the default model both exist.
    async fn health_check(&self) -> bool {
        match self.supervisor.session_info() {
            Some(session) => {
                session.state == ReadyState::Ready
                    && probe(
                        &self.client,
                        &format!("{}/health", session.base_url),
                        HEALTH_PROBE_TIMEOUT,
                    )
                    .await
            }
            None => {
                let Some(model) = self.default_model.as_deref() else {
                    debug!("No default model configured, local backend cannot start");
                    return false;
                };
                has_model_extension(model)
                    && is_file(model).await
                    && is_file(&self.supervisor.config().binary).await
            }
        }
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError> {
        request.validate()?;
        let model_path = validate_model_path(&request.model)?;
        let stop = self.in_flight.begin();

        let session = self.supervisor.ensure_running(&model_path).await?;
        if stop.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let url = format!("{}/v1/chat/completions", session.base_url);
        debug!(url = %url, model = %request.model, "Sending chat completion request");
        let http_request = self.client.post(&url).json(&self.request_body(request));
        let response = send_or_stop(http_request, &stop).await?;
        let response = ensure_success(response, self.name()).await?;

        let context = Arc::clone(&self.context);
        let model = request.model.clone();
        let prompt = request.prompt.clone();
        Ok(spawn_pump(
            response,
            ChunkFormat::ChatCompletions,
            stop,
            move |end| {
                if let StreamEnd::Complete(reply) = end {
                    context.lock().record_exchange(&model, &prompt, reply);
                }
            },
        ))
    }

    async fn stop_generation(&self) {
        let was_generating = self.in_flight.stop();
        if was_generating {
            info!("Stopping local generation");
        }
        self.supervisor.stop().await;
    }

    fn reset(&self) {
        self.context.lock().reset();
    }

    fn set_system_prompt(&self, prompt: Option<String>) {
        if self.context.lock().set_system_prompt(prompt) {
            debug!("System prompt changed, local history cleared");
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        let Some(dir) = self.models_dir.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(discover_models(dir)
            .await?
            .into_iter()
            .map(ModelInfo::from)
            .collect())
    }

    async fn shutdown(&self) {
        self.in_flight.stop();
        self.supervisor.stop().await;
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}
