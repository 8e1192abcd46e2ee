//! The closed set of backend adapters

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::cloud::CloudAdapter;
use super::llama_cli::LlamaCliAdapter;
use super::local::LocalServerAdapter;
use super::ollama::OllamaAdapter;
use super::traits::{BackendAdapter, BackendKind, GenerationRequest, ModelInfo, StreamingToken};
use crate::config::{HearthConfig, LocalMode};
use crate::error::GenerationError;
use crate::process::binary::{LLAMA_CLI, LLAMA_SERVER};
use crate::process::{resolve_binary, ProcessSupervisor};

/// One of the supported adapters
pub enum Backend {
    /// Supervised llama-server
    Local(LocalServerAdapter),
    /// One llama CLI process per generation
    LocalCli(LlamaCliAdapter),
    /// Ollama daemon
    Ollama(OllamaAdapter),
    /// Hosted inference API
    Cloud(CloudAdapter),
}

impl Backend {
    /// Build the adapter for `kind` from configuration
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] when a binary cannot be
    /// resolved, a URL is invalid or the cloud API key is missing.
    pub fn from_config(kind: BackendKind, config: &HearthConfig) -> Result<Self, GenerationError> {
        let generation = &config.generation;
        let system_prompt = generation.system_prompt.clone();

        let backend = match kind {
            BackendKind::Local => match config.local.mode {
                LocalMode::Server => {
                    let binary = resolve_binary(&config.local.binary, LLAMA_SERVER)?;
                    let supervisor =
                        ProcessSupervisor::new(config.local.supervisor_config(binary))?;
                    let adapter = LocalServerAdapter::new(
                        Arc::new(supervisor),
                        generation.request_timeout,
                        system_prompt,
                    )?
                    .with_models_dir(config.local.models_dir.clone())
                    .with_default_model(generation.default_model.as_deref());
                    Self::Local(adapter)
                }
                LocalMode::Cli => {
                    let binary = resolve_binary(&config.local.binary, LLAMA_CLI)?;
                    let adapter = LlamaCliAdapter::new(binary, system_prompt)
                        .with_context_size(config.local.context_size)
                        .with_extra_args(config.local.extra_args.clone())
                        .with_models_dir(config.local.models_dir.clone());
                    Self::LocalCli(adapter)
                }
            },
            BackendKind::Ollama => {
                let mut adapter = OllamaAdapter::new(
                    &config.ollama.url,
                    generation.request_timeout,
                    system_prompt,
                )?;
                if config.ollama.auto_start {
                    adapter = adapter.with_auto_start(&config.ollama.binary);
                }
                Self::Ollama(adapter)
            }
            BackendKind::Cloud => {
                Self::Cloud(CloudAdapter::new(&config.cloud, generation.request_timeout)?)
            }
        };

        debug!(kind = %kind, name = backend.name(), "Created backend adapter");
        Ok(backend)
    }

    fn adapter(&self) -> &dyn BackendAdapter {
        match self {
            Self::Local(adapter) => adapter,
            Self::LocalCli(adapter) => adapter,
            Self::Ollama(adapter) => adapter,
            Self::Cloud(adapter) => adapter,
        }
    }
}

#[async_trait]
impl BackendAdapter for Backend {
    fn kind(&self) -> BackendKind {
        self.adapter().kind()
    }

    fn name(&self) -> &str {
        self.adapter().name()
    }

    async fn health_check(&self) -> bool {
        self.adapter().health_check().await
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError> {
        self.adapter().generate_streaming(request).await
    }

    async fn stop_generation(&self) {
        self.adapter().stop_generation().await;
    }

    fn reset(&self) {
        self.adapter().reset();
    }

    fn set_system_prompt(&self, prompt: Option<String>) {
        self.adapter().set_system_prompt(prompt);
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        self.adapter().list_models().await
    }

    async fn shutdown(&self) {
        self.adapter().shutdown().await;
    }
}
