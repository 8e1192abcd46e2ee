//! Backend Adapter Traits
//!
//! Trait definitions for generation backends. This abstraction lets the
//! [`UnifiedGenerator`](crate::generator::UnifiedGenerator) drive a locally
//! spawned inference server, an Ollama daemon or a cloud inference endpoint
//! without changing core logic.
//!
//! # Design Philosophy
//!
//! The [`BackendAdapter`] trait provides a common interface for:
//! - Streaming a generation as it is produced
//! - Stopping an in-flight generation
//! - Resetting client-side conversation memory
//! - Health checking the backend and listing its models
//!
//! Implementations handle wire-format details (endpoints, auth, framing).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GenerationError;

/// Highest sampling temperature a request may carry
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Which of the three inference transports is active
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Locally spawned inference server (llama.cpp)
    #[default]
    Local,
    /// Ollama daemon, local or remote
    Ollama,
    /// Hosted inference API
    #[serde(alias = "huggingface")]
    Cloud,
}

impl BackendKind {
    /// Stable lowercase identifier
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ollama => "ollama",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "llama" | "llama.cpp" => Ok(Self::Local),
            "ollama" => Ok(Self::Ollama),
            "cloud" | "huggingface" | "hf" => Ok(Self::Cloud),
            other => Err(GenerationError::configuration(format!(
                "unknown backend kind '{other}' (expected local, ollama or cloud)"
            ))),
        }
    }
}

/// Author of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation
    System,
    /// Human input
    User,
    /// Model output
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role/content pair of a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an explicit role
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A uniform generation request, immutable once submitted
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// Model identifier (a `.gguf` path for the local backend, a model
    /// name for Ollama and the cloud API)
    pub model: String,
    /// The new user turn
    pub prompt: String,
    /// Earlier turns, oldest first (may be empty)
    pub history: Vec<ChatMessage>,
    /// Maximum tokens to generate, always > 0
    pub max_tokens: u32,
    /// Sampling temperature in `[0, 2]`
    pub temperature: f32,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            prompt: String::new(),
            history: Vec::new(),
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

impl GenerationRequest {
    /// Create a new request with prompt and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Check the request before anything is sent
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] for an empty model,
    /// `max_tokens == 0` or a temperature outside `[0, 2]`.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.model.trim().is_empty() {
            return Err(GenerationError::configuration("no model selected"));
        }
        if self.max_tokens == 0 {
            return Err(GenerationError::configuration(
                "max_tokens must be greater than zero",
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature)
        {
            return Err(GenerationError::configuration(format!(
                "temperature {} is outside [0, {MAX_TEMPERATURE}]",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Token stream events from backend adapters
#[derive(Clone, Debug, PartialEq)]
pub enum StreamingToken {
    /// A non-empty fragment of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// Concatenation of every fragment sent
        message: String,
    },
    /// Delivery halted by `stop_generation`
    Stopped {
        /// Fragments delivered before the stop
        partial: String,
    },
    /// Error occurred mid-stream; fragments already sent stay valid
    Error(GenerationError),
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier as accepted by [`GenerationRequest::model`]
    pub name: String,
    /// Size in bytes, when the backend reports it
    pub size: Option<u64>,
    /// Location on disk for file-backed models
    pub path: Option<PathBuf>,
}

/// Backend adapter trait
///
/// Implement this trait to add support for another inference transport.
///
/// # Cancellation
///
/// [`stop_generation`](Self::stop_generation) is effective for adapters that
/// front a process (the process is signalled). For pure HTTP adapters it
/// ends delivery and drops the response body, closing the connection; the
/// server may still finish work it already started.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which transport this adapter speaks
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name (e.g. "llama-server", "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is reachable and ready
    async fn health_check(&self) -> bool;

    /// Start a generation and receive its tokens as they arrive
    ///
    /// The channel yields [`StreamingToken::Token`] items followed by exactly
    /// one terminal item (`Complete`, `Stopped` or `Error`).
    ///
    /// # Errors
    ///
    /// Fails before yielding anything when the model or endpoint is
    /// misconfigured or unreachable.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError>;

    /// Stop the in-flight generation, if any
    async fn stop_generation(&self);

    /// Forget client-side conversation memory
    fn reset(&self) {}

    /// Replace the system prompt used for new generations
    fn set_system_prompt(&self, prompt: Option<String>) {
        let _ = prompt;
    }

    /// List models this backend can serve
    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        Ok(Vec::new())
    }

    /// Release everything the adapter owns (processes, sessions)
    ///
    /// Must be safe to call repeatedly and on adapters that never started.
    async fn shutdown(&self) {
        self.stop_generation().await;
    }
}
