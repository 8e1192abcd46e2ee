//! Generation Backend Integration
//!
//! This module provides uniform access to every supported inference
//! transport through the [`BackendAdapter`] trait.
//!
//! # Available Backends
//!
//! - **Local server**: llama-server spawned and supervised by this process
//! - **Local CLI**: one llama CLI process per generation
//! - **Ollama**: local or remote daemon, optionally auto-started
//! - **Cloud**: hosted text-generation API with bearer auth
//!
//! # Usage
//!
//! ```ignore
//! use hearth_core::backend::{Backend, BackendAdapter, BackendKind, GenerationRequest};
//!
//! let backend = Backend::from_config(BackendKind::Ollama, &config)?;
//! let request = GenerationRequest::new("Hello!", "llama3.2");
//! let mut rx = backend.generate_streaming(&request).await?;
//! ```

mod cloud;
mod context;
mod http;
mod kind;
mod llama_cli;
mod local;
mod ollama;
mod traits;

pub use cloud::CloudAdapter;
pub use context::ConversationContext;
pub use http::STREAM_CHANNEL_CAPACITY;
pub use kind::Backend;
pub use llama_cli::LlamaCliAdapter;
pub use local::LocalServerAdapter;
pub use ollama::OllamaAdapter;
pub use traits::{
    BackendAdapter, BackendKind, ChatMessage, GenerationRequest, ModelInfo, Role,
    StreamingToken, MAX_TEMPERATURE,
};
