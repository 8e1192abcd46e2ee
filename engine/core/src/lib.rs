//! Hearth Core - Backend Abstraction and Streaming Generation
//!
//! This crate hides the differences between the text-generation backends a
//! chat client can talk to behind one interface. It owns process lifecycle,
//! health checks, port allocation, streaming-protocol decoding and
//! mid-generation cancellation; callers only see fragments and an outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Caller (CLI, GUI, tests)                      │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!                 │ generate / stop / cleanup    │ GenerationEvent
//! ┌───────────────▼──────────────────────────────┴───────────────┐
//! │                     UnifiedGenerator                          │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │ BackendAdapter
//! ┌───────────────▼──────────────────────────────────────────────┐
//! │  LocalServer   LlamaCli      Ollama          Cloud            │
//! │      │            │             │               │             │
//! │ ProcessSupervisor │        (auto-start)         │             │
//! │      │            │             │               │             │
//! │  SSE chat     raw stdout     NDJSON        SSE / JSON         │
//! │      └────── streaming::{ChunkDecoder, RawTextFilter} ──┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use hearth_core::{load_config, BackendKind, GenerationEvent, UnifiedGenerator};
//!
//! let config = load_config()?;
//! let generator = UnifiedGenerator::new(config);
//! let request = generator.request("Say hi", Some("llama3.2"))?;
//!
//! let mut stream = generator.generate(BackendKind::Ollama, request, None);
//! while let Some(event) = stream.next_event().await {
//!     match event {
//!         GenerationEvent::Token(text) => print!("{text}"),
//!         GenerationEvent::Finished(outcome) => println!("\n{outcome:?}"),
//!     }
//! }
//! generator.cleanup().await;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: The adapter trait and its variants
//! - [`config`]: TOML + environment configuration
//! - [`error`]: The generation error taxonomy
//! - [`generator`]: The facade callers use
//! - [`models`]: Local `.gguf` discovery and validation
//! - [`process`]: Local server supervision
//! - [`streaming`]: Line splitting, chunk decoding and stop signalling

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod generator;
pub mod models;
pub mod process;
pub mod streaming;

// Re-exports for convenience
pub use backend::{
    Backend, BackendAdapter, BackendKind, ChatMessage, CloudAdapter, GenerationRequest,
    LlamaCliAdapter, LocalServerAdapter, ModelInfo, OllamaAdapter, Role, StreamingToken,
};
pub use error::GenerationError;
pub use generator::{
    AdapterFactory, GenerationEvent, GenerationOutcome, GenerationPhase, GenerationStream,
    TokenCallback, UnifiedGenerator,
};
pub use models::{discover_models, validate_model_path, LocalModel};
pub use process::{ProcessSupervisor, ReadyState, SessionInfo, SupervisorConfig};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, HearthConfig, HearthToml, LocalMode,
};
