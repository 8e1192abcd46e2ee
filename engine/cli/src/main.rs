//! Hearth - Terminal Chat Front-End
//!
//! Talks to a local llama.cpp server, a llama CLI binary, an Ollama daemon
//! or the hosted inference API through the generation core.
//!
//! # Usage
//!
//! ```bash
//! # Interactive chat with the configured backend
//! hearth
//!
//! # One question against Ollama
//! hearth --backend ollama --model llama3.2 ask "Why is the sky blue?"
//!
//! # Local model through llama-server
//! hearth --backend local --model ~/models/qwen.gguf chat
//!
//! # List models and check connectivity
//! hearth models
//! hearth health
//!
//! # Verbose logging
//! RUST_LOG=debug hearth ask "hi"
//! ```
//!
//! # Signals
//!
//! - `SIGINT` while generating: stop the answer, keep the session
//! - `SIGINT` at the prompt: leave
//!
//! Every exit path shuts the backend down, including any server or daemon
//! hearth started.

mod chat;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use hearth_core::{
    load_config_from_path, BackendKind, ConfigOverrides, HearthConfig, LocalMode,
    UnifiedGenerator,
};

/// Hearth - chat with local and hosted language models
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "HEARTH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend to use (local, ollama, cloud)
    #[arg(short = 'b', long)]
    backend: Option<BackendKind>,

    /// Model name, or a .gguf path for the local backend
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// llama.cpp binary (path, name on PATH, or "bundled")
    #[arg(long, value_name = "PATH")]
    llama_binary: Option<String>,

    /// Local inference mode (server, cli)
    #[arg(long)]
    local_mode: Option<LocalMode>,

    /// Ollama base URL
    #[arg(long, value_name = "URL")]
    ollama_url: Option<String>,

    /// Maximum tokens per answer
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(short = 't', long)]
    temperature: Option<f32>,

    /// System prompt
    #[arg(short = 's', long)]
    system: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "HEARTH_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Answer a single prompt and exit
    Ask {
        /// The prompt
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// List the models the backend offers
    Models,
    /// Check whether backends are reachable
    Health {
        /// Only check this backend
        #[arg(long)]
        only: Option<BackendKind>,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend: self.backend,
            default_model: self.model.clone(),
            llama_binary: self.llama_binary.clone(),
            local_mode: self.local_mode,
            ollama_url: self.ollama_url.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_prompt: self.system.clone(),
        }
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so answers on stdout stay clean.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("hearth={level},hearth_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load(args: &Args) -> Result<HearthConfig> {
    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    info!(
        backend = %config.backend,
        source = ?config.source(),
        path = ?config.config_file_path,
        "Configuration loaded"
    );
    Ok(config)
}

async fn run(generator: &UnifiedGenerator, command: Command) -> Result<()> {
    match command {
        Command::Chat => chat::interactive(generator).await,
        Command::Ask { prompt } => chat::ask(generator, &prompt.join(" ")).await,
        Command::Models => chat::list_models(generator).await,
        Command::Health { only } => chat::health(generator, only).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Hearth starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load(&args)?;
    let generator = UnifiedGenerator::new(config);
    let command = args.command.clone().unwrap_or(Command::Chat);

    let result = run(&generator, command).await;

    info!("Shutting down...");
    generator.cleanup().await;

    if let Err(e) = &result {
        error!(error = %e, "Hearth stopped with error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_no_subcommand() {
        let args = Args::try_parse_from(["hearth"]).unwrap();
        assert_eq!(args.command, None);
        assert_eq!(args.log_level, "warn");
    }

    #[test]
    fn test_ask_joins_words() {
        let args = Args::try_parse_from(["hearth", "-b", "ollama", "ask", "Say", "hi"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Ollama));
        assert_eq!(
            args.command,
            Some(Command::Ask {
                prompt: vec!["Say".to_string(), "hi".to_string()]
            })
        );
    }

    #[test]
    fn test_backend_aliases_parse() {
        let args = Args::try_parse_from(["hearth", "--backend", "huggingface", "models"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Cloud));
        assert!(Args::try_parse_from(["hearth", "--backend", "mainframe"]).is_err());
    }

    #[test]
    fn test_overrides_carry_flags() {
        let args = Args::try_parse_from([
            "hearth",
            "--model",
            "llama3.2",
            "--local-mode",
            "cli",
            "-t",
            "0.2",
        ])
        .unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.default_model.as_deref(), Some("llama3.2"));
        assert_eq!(overrides.local_mode, Some(LocalMode::Cli));
        assert_eq!(overrides.temperature, Some(0.2));
        assert_eq!(overrides.backend, None);
    }

    #[test]
    fn test_load_applies_overrides_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth.toml");
        std::fs::write(
            &path,
            "backend = \"ollama\"\n[generation]\nmax_tokens = 64\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "hearth",
            "--config",
            path.to_str().unwrap(),
            "--max-tokens",
            "128",
        ])
        .unwrap();
        let config = load(&args).unwrap();

        assert_eq!(config.backend, BackendKind::Ollama);
        assert_eq!(config.generation.max_tokens, 128);
    }
}
