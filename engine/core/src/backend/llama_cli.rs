//! Per-generation CLI inference
//!
//! Runs a llama.cpp command-line binary once per generation and filters its
//! stdout down to the answer. Slower than the server backend (the model is
//! loaded every time) but needs nothing listening on a port.
//!
//! `*simple-chat*` binaries read the prompt from stdin; every other binary
//! receives it through `--prompt`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::http::{InFlight, STREAM_CHANNEL_CAPACITY};
use super::traits::{
    BackendAdapter, BackendKind, GenerationRequest, ModelInfo, Role, StreamingToken,
};
use crate::error::GenerationError;
use crate::models::{discover_models, validate_model_path};
use crate::process::shutdown::DEFAULT_STEP_TIMEOUT;
use crate::process::{terminate_child, DiagnosticLog};
use crate::streaming::{RawLine, RawTextFilter};

/// CPU threads passed to non-interactive binaries
const DEFAULT_THREADS: u32 = 4;

/// How long a failed run may take to flush stderr
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// One CLI process per generation
pub struct LlamaCliAdapter {
    binary: PathBuf,
    context_size: u32,
    threads: u32,
    system_prompt: Mutex<Option<String>>,
    in_flight: InFlight,
    step_timeout: Duration,
    models_dir: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl LlamaCliAdapter {
    /// Create an adapter running `binary`
    pub fn new(binary: impl Into<PathBuf>, system_prompt: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            context_size: 2048,
            threads: DEFAULT_THREADS,
            system_prompt: Mutex::new(system_prompt),
            in_flight: InFlight::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            models_dir: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the context window
    #[must_use]
    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = context_size;
        self
    }

    /// Arguments appended to every invocation
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Directory listed by [`list_models`](BackendAdapter::list_models)
    #[must_use]
    pub fn with_models_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.models_dir = dir;
        self
    }

    fn reads_prompt_from_stdin(&self) -> bool {
        self.binary
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains("simple-chat"))
    }

    /// Plain-text transcript ending in an open assistant turn
    fn transcript(&self, request: &GenerationRequest) -> String {
        let mut transcript = String::new();
        let has_system = request
            .history
            .first()
            .is_some_and(|m| m.role == Role::System);
        if !has_system {
            if let Some(system) = self.system_prompt.lock().as_deref() {
                let _ = writeln!(transcript, "System: {system}");
            }
        }
        for message in &request.history {
            let speaker = match message.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            let _ = writeln!(transcript, "{speaker}: {}", message.content);
        }
        let _ = write!(transcript, "User: {}\nAssistant:", request.prompt);
        transcript
    }

    fn command_args(&self, model: &Path, request: &GenerationRequest, transcript: &str) -> Vec<String> {
        let model = model.display().to_string();
        let mut args = if self.reads_prompt_from_stdin() {
            vec![
                "-m".to_string(),
                model,
                "-c".to_string(),
                self.context_size.to_string(),
                "-ngl".to_string(),
                "0".to_string(),
            ]
        } else {
            self.prompt_args(model, request, transcript)
        };
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn prompt_args(&self, model: String, request: &GenerationRequest, transcript: &str) -> Vec<String> {
        vec![
            "--model".to_string(),
            model,
            "--prompt".to_string(),
            transcript.to_string(),
            "--n-predict".to_string(),
            request.max_tokens.to_string(),
            "--temp".to_string(),
            request.temperature.to_string(),
            "--ctx-size".to_string(),
            self.context_size.to_string(),
            "--threads".to_string(),
            self.threads.to_string(),
            "--log-disable".to_string(),
        ]
    }
}

#[async_trait]
impl BackendAdapter for LlamaCliAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &str {
        "llama-cli"
    }

    async fn health_check(&self) -> bool {
        self.binary.is_file()
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError> {
        request.validate()?;
        let model_path = validate_model_path(&request.model)?;
        let stop = self.in_flight.begin();

        let transcript = self.transcript(request);
        let args = self.command_args(&model_path, request, &transcript);
        let stdin_prompt = self.reads_prompt_from_stdin();
        debug!(binary = %self.binary.display(), stdin_prompt, "Running CLI inference");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(if stdin_prompt { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GenerationError::startup(
                    format!("failed to spawn {}: {e}", self.binary.display()),
                    "",
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(transcript.as_bytes()).await {
                warn!(error = %err, "Failed to write prompt to stdin");
            }
        }

        let diagnostics = DiagnosticLog::default();
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| diagnostics.attach(stderr, "stderr", child.id()));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationError::startup("process stdout unavailable", ""))?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let filter = RawTextFilter::with_prompt_echo(&transcript);
        let step_timeout = self.step_timeout;
        tokio::spawn(async move {
            let output = CliOutput {
                stdout,
                filter,
                diagnostics,
                stderr_reader,
            };
            let token = run_cli(child, output, &tx, &stop, step_timeout).await;
            let _ = tx.send(token).await;
        });
        Ok(rx)
    }

    async fn stop_generation(&self) {
        if self.in_flight.stop() {
            info!("Stopping CLI generation");
        }
    }

    fn set_system_prompt(&self, prompt: Option<String>) {
        *self.system_prompt.lock() = prompt.filter(|p| !p.trim().is_empty());
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
}

struct CliOutput {
    stdout: ChildStdout,
    filter: RawTextFilter,
    diagnostics: DiagnosticLog,
    stderr_reader: Option<JoinHandle<()>>,
}

enum CliEnd {
    Eof,
    StatsReached,
    Stopped,
    ReadFailed(std::io::Error),
}

/// Stream filtered stdout until EOF, the stats marker or a stop
async fn run_cli(
    mut child: Child,
    output: CliOutput,
    tx: &mpsc::Sender<StreamingToken>,
    stop: &CancellationToken,
    step_timeout: Duration,
) -> StreamingToken {
    let CliOutput {
        stdout,
        mut filter,
        diagnostics,
        stderr_reader,
    } = output;
    let mut lines = BufReader::new(stdout).lines();
    let mut message = String::new();

    let end = loop {
        let line = tokio::select! {
            biased;
            () = stop.cancelled() => break CliEnd::Stopped,
            () = tx.closed() => break CliEnd::Stopped,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match filter.push_line(&line) {
                RawLine::Emit(text) => {
                    if tx.send(StreamingToken::Token(text.clone())).await.is_err() {
                        break CliEnd::Stopped;
                    }
                    message.push_str(&text);
                }
                RawLine::Skip => {}
                RawLine::Stop => break CliEnd::StatsReached,
            },
            Ok(None) => break CliEnd::Eof,
            Err(err) => break CliEnd::ReadFailed(err),
        }
    };

    match end {
        CliEnd::Stopped => {
            terminate_child(&mut child, step_timeout).await;
            StreamingToken::Stopped { partial: message }
        }
        CliEnd::StatsReached => {
            terminate_child(&mut child, step_timeout).await;
            StreamingToken::Complete { message }
        }
        CliEnd::ReadFailed(err) => {
            terminate_child(&mut child, step_timeout).await;
            StreamingToken::Error(GenerationError::Transport(format!(
                "failed to read process output: {err}"
            )))
        }
        CliEnd::Eof => match child.wait().await {
            Ok(status) if !status.success() && message.is_empty() => {
                if let Some(reader) = stderr_reader {
                    let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader).await;
                }
                StreamingToken::Error(GenerationError::startup(
                    format!("inference process exited with {status}"),
                    diagnostics.snapshot(),
                ))
            }
            _ => StreamingToken::Complete { message },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatMessage;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transcript_includes_system_and_history() {
        let adapter = LlamaCliAdapter::new("/opt/llama-cli", Some("Be brief".to_string()));
        let request = GenerationRequest::new("And you?", "m.gguf").with_history(vec![
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
        ]);

        assert_eq!(
            adapter.transcript(&request),
            "System: Be brief\nUser: Hi\nAssistant: Hello!\nUser: And you?\nAssistant:"
        );
    }

    #[test]
    fn test_prompt_goes_to_stdin_for_simple_chat() {
        let request = GenerationRequest::new("Hi", "m.gguf");

        let chat = LlamaCliAdapter::new("/opt/llama-simple-chat", None);
        let args = chat.command_args(Path::new("m.gguf"), &request, "User: Hi\nAssistant:");
        assert!(chat.reads_prompt_from_stdin());
        assert!(!args.contains(&"--prompt".to_string()));

        let cli = LlamaCliAdapter::new("/opt/llama-cli", None);
        let args = cli.command_args(Path::new("m.gguf"), &request, "User: Hi\nAssistant:");
        assert!(!cli.reads_prompt_from_stdin());
        let prompt_at = args.iter().position(|a| a == "--prompt").unwrap();
        assert_eq!(args[prompt_at + 1], "User: Hi\nAssistant:");
        assert!(args.contains(&"--n-predict".to_string()));
    }
}
