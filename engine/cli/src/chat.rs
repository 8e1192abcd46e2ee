//! Terminal interaction
//!
//! Reads prompts, prints fragments as they arrive and keeps the
//! conversation history the generator is handed on each turn.

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, warn};

use hearth_core::{
    BackendKind, ChatMessage, GenerationEvent, GenerationOutcome, GenerationRequest,
    UnifiedGenerator,
};

const HELP: &str = "Commands: /reset clears the conversation, /models lists models, /exit leaves.\n\
                    Ctrl-C stops an answer; at the prompt it exits.\n";

/// Run one generation, printing fragments; Ctrl-C stops it
async fn stream_answer(
    generator: &UnifiedGenerator,
    request: GenerationRequest,
    out: &mut Stdout,
) -> Result<GenerationOutcome> {
    let kind = generator.config().backend;
    let mut stream = generator.generate(kind, request, None);
    let mut stopping = false;

    loop {
        tokio::select! {
            event = stream.next_event() => match event {
                Some(GenerationEvent::Token(text)) => {
                    out.write_all(text.as_bytes()).await?;
                    out.flush().await?;
                }
                Some(GenerationEvent::Finished(outcome)) => {
                    out.write_all(b"\n").await?;
                    out.flush().await?;
                    return Ok(outcome);
                }
                None => bail!("generation ended without an outcome"),
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                debug!("Interrupt during generation");
                stopping = true;
                generator.stop();
            }
        }
    }
}

/// Answer a single prompt
pub async fn ask(generator: &UnifiedGenerator, prompt: &str) -> Result<()> {
    let request = generator.request(prompt, None)?;
    let mut out = tokio::io::stdout();

    match stream_answer(generator, request, &mut out).await? {
        GenerationOutcome::Complete { .. } => Ok(()),
        GenerationOutcome::Stopped { .. } => {
            out.write_all(b"[stopped]\n").await?;
            out.flush().await?;
            Ok(())
        }
        GenerationOutcome::Failed { error, .. } => Err(error.into()),
    }
}

/// Read-eval-print loop
pub async fn interactive(generator: &UnifiedGenerator) -> Result<()> {
    let kind = generator.config().backend;
    let mut out = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<ChatMessage> = Vec::new();

    out.write_all(format!("hearth ({kind}). Type /help for commands.\n").as_bytes())
        .await?;

    loop {
        out.write_all(b"> ").await?;
        out.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            out.write_all(b"\n").await?;
            break;
        };

        let prompt = line.trim();
        match prompt {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => {
                out.write_all(HELP.as_bytes()).await?;
                continue;
            }
            "/reset" => {
                history.clear();
                generator.reset_context().await;
                out.write_all(b"Conversation cleared.\n").await?;
                continue;
            }
            "/models" => {
                print_models(generator, kind, &mut out).await?;
                continue;
            }
            _ => {}
        }

        let request = generator.request(prompt, None)?.with_history(history.clone());
        match stream_answer(generator, request, &mut out).await? {
            GenerationOutcome::Complete { text } => {
                history.push(ChatMessage::user(prompt));
                history.push(ChatMessage::assistant(text));
            }
            GenerationOutcome::Stopped { .. } => {
                out.write_all(b"[stopped]\n").await?;
            }
            GenerationOutcome::Failed { error, .. } => {
                warn!(error = %error, "Generation failed");
                out.write_all(format!("error: {error}\n").as_bytes()).await?;
            }
        }
    }

    out.flush().await?;
    Ok(())
}

async fn print_models(
    generator: &UnifiedGenerator,
    kind: BackendKind,
    out: &mut Stdout,
) -> Result<()> {
    let models = generator.list_models(kind).await?;
    if models.is_empty() {
        out.write_all(format!("No models found for {kind}.\n").as_bytes())
            .await?;
    }
    for model in models {
        let size = model
            .size
            .map(|bytes| format!("  {:.1} MB", bytes as f64 / 1_048_576.0))
            .unwrap_or_default();
        out.write_all(format!("{}{size}\n", model.name).as_bytes())
            .await?;
    }
    out.flush().await?;
    Ok(())
}

/// Print the configured backend's models
pub async fn list_models(generator: &UnifiedGenerator) -> Result<()> {
    let mut out = tokio::io::stdout();
    print_models(generator, generator.config().backend, &mut out).await
}

/// Report reachability
///
/// With `only`, an unavailable backend is an error (for scripts).
pub async fn health(generator: &UnifiedGenerator, only: Option<BackendKind>) -> Result<()> {
    let kinds = match only {
        Some(kind) => vec![kind],
        None => vec![BackendKind::Local, BackendKind::Ollama, BackendKind::Cloud],
    };

    let mut out = tokio::io::stdout();
    let mut all_healthy = true;
    for kind in kinds {
        let healthy = generator.health_check(kind).await;
        let status = if healthy { "ok" } else { "unavailable" };
        out.write_all(format!("{:<8} {status}\n", kind.as_str()).as_bytes())
            .await?;
        all_healthy &= healthy;
    }
    out.flush().await?;

    match only {
        Some(kind) if !all_healthy => bail!("backend unavailable: {kind}"),
        _ => Ok(()),
    }
}
