//! Generation Error Taxonomy
//!
//! Every failure the core can report falls into one of five categories. The
//! supervisor and the adapters return these directly; the
//! [`UnifiedGenerator`](crate::generator::UnifiedGenerator) republishes them
//! as a single [`GenerationOutcome`](crate::generator::GenerationOutcome).
//!
//! The type is `Clone` so it can travel inside stream events.

use thiserror::Error;

/// Errors raised while preparing or running a generation
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Missing or invalid path, API key, URL or request parameter.
    /// Generation never starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend process failed to spawn or never became healthy
    #[error("Startup failed: {reason}{}", format_diagnostics(.diagnostics))]
    Startup {
        /// What went wrong
        reason: String,
        /// Captured process output (may be empty)
        diagnostics: String,
    },

    /// Network failure or non-2xx response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload shape the decoder could not make sense of
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Halted by an explicit stop
    #[error("Generation stopped")]
    Cancelled,
}

impl GenerationError {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for a startup error with captured diagnostics
    pub fn startup(reason: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Startup {
            reason: reason.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Shorthand for a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether this error reports an explicit stop rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts surface wrapped in body and decode errors
        if err.is_timeout() {
            return Self::Transport(format!("request timed out: {err}"));
        }
        if err.is_builder() {
            return Self::Configuration(err.to_string());
        }
        if err.is_decode() && !err.is_body() {
            return Self::Protocol(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- process output ---\n{}", diagnostics.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_includes_diagnostics() {
        let err = GenerationError::startup("server exited", "error: model file is corrupt");
        let text = err.to_string();
        assert!(text.starts_with("Startup failed: server exited"));
        assert!(text.contains("model file is corrupt"));

        let bare = GenerationError::startup("timed out", "  ");
        assert_eq!(bare.to_string(), "Startup failed: timed out");
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(GenerationError::Cancelled.is_cancelled());
        assert!(!GenerationError::transport("reset").is_cancelled());
    }
}
