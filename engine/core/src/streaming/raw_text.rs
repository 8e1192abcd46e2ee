//! Raw stdout filtering for CLI inference binaries
//!
//! llama.cpp command-line tools interleave the model's answer with loader
//! logs, banners, prompt echoes and a timing summary. [`RawTextFilter`]
//! keeps the answer and drops the rest, one line at a time.

use std::sync::LazyLock;

use regex::Regex;

/// Lines containing any of these are loader output or UI chrome
const SKIP_PATTERNS: &[&str] = &[
    "ggml_metal",
    "llama_model_loader",
    "llm_load_",
    "build =",
    "Loading model",
    "\u{2584}\u{2584}",
    "available commands",
    "/exit",
    "/regen",
];

/// Chat template markers that leak into raw output
const TEMPLATE_TOKENS: &[&str] = &[
    "<|user|>",
    "<|assistant|>",
    "<|system|>",
    "<|end|>",
    "<|im_start|>",
    "<|im_end|>",
];

/// Markers of the timing summary printed after generation
const STATS_MARKERS: &[&str] = &["[ Prompt:", "t/s ]", "llama_perf_", "llama_print_timings"];

/// A line counts as a repeat if it shares content with the previous one
/// and is shorter than this multiple of it.
const NEAR_DUPLICATE_RATIO: f64 = 1.5;

static ANSI_ESCAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok());

/// Verdict for one raw line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawLine {
    /// Answer text, newline-terminated
    Emit(String),
    /// Noise
    Skip,
    /// Timing summary reached; the answer is over
    Stop,
}

/// Stateful noise filter for one generation
#[derive(Debug, Default)]
pub struct RawTextFilter {
    capturing: bool,
    last_line: Option<String>,
    echo: Vec<String>,
}

impl RawTextFilter {
    /// Create a filter for a fresh generation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter that also drops the echo of `prompt`
    ///
    /// Until the answer starts, lines equal to a prompt line are skipped and
    /// a leading `Assistant:` is cut off (the echo and the answer can share
    /// a line).
    #[must_use]
    pub fn with_prompt_echo(prompt: &str) -> Self {
        Self {
            echo: prompt
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            ..Self::default()
        }
    }

    /// Whether answer text has started
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Classify one line of process output
    pub fn push_line(&mut self, line: &str) -> RawLine {
        if STATS_MARKERS.iter().any(|m| line.contains(m)) {
            return RawLine::Stop;
        }
        if SKIP_PATTERNS.iter().any(|p| line.contains(p)) {
            return RawLine::Skip;
        }

        let trimmed = line.trim();
        if trimmed.chars().all(|c| c == '.' || c.is_whitespace()) {
            return RawLine::Skip;
        }
        if line.contains("User:") && !line.contains("Assistant:") {
            return RawLine::Skip;
        }
        if trimmed == "Assistant:" {
            self.capturing = true;
            return RawLine::Skip;
        }
        if trimmed == ">" {
            return RawLine::Skip;
        }
        if !self.capturing && self.echo.iter().any(|l| l == trimmed) {
            return RawLine::Skip;
        }

        let line = if self.capturing {
            line
        } else {
            line.trim_start()
                .strip_prefix("Assistant:")
                .unwrap_or(line)
        };
        let cleaned = clean_line(line);
        let current = cleaned.trim();
        if current.is_empty() {
            return RawLine::Skip;
        }
        self.capturing = true;

        if let Some(last) = self.last_line.as_deref() {
            if is_repeat(current, last) {
                return RawLine::Skip;
            }
        }
        self.last_line = Some(current.to_string());

        RawLine::Emit(format!("{}\n", cleaned.trim_end()))
    }
}

fn clean_line(line: &str) -> String {
    let mut cleaned = match ANSI_ESCAPE.as_ref() {
        Some(re) => re.replace_all(line, "").into_owned(),
        None => line.to_string(),
    };

    cleaned = cleaned.trim_start_matches(['>', ' ']).to_string();
    for token in TEMPLATE_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    if let Some(rest) = cleaned.trim_start().strip_prefix("Bot:") {
        cleaned = rest.trim_start().to_string();
    }
    cleaned
}

#[allow(clippy::cast_precision_loss)]
fn is_repeat(current: &str, last: &str) -> bool {
    if current == last {
        return true;
    }
    let overlapping = last.contains(current) || current.contains(last);
    overlapping && (current.len() as f64) < (last.len() as f64) * NEAR_DUPLICATE_RATIO
}
