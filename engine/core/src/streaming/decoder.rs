//! JSON Chunk Decoding
//!
//! Turns one line of a backend response into at most one text fragment.
//!
//! # Accepted framing
//!
//! - server-sent events: `data: {json}` frames, `data: [DONE]` sentinel,
//!   `:` comments and `event:`/`id:`/`retry:` fields (ignored)
//! - newline-delimited JSON without a `data:` prefix (Ollama)
//! - a plain non-streaming JSON body, possibly spread over several lines;
//!   those lines are collected and parsed by [`ChunkDecoder::finish`]
//!
//! Malformed lines are skipped. Interrupted chunks are expected on a live
//! connection and must never end the stream.

use serde_json::Value;

/// Most bytes of unframed body kept for the end-of-stream parse
const MAX_UNFRAMED_BYTES: usize = 1024 * 1024;

/// Where the content lives in a backend's JSON chunks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkFormat {
    /// OpenAI-style chat completions (llama-server):
    /// `choices[0].delta.content`
    ChatCompletions,
    /// Ollama chat: `message.content`, ended by `done: true`
    OllamaChat,
    /// Hosted text generation: `token.text`, or a final `generated_text`
    TextGeneration,
}

/// Result of decoding one line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A content fragment; keep reading
    Fragment(String),
    /// A complete payload; emit it and end the stream
    Final(String),
    /// Nothing to emit for this line
    Skip,
    /// End marker reached
    Done,
    /// The backend reported an error in-band
    Failed(String),
}

/// Stateful line decoder for one response
#[derive(Debug)]
pub struct ChunkDecoder {
    format: ChunkFormat,
    unframed: String,
}

impl ChunkDecoder {
    /// Create a decoder for `format`
    #[must_use]
    pub fn new(format: ChunkFormat) -> Self {
        Self {
            format,
            unframed: String::new(),
        }
    }

    /// Decode a single line (without its terminator)
    pub fn decode_line(&mut self, line: &str) -> Decoded {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return Decoded::Skip;
        }

        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                return Decoded::Done;
            }
            return match serde_json::from_str::<Value>(payload) {
                Ok(value) => self.extract(&value),
                Err(_) => Decoded::Skip,
            };
        }

        if line == "[DONE]" {
            return Decoded::Done;
        }
        if is_sse_field(line) {
            return Decoded::Skip;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => self.extract(&value),
            Err(_) => {
                self.buffer_unframed(line);
                Decoded::Skip
            }
        }
    }

    /// Parse collected unframed lines as one JSON document
    ///
    /// Returns the content of a non-streaming response whose body spanned
    /// several lines, or `None` when there is nothing usable.
    pub fn finish(&mut self) -> Option<String> {
        let body = std::mem::take(&mut self.unframed);
        if body.trim().is_empty() {
            return None;
        }
        let value = serde_json::from_str::<Value>(&body).ok()?;
        match self.extract(&value) {
            Decoded::Fragment(text) | Decoded::Final(text) => Some(text),
            _ => None,
        }
    }

    fn buffer_unframed(&mut self, line: &str) {
        if self.unframed.len() + line.len() > MAX_UNFRAMED_BYTES {
            return;
        }
        self.unframed.push_str(line);
        self.unframed.push('\n');
    }

    fn extract(&self, value: &Value) -> Decoded {
        if let Some(error) = error_message(value) {
            return Decoded::Failed(error);
        }
        match self.format {
            ChunkFormat::ChatCompletions => extract_chat_completions(value),
            ChunkFormat::OllamaChat => extract_ollama(value),
            ChunkFormat::TextGeneration => extract_text_generation(value),
        }
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }
    let message = error
        .as_str()
        .map(String::from)
        .or_else(|| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.is_empty()).map(String::from)
}

fn extract_chat_completions(value: &Value) -> Decoded {
    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
        return Decoded::Skip;
    };

    if let Some(delta) = choice.get("delta") {
        return non_empty(delta.get("content").and_then(Value::as_str))
            .map_or(Decoded::Skip, Decoded::Fragment);
    }
    if let Some(message) = choice.get("message") {
        return non_empty(message.get("content").and_then(Value::as_str))
            .map_or(Decoded::Done, Decoded::Final);
    }
    non_empty(choice.get("text").and_then(Value::as_str)).map_or(Decoded::Skip, Decoded::Fragment)
}

fn extract_ollama(value: &Value) -> Decoded {
    let content = non_empty(
        value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .or_else(|| value.get("response").and_then(Value::as_str)),
    );
    let done = value
        .get("done")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match (content, done) {
        (Some(text), true) => Decoded::Final(text),
        (Some(text), false) => Decoded::Fragment(text),
        (None, true) => Decoded::Done,
        (None, false) => Decoded::Skip,
    }
}

fn extract_text_generation(value: &Value) -> Decoded {
    if let Some(first) = value.as_array().and_then(|items| items.first()) {
        return non_empty(first.get("generated_text").and_then(Value::as_str))
            .map_or(Decoded::Skip, Decoded::Final);
    }

    if let Some(token) = value.get("token") {
        let special = token
            .get("special")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if special {
            return Decoded::Skip;
        }
        return non_empty(token.get("text").and_then(Value::as_str))
            .map_or(Decoded::Skip, Decoded::Fragment);
    }

    non_empty(value.get("generated_text").and_then(Value::as_str))
        .map_or(Decoded::Skip, Decoded::Final)
}
