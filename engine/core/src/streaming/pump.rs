//! HTTP response pump
//!
//! Shared by every HTTP adapter: reads a streaming body, splits it into
//! lines, decodes each line and forwards fragments to a token channel until
//! the body ends, the backend signals completion, or a stop arrives.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::decoder::{ChunkDecoder, Decoded};
use super::lines::LineBuffer;
use crate::backend::StreamingToken;
use crate::error::GenerationError;

/// How a pumped response ended
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEnd {
    /// Backend finished; carries every fragment sent
    Complete(String),
    /// Stop signal or dropped receiver; carries what was delivered
    Stopped(String),
    /// Transport or in-band backend error
    Failed(GenerationError),
}

impl StreamEnd {
    /// The terminal token announcing this end
    #[must_use]
    pub fn into_token(self) -> StreamingToken {
        match self {
            Self::Complete(message) => StreamingToken::Complete { message },
            Self::Stopped(partial) => StreamingToken::Stopped { partial },
            Self::Failed(err) => StreamingToken::Error(err),
        }
    }
}

/// Forward a streaming response body to `tx`
///
/// Returns without sending the terminal token; callers inspect the
/// [`StreamEnd`] (e.g. to record a finished exchange) and then send
/// [`StreamEnd::into_token`]. Dropping the response on return closes the
/// connection.
pub async fn pump_response(
    response: reqwest::Response,
    decoder: ChunkDecoder,
    tx: &mpsc::Sender<StreamingToken>,
    stop: &CancellationToken,
) -> StreamEnd {
    let mut body = response.bytes_stream();
    let mut pump = Pump {
        decoder,
        lines: LineBuffer::new(),
        message: String::new(),
        tx,
        stop,
    };

    loop {
        let chunk = tokio::select! {
            biased;
            () = stop.cancelled() => return StreamEnd::Stopped(pump.message),
            () = tx.closed() => return StreamEnd::Stopped(pump.message),
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for line in pump.lines.push(&bytes) {
                    if let Some(end) = pump.handle_line(&line).await {
                        return end;
                    }
                }
            }
            Some(Err(err)) => {
                debug!(error = %err, "Response body failed mid-stream");
                return StreamEnd::Failed(body_error(&err));
            }
            None => break,
        }
    }

    pump.finish().await
}

/// A body that breaks off mid-stream is a connection problem, whatever
/// layer noticed it
fn body_error(err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::transport(format!("backend went silent mid-stream: {err}"))
    } else {
        GenerationError::transport(format!("response body failed: {err}"))
    }
}

struct Pump<'a> {
    decoder: ChunkDecoder,
    lines: LineBuffer,
    message: String,
    tx: &'a mpsc::Sender<StreamingToken>,
    stop: &'a CancellationToken,
}

impl Pump<'_> {
    async fn handle_line(&mut self, line: &str) -> Option<StreamEnd> {
        match self.decoder.decode_line(line) {
            Decoded::Fragment(text) => self.emit(text).await,
            Decoded::Final(text) => {
                // A final payload after streamed fragments repeats them
                if self.message.is_empty() {
                    if let Some(end) = self.emit(text).await {
                        return Some(end);
                    }
                }
                Some(StreamEnd::Complete(std::mem::take(&mut self.message)))
            }
            Decoded::Done => Some(StreamEnd::Complete(std::mem::take(&mut self.message))),
            Decoded::Failed(reason) => Some(StreamEnd::Failed(GenerationError::transport(
                format!("backend reported an error: {reason}"),
            ))),
            Decoded::Skip => None,
        }
    }

    async fn emit(&mut self, text: String) -> Option<StreamEnd> {
        if text.is_empty() {
            return None;
        }
        let sent = tokio::select! {
            biased;
            () = self.stop.cancelled() => false,
            result = self.tx.send(StreamingToken::Token(text.clone())) => result.is_ok(),
        };
        if !sent {
            return Some(StreamEnd::Stopped(std::mem::take(&mut self.message)));
        }
        self.message.push_str(&text);
        None
    }

    async fn finish(mut self) -> StreamEnd {
        if let Some(line) = self.lines.finish() {
            if let Some(end) = self.handle_line(&line).await {
                return end;
            }
        }
        if let Some(text) = self.decoder.finish() {
            if self.message.is_empty() {
                if let Some(end) = self.emit(text).await {
                    return end;
                }
            }
        }
        StreamEnd::Complete(self.message)
    }
}
