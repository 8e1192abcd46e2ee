//! Plumbing shared by the HTTP adapters

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::StreamingToken;
use crate::error::GenerationError;
use crate::streaming::{pump_response, ChunkDecoder, ChunkFormat, StreamEnd};

/// Token channel capacity between an adapter and its consumer
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Upper bound on establishing a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an HTTP client whose `timeout` bounds each wait for data
///
/// The limit applies between reads, not to the whole exchange, so a
/// generation may stream for as long as the backend keeps producing.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, GenerationError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .read_timeout(timeout)
        .build()
        .map_err(|e| GenerationError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-2xx response into an error carrying the body text
///
/// Auth failures and unknown models are configuration problems; anything
/// else is a transport failure.
pub(crate) async fn ensure_success(
    response: Response,
    backend: &str,
) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{backend} returned {status}: {}", body.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            GenerationError::Configuration(detail)
        }
        _ => GenerationError::Transport(detail),
    })
}

/// Send `request` unless `stop` fires first
pub(crate) async fn send_or_stop(
    request: RequestBuilder,
    stop: &CancellationToken,
) -> Result<Response, GenerationError> {
    tokio::select! {
        biased;
        () = stop.cancelled() => Err(GenerationError::Cancelled),
        response = request.send() => Ok(response?),
    }
}

/// Pump `response` on a background task
///
/// `on_end` sees how the stream ended before the terminal token is sent.
pub(crate) fn spawn_pump<F>(
    response: Response,
    format: ChunkFormat,
    stop: CancellationToken,
    on_end: F,
) -> mpsc::Receiver<StreamingToken>
where
    F: FnOnce(&StreamEnd) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let end = pump_response(response, ChunkDecoder::new(format), &tx, &stop).await;
        on_end(&end);
        let _ = tx.send(end.into_token()).await;
    });
    rx
}

/// Cancellation token of the generation currently owned by an adapter
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    current: Mutex<Option<CancellationToken>>,
}

impl InFlight {
    /// Register a new generation, stopping any previous one
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Stop the current generation; `false` if there was none
    pub(crate) fn stop(&self) -> bool {
        match self.current.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
