//! Readiness polling for spawned servers

use std::time::Duration;

use reqwest::StatusCode;
use tokio::process::Child;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long and how often to poll a starting server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// Delay between probes
    pub poll_interval: Duration,
    /// Per-probe request timeout
    pub probe_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Why [`wait_until_healthy`] returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server answered 200
    Ready,
    /// The process exited first (exit code when known)
    Exited(Option<i32>),
    /// The policy timeout elapsed
    TimedOut,
    /// The abort token was cancelled
    Aborted,
}

/// Single probe: `true` only for HTTP 200
///
/// llama-server answers 503 while the model is still loading.
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => response.status() == StatusCode::OK,
        Err(_) => false,
    }
}

/// Poll `url` until the server is ready, exits, times out or is aborted
pub async fn wait_until_healthy(
    client: &reqwest::Client,
    url: &str,
    child: &mut Child,
    policy: &HealthPolicy,
    abort: &CancellationToken,
) -> WaitOutcome {
    let polling = async {
        let mut ticker = tokio::time::interval(policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                biased;
                () = abort.cancelled() => return WaitOutcome::Aborted,
                status = child.wait() => {
                    return WaitOutcome::Exited(status.ok().and_then(|s| s.code()));
                }
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let healthy = tokio::select! {
                biased;
                () = abort.cancelled() => return WaitOutcome::Aborted,
                healthy = probe(client, url, policy.probe_timeout) => healthy,
            };
            if healthy {
                debug!(url, attempts, "Server reported healthy");
                return WaitOutcome::Ready;
            }
        }
    };

    tokio::time::timeout(policy.timeout, polling)
        .await
        .unwrap_or(WaitOutcome::TimedOut)
}
