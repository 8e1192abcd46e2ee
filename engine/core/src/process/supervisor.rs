//! Inference Server Supervisor
//!
//! Owns the locally spawned inference server: starts it for a model, waits
//! for it to report healthy, reuses it across generations, and shuts it down
//! when the model changes or the caller asks.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──ensure_running──▶ Starting ──healthy──▶ Ready
//!    ▲                           │                    │
//!    │                       exit/timeout          stop()/model change
//!    │                           ▼                    │
//!    └────────stop()──────── Failed ◀─────────────────┘ (via Stopped)
//! ```
//!
//! All lifecycle calls serialize on one async mutex, so a supervisor never
//! runs two server processes at once. A [`stop`](ProcessSupervisor::stop)
//! cancels every start requested before it, including starts still queued
//! on that mutex.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::diagnostics::DiagnosticLog;
use super::health::{wait_until_healthy, HealthPolicy, WaitOutcome};
use super::port::{pick_port, DEFAULT_PORT_RANGE};
use super::shutdown::{terminate_child, DEFAULT_STEP_TIMEOUT};
use crate::error::GenerationError;

/// How long to let output readers drain after the process exits
const DIAGNOSTIC_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Configuration
// ============================================================================

/// Spawn and lifecycle settings for the inference server
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Resolved server binary
    pub binary: PathBuf,
    /// Address the server binds
    pub host: String,
    /// Ports tried in order before an OS-assigned one
    pub port_range: RangeInclusive<u16>,
    /// Context window (`-c`)
    pub context_size: u32,
    /// Layers offloaded to the GPU (`-ngl`)
    pub gpu_layers: u32,
    /// Extra arguments appended to the command line
    pub extra_args: Vec<String>,
    /// Readiness polling
    pub health: HealthPolicy,
    /// Wait after each shutdown signal
    pub shutdown_step_timeout: Duration,
}

impl SupervisorConfig {
    /// Defaults for `binary`
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            host: "127.0.0.1".to_string(),
            port_range: DEFAULT_PORT_RANGE,
            context_size: 2048,
            gpu_layers: 99,
            extra_args: Vec::new(),
            health: HealthPolicy::default(),
            shutdown_step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Command-line arguments for serving `model_path` on `port`
    #[must_use]
    pub fn server_args(&self, model_path: &Path, port: u16) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "-c".to_string(),
            self.context_size.to_string(),
            "-ngl".to_string(),
            self.gpu_layers.to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            port.to_string(),
            "--no-webui".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Readiness of the supervised server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadyState {
    /// Spawned, waiting for the health check
    Starting,
    /// Serving requests
    Ready,
    /// Last start attempt failed
    Failed,
    /// No server running
    #[default]
    Stopped,
}

/// Snapshot of the current session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Server process id
    pub pid: Option<u32>,
    /// Bound port
    pub port: u16,
    /// Model being served
    pub model_path: PathBuf,
    /// Readiness at snapshot time
    pub state: ReadyState,
    /// `http://host:port`
    pub base_url: String,
}

struct BackendSession {
    child: Child,
    pid: Option<u32>,
    port: u16,
    model_path: PathBuf,
    base_url: String,
}

impl BackendSession {
    fn info(&self, state: ReadyState) -> SessionInfo {
        SessionInfo {
            pid: self.pid,
            port: self.port,
            model_path: self.model_path.clone(),
            state,
            base_url: self.base_url.clone(),
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Resets the readiness state if a start attempt is abandoned mid-way
struct StartGuard<'a> {
    state: &'a Mutex<ReadyState>,
    info: &'a Mutex<Option<SessionInfo>>,
    armed: bool,
}

impl StartGuard<'_> {
    fn finish(mut self, state: ReadyState) {
        *self.state.lock() = state;
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = ReadyState::Stopped;
            *self.info.lock() = None;
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owner of at most one inference server process
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    client: reqwest::Client,
    session: tokio::sync::Mutex<Option<BackendSession>>,
    state: Mutex<ReadyState>,
    info: Mutex<Option<SessionInfo>>,
    /// Cancelled and replaced by each `stop()`
    abort: Mutex<CancellationToken>,
    spawn_count: AtomicU64,
}

impl ProcessSupervisor {
    /// Create a supervisor; nothing is spawned until [`ensure_running`](Self::ensure_running)
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] if the HTTP client used
    /// for health checks cannot be built.
    pub fn new(config: SupervisorConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            session: tokio::sync::Mutex::new(None),
            state: Mutex::new(ReadyState::Stopped),
            info: Mutex::new(None),
            abort: Mutex::new(CancellationToken::new()),
            spawn_count: AtomicU64::new(0),
        })
    }

    /// Supervisor settings
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current readiness
    #[must_use]
    pub fn state(&self) -> ReadyState {
        *self.state.lock()
    }

    /// PID of the server process, if one is running
    #[must_use]
    pub fn current_pid(&self) -> Option<u32> {
        self.info.lock().as_ref().and_then(|info| info.pid)
    }

    /// Processes spawned over the supervisor's lifetime
    #[must_use]
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the running session
    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        let state = self.state();
        self.info.lock().clone().map(|mut info| {
            info.state = state;
            info
        })
    }

    /// Make sure a healthy server is serving `model_path`
    ///
    /// Reuses the running server when it serves the same model and is still
    /// alive. Otherwise the old server is shut down (and reaped) before a
    /// new one is spawned.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::Configuration`] if the model file is missing
    /// - [`GenerationError::Startup`] if the server cannot be spawned, exits
    ///   early or misses the health deadline (with captured output)
    /// - [`GenerationError::Cancelled`] if [`stop`](Self::stop) interrupts
    ///   the start
    pub async fn ensure_running(&self, model_path: &Path) -> Result<SessionInfo, GenerationError> {
        if !model_path.is_file() {
            return Err(GenerationError::configuration(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let abort = self.abort.lock().clone();
        let mut slot = tokio::select! {
            biased;
            () = abort.cancelled() => {
                debug!(model = %model_path.display(), "Start cancelled while queued");
                return Err(GenerationError::Cancelled);
            }
            slot = self.session.lock() => slot,
        };

        if let Some(session) = slot.as_mut() {
            if session.model_path == model_path
                && self.state() == ReadyState::Ready
                && session.is_alive()
            {
                debug!(pid = session.pid, port = session.port, "Reusing inference server");
                return Ok(session.info(ReadyState::Ready));
            }
        }

        if let Some(old) = slot.take() {
            info!(
                pid = old.pid,
                old_model = %old.model_path.display(),
                new_model = %model_path.display(),
                "Replacing inference server"
            );
            *self.info.lock() = None;
            self.teardown(old).await;
        }

        if abort.is_cancelled() {
            *self.state.lock() = ReadyState::Stopped;
            return Err(GenerationError::Cancelled);
        }

        *self.state.lock() = ReadyState::Starting;
        let guard = StartGuard {
            state: &self.state,
            info: &self.info,
            armed: true,
        };

        let port = match pick_port(&self.config.host, self.config.port_range.clone()).await {
            Ok(port) => port,
            Err(err) => {
                guard.finish(ReadyState::Failed);
                return Err(err);
            }
        };

        let diagnostics = DiagnosticLog::default();
        let (mut child, readers) = match self.spawn(model_path, port, &diagnostics) {
            Ok(spawned) => spawned,
            Err(err) => {
                guard.finish(ReadyState::Failed);
                return Err(err);
            }
        };
        let pid = child.id();
        let base_url = format!("http://{}:{port}", self.config.host);
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        info!(pid, port, model = %model_path.display(), "Spawned inference server");
        *self.info.lock() = Some(SessionInfo {
            pid,
            port,
            model_path: model_path.to_path_buf(),
            state: ReadyState::Starting,
            base_url: base_url.clone(),
        });

        let health_url = format!("{base_url}/health");
        let outcome = wait_until_healthy(
            &self.client,
            &health_url,
            &mut child,
            &self.config.health,
            &abort,
        )
        .await;

        match outcome {
            WaitOutcome::Ready => {
                let session = BackendSession {
                    child,
                    pid,
                    port,
                    model_path: model_path.to_path_buf(),
                    base_url,
                };
                let info = session.info(ReadyState::Ready);
                *self.info.lock() = Some(info.clone());
                *slot = Some(session);
                guard.finish(ReadyState::Ready);
                info!(pid, port, "Inference server ready");
                Ok(info)
            }
            WaitOutcome::Exited(code) => {
                drain(readers).await;
                *self.info.lock() = None;
                guard.finish(ReadyState::Failed);
                warn!(pid, ?code, "Inference server exited during startup");
                let reason = match code {
                    Some(code) => format!("server exited with code {code} before becoming healthy"),
                    None => "server exited before becoming healthy".to_string(),
                };
                Err(GenerationError::startup(reason, diagnostics.snapshot()))
            }
            WaitOutcome::TimedOut => {
                terminate_child(&mut child, self.config.shutdown_step_timeout).await;
                *self.info.lock() = None;
                drain(readers).await;
                guard.finish(ReadyState::Failed);
                warn!(pid, timeout = ?self.config.health.timeout, "Inference server never became healthy");
                Err(GenerationError::startup(
                    format!(
                        "server did not become healthy within {:?}",
                        self.config.health.timeout
                    ),
                    diagnostics.snapshot(),
                ))
            }
            WaitOutcome::Aborted => {
                terminate_child(&mut child, self.config.shutdown_step_timeout).await;
                *self.info.lock() = None;
                guard.finish(ReadyState::Stopped);
                info!(pid, "Inference server start aborted");
                Err(GenerationError::Cancelled)
            }
        }
    }

    /// Shut the server down
    ///
    /// Cancels the start in progress and any start queued behind it, clears
    /// the session, then escalates SIGINT → SIGTERM → SIGKILL. Safe to call
    /// when nothing runs.
    pub async fn stop(&self) {
        std::mem::take(&mut *self.abort.lock()).cancel();

        let mut slot = self.session.lock().await;
        let session = slot.take();
        *self.info.lock() = None;
        *self.state.lock() = ReadyState::Stopped;

        if let Some(session) = session {
            self.teardown(session).await;
        }
    }

    fn spawn(
        &self,
        model_path: &Path,
        port: u16,
        diagnostics: &DiagnosticLog,
    ) -> Result<(Child, Vec<JoinHandle<()>>), GenerationError> {
        let args = self.config.server_args(model_path, port);
        debug!(binary = %self.config.binary.display(), ?args, "Spawning inference server");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GenerationError::startup(
                    format!("failed to spawn {}: {e}", self.config.binary.display()),
                    "",
                )
            })?;

        let pid = child.id();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(diagnostics.attach(stdout, "stdout", pid));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(diagnostics.attach(stderr, "stderr", pid));
        }
        Ok((child, readers))
    }

    async fn teardown(&self, mut session: BackendSession) {
        let step = terminate_child(&mut session.child, self.config.shutdown_step_timeout).await;
        info!(pid = session.pid, ?step, "Inference server stopped");
    }
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    let _ = tokio::time::timeout(DIAGNOSTIC_DRAIN_TIMEOUT, futures::future::join_all(readers)).await;
}
