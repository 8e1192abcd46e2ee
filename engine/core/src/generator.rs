//! Unified Generator
//!
//! The single entry point callers use. A [`UnifiedGenerator`] owns at most
//! one backend adapter at a time and at most one generation in flight.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──generate()──▶ Starting ──first stream──▶ Streaming
//!                         │                          │
//!                         ├──▶ Error ◀───────────────┤
//!                         └──▶ Stopped ◀─────────────┤
//!                                                    └──▶ Complete
//! ```
//!
//! The terminal phase is kept until the next `generate()` or `cleanup()`,
//! which returns the generator to `Idle`.
//!
//! A `generate()` issued while another generation runs stops the running
//! one first, exactly like [`UnifiedGenerator::stop`]. The new generation
//! starts once the previous adapter call has settled.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, BackendAdapter, BackendKind, GenerationRequest, ModelInfo, StreamingToken,
    STREAM_CHANNEL_CAPACITY,
};
use crate::config::HearthConfig;
use crate::error::GenerationError;

/// Called with every fragment once it is queued on the stream
pub type TokenCallback = Box<dyn FnMut(&str) + Send + 'static>;

/// Creates the adapter for a backend kind
pub type AdapterFactory = Arc<
    dyn Fn(BackendKind) -> Result<Arc<dyn BackendAdapter>, GenerationError> + Send + Sync,
>;

/// Where the generator is in its lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GenerationPhase {
    /// Nothing requested yet, or cleaned up
    #[default]
    Idle,
    /// Backend being prepared (process start, request sent)
    Starting,
    /// Fragments are flowing
    Streaming,
    /// Last generation finished normally
    Complete,
    /// Last generation failed
    Error,
    /// Last generation was stopped
    Stopped,
}

impl GenerationPhase {
    /// Whether a generation is in flight
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Streaming)
    }
}

/// How a generation ended
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationOutcome {
    /// The backend finished the response
    Complete {
        /// Full response text
        text: String,
    },
    /// The generation failed; fragments already delivered stay valid
    Failed {
        /// What went wrong
        error: GenerationError,
        /// Fragments delivered before the failure
        partial: String,
    },
    /// Halted by `stop()`, a newer `generate()` or a dropped stream
    Stopped {
        /// Fragments delivered before the stop
        partial: String,
    },
}

impl GenerationOutcome {
    /// Text produced, complete or partial
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Complete { text } => text,
            Self::Failed { partial, .. } | Self::Stopped { partial } => partial,
        }
    }

    /// Whether the backend finished normally
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    fn phase(&self) -> GenerationPhase {
        match self {
            Self::Complete { .. } => GenerationPhase::Complete,
            Self::Failed { .. } => GenerationPhase::Error,
            Self::Stopped { .. } => GenerationPhase::Stopped,
        }
    }
}

/// Items of a [`GenerationStream`]
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    /// A response fragment, in backend order
    Token(String),
    /// Always the last event of a generation
    Finished(GenerationOutcome),
}

/// Events of one generation: fragments, then exactly one `Finished`
///
/// Dropping the stream stops the generation.
#[derive(Debug)]
pub struct GenerationStream {
    events: mpsc::Receiver<GenerationEvent>,
}

impl GenerationStream {
    /// Next event, `None` after `Finished`
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        self.events.recv().await
    }

    /// Wait for the outcome, discarding fragments
    pub async fn collect(mut self) -> GenerationOutcome {
        let mut partial = String::new();
        while let Some(event) = self.events.recv().await {
            match event {
                GenerationEvent::Token(text) => partial.push_str(&text),
                GenerationEvent::Finished(outcome) => return outcome,
            }
        }
        GenerationOutcome::Failed {
            error: GenerationError::transport("generation task ended without an outcome"),
            partial,
        }
    }
}

impl Stream for GenerationStream {
    type Item = GenerationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[derive(Debug, Default)]
struct PhaseState {
    generation: u64,
    phase: GenerationPhase,
    stop: Option<CancellationToken>,
}

struct Inner {
    config: HearthConfig,
    factory: AdapterFactory,
    adapter: AsyncMutex<Option<Arc<dyn BackendAdapter>>>,
    slot: AsyncMutex<()>,
    state: Mutex<PhaseState>,
    system_prompt: Mutex<Option<String>>,
}

/// Facade over every backend
///
/// Cheap to clone; clones share the same adapter and generation slot.
#[derive(Clone)]
pub struct UnifiedGenerator {
    inner: Arc<Inner>,
}

impl UnifiedGenerator {
    /// Create a generator building adapters from `config`
    #[must_use]
    pub fn new(config: HearthConfig) -> Self {
        let factory_config = config.clone();
        let factory: AdapterFactory = Arc::new(move |kind| {
            let backend = Backend::from_config(kind, &factory_config)?;
            Ok(Arc::new(backend) as Arc<dyn BackendAdapter>)
        });
        Self::with_factory(config, factory)
    }

    /// Create a generator with a custom adapter factory
    #[must_use]
    pub fn with_factory(config: HearthConfig, factory: AdapterFactory) -> Self {
        let system_prompt = config.generation.system_prompt.clone();
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                adapter: AsyncMutex::new(None),
                slot: AsyncMutex::new(()),
                state: Mutex::new(PhaseState::default()),
                system_prompt: Mutex::new(system_prompt),
            }),
        }
    }

    /// The configuration adapters are built from
    #[must_use]
    pub fn config(&self) -> &HearthConfig {
        &self.inner.config
    }

    /// A request for `prompt` filled with configured defaults
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] when no model is given
    /// and none is configured.
    pub fn request(
        &self,
        prompt: impl Into<String>,
        model: Option<&str>,
    ) -> Result<GenerationRequest, GenerationError> {
        let generation = &self.inner.config.generation;
        let model = model
            .map(str::to_string)
            .or_else(|| generation.default_model.clone())
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| GenerationError::configuration("no model selected"))?;

        Ok(GenerationRequest::new(prompt, model)
            .with_max_tokens(generation.max_tokens)
            .with_temperature(generation.temperature))
    }

    /// Start a generation on `kind`
    ///
    /// Any generation already running is stopped first.
    pub fn generate(
        &self,
        kind: BackendKind,
        request: GenerationRequest,
        on_token: Option<TokenCallback>,
    ) -> GenerationStream {
        let stop = CancellationToken::new();
        let generation = {
            let mut state = self.inner.state.lock();
            if let Some(previous) = state.stop.replace(stop.clone()) {
                info!("New generation requested, stopping the running one");
                previous.cancel();
            }
            state.generation += 1;
            state.phase = GenerationPhase::Starting;
            state.generation
        };

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_generation(inner, generation, kind, request, on_token, stop, tx).await;
        });

        GenerationStream { events: rx }
    }

    /// Stop the running generation; does nothing when idle
    pub fn stop(&self) {
        let token = self.inner.state.lock().stop.take();
        if let Some(token) = token {
            info!("Stop requested");
            token.cancel();
        }
    }

    /// Stop, then release the active adapter and everything it owns
    ///
    /// Safe to call repeatedly.
    pub async fn cleanup(&self) {
        self.stop();
        let _slot = self.inner.slot.lock().await;
        let adapter = self.inner.adapter.lock().await.take();
        if let Some(adapter) = adapter {
            info!(backend = adapter.name(), "Shutting down backend");
            adapter.shutdown().await;
        }
        self.inner.state.lock().phase = GenerationPhase::Idle;
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> GenerationPhase {
        self.inner.state.lock().phase
    }

    /// Whether a generation is in flight
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.phase().is_active()
    }

    /// Kind of the adapter currently held, if any
    pub async fn active_kind(&self) -> Option<BackendKind> {
        self.inner.adapter.lock().await.as_ref().map(|a| a.kind())
    }

    /// Models `kind` can serve
    ///
    /// # Errors
    ///
    /// Propagates adapter creation and listing errors.
    pub async fn list_models(&self, kind: BackendKind) -> Result<Vec<ModelInfo>, GenerationError> {
        match self.existing_adapter(kind).await {
            Some(adapter) => adapter.list_models().await,
            None => {
                let adapter = (self.inner.factory)(kind)?;
                let models = adapter.list_models().await;
                adapter.shutdown().await;
                models
            }
        }
    }

    /// Whether `kind` is reachable and ready
    pub async fn health_check(&self, kind: BackendKind) -> bool {
        if let Some(adapter) = self.existing_adapter(kind).await {
            return adapter.health_check().await;
        }
        match (self.inner.factory)(kind) {
            Ok(adapter) => {
                let healthy = adapter.health_check().await;
                adapter.shutdown().await;
                healthy
            }
            Err(err) => {
                debug!(kind = %kind, error = %err, "Health check could not create adapter");
                false
            }
        }
    }

    /// Forget client-side conversation memory of the active adapter
    pub async fn reset_context(&self) {
        if let Some(adapter) = self.inner.adapter.lock().await.as_ref() {
            adapter.reset();
        }
    }

    /// Replace the system prompt for this and future adapters
    pub async fn set_system_prompt(&self, prompt: Option<String>) {
        self.inner.system_prompt.lock().clone_from(&prompt);
        if let Some(adapter) = self.inner.adapter.lock().await.as_ref() {
            adapter.set_system_prompt(prompt);
        }
    }

    async fn existing_adapter(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.inner
            .adapter
            .lock()
            .await
            .as_ref()
            .filter(|a| a.kind() == kind)
            .cloned()
    }
}

impl Inner {
    /// The adapter for `kind`, replacing one of another kind
    async fn adapter_for(
        &self,
        kind: BackendKind,
    ) -> Result<Arc<dyn BackendAdapter>, GenerationError> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref().filter(|a| a.kind() == kind) {
            return Ok(Arc::clone(adapter));
        }

        if let Some(previous) = slot.take() {
            info!(from = %previous.kind(), to = %kind, "Switching backend");
            previous.shutdown().await;
        }

        let adapter = (self.factory)(kind)?;
        adapter.set_system_prompt(self.system_prompt.lock().clone());
        debug!(backend = adapter.name(), "Backend adapter ready");
        *slot = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    fn set_phase(&self, generation: u64, phase: GenerationPhase) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.phase = phase;
            if !phase.is_active() {
                state.stop = None;
            }
        }
    }
}

/// Send `event` unless the generation is stopped first
async fn deliver(
    events: &mpsc::Sender<GenerationEvent>,
    event: GenerationEvent,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = stop.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

async fn run_generation(
    inner: Arc<Inner>,
    generation: u64,
    kind: BackendKind,
    request: GenerationRequest,
    on_token: Option<TokenCallback>,
    stop: CancellationToken,
    events: mpsc::Sender<GenerationEvent>,
) {
    let slot = inner.slot.lock().await;
    let outcome = if stop.is_cancelled() {
        debug!(generation, "Generation stopped before it started");
        GenerationOutcome::Stopped {
            partial: String::new(),
        }
    } else {
        match inner.adapter_for(kind).await {
            Ok(adapter) => {
                stream_generation(&inner, generation, &*adapter, &request, on_token, &stop, &events)
                    .await
            }
            Err(error) => GenerationOutcome::Failed {
                error,
                partial: String::new(),
            },
        }
    };

    match &outcome {
        GenerationOutcome::Complete { text } => {
            info!(generation, chars = text.len(), "Generation complete");
        }
        GenerationOutcome::Stopped { partial } => {
            info!(generation, chars = partial.len(), "Generation stopped");
        }
        GenerationOutcome::Failed { error, .. } => {
            warn!(generation, error = %error, "Generation failed");
        }
    }

    inner.set_phase(generation, outcome.phase());
    drop(slot);
    let _ = events.send(GenerationEvent::Finished(outcome)).await;
}

async fn stream_generation(
    inner: &Inner,
    generation: u64,
    adapter: &dyn BackendAdapter,
    request: &GenerationRequest,
    mut on_token: Option<TokenCallback>,
    stop: &CancellationToken,
    events: &mpsc::Sender<GenerationEvent>,
) -> GenerationOutcome {
    debug!(generation, backend = adapter.name(), model = %request.model, "Starting generation");

    let start = adapter.generate_streaming(request);
    tokio::pin!(start);
    let started = tokio::select! {
        biased;
        result = &mut start => result,
        () = stop.cancelled() => {
            // The start may hold locks the stop needs; drive both
            let ((), result) = tokio::join!(adapter.stop_generation(), &mut start);
            result
        }
    };

    let mut tokens = match started {
        Ok(tokens) => tokens,
        Err(GenerationError::Cancelled) => {
            return GenerationOutcome::Stopped {
                partial: String::new(),
            }
        }
        Err(error) => {
            return GenerationOutcome::Failed {
                error,
                partial: String::new(),
            }
        }
    };
    inner.set_phase(generation, GenerationPhase::Streaming);

    let mut text = String::new();
    let mut stopping = false;
    loop {
        let token = tokio::select! {
            biased;
            () = stop.cancelled(), if !stopping => {
                stopping = true;
                adapter.stop_generation().await;
                continue;
            }
            token = tokens.recv() => token,
        };

        match token {
            Some(StreamingToken::Token(fragment)) => {
                if stopping {
                    continue;
                }
                if !deliver(events, GenerationEvent::Token(fragment.clone()), stop).await {
                    // Consumer gone or stop raced the send
                    stop.cancel();
                    continue;
                }
                if let Some(callback) = on_token.as_mut() {
                    callback(&fragment);
                }
                text.push_str(&fragment);
            }
            Some(StreamingToken::Complete { message }) => {
                if stopping {
                    return GenerationOutcome::Stopped { partial: text };
                }
                let text = if message.is_empty() { text } else { message };
                return GenerationOutcome::Complete { text };
            }
            Some(StreamingToken::Stopped { .. } | StreamingToken::Error(GenerationError::Cancelled)) => {
                return GenerationOutcome::Stopped { partial: text };
            }
            Some(StreamingToken::Error(error)) => {
                if stopping {
                    return GenerationOutcome::Stopped { partial: text };
                }
                return GenerationOutcome::Failed {
                    error,
                    partial: text,
                };
            }
            None if stopping => return GenerationOutcome::Stopped { partial: text },
            None => {
                return GenerationOutcome::Failed {
                    error: GenerationError::transport(
                        "backend closed the stream without a result",
                    ),
                    partial: text,
                }
            }
        }
    }
}
