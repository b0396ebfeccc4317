//! Stream Orchestrator: runs one conversational turn end to end.
//!
//! A turn echoes the user's prompt, streams debounced model snapshots as
//! they are generated, and commits the user record plus everything the
//! backend produced in a single append once generation completes. Any
//! failure ends the stream with one error frame.
//!
//! ```text
//! Idle → Echoed → Generating → Committing → Done
//!           └──────────┴────────────┴──────→ Errored
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use palaver_config::{DisconnectPolicy, StreamingConfig};
use palaver_core::backend::{Backend, GenerationEvent, GenerationStream};
use palaver_core::error::{BackendError, Error, PersistenceError, UnrepresentableRecord};
use palaver_core::message::ConversationId;
use palaver_core::record::MessageRecord;
use palaver_core::store::HistoryStore;
use palaver_core::wire::{Frame, Projection, WireMessage, project, to_wire};
use palaver_history::SessionLease;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum spacing between partial model frames.
    pub debounce: Duration,
    pub frame_buffer: usize,
    pub on_disconnect: DisconnectPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        (&StreamingConfig::default()).into()
    }
}

impl From<&StreamingConfig> for OrchestratorConfig {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            debounce: config.debounce(),
            frame_buffer: config.frame_buffer.max(1),
            on_disconnect: config.on_disconnect,
        }
    }
}

/// The collaborators one turn runs against.
pub struct SessionContext {
    pub store: Arc<dyn HistoryStore>,
    pub backend: Arc<dyn Backend>,
    lease: Option<SessionLease>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn HistoryStore>, backend: Arc<dyn Backend>) -> Self {
        Self {
            store,
            backend,
            lease: None,
        }
    }

    /// Hold `lease` until the turn finishes.
    pub fn with_lease(mut self, lease: SessionLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn conversation_id(&self) -> &ConversationId {
        self.store.conversation_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Echoed,
    Generating,
    Committing,
    Done,
    Errored,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Echoed => "echoed",
            Self::Generating => "generating",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Why a turn ended early.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Unrepresentable(#[from] UnrepresentableRecord),

    #[error("client disconnected; turn abandoned")]
    Abandoned,
}

impl TurnError {
    /// The `error` field of the terminal error frame.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Backend(_) => "backend",
            Self::Persistence(_) => "persistence",
            Self::Unrepresentable(_) => "unrepresentable",
            Self::Abandoned => "disconnected",
        }
    }
}

/// How a turn ended.
#[derive(Debug)]
pub struct TurnOutcome {
    pub state: TurnState,
    /// Records appended to history; zero unless the turn is `Done`.
    pub committed: usize,
    /// Model frames emitted, after debouncing.
    pub model_frames: usize,
    pub error: Option<TurnError>,
}

/// The frames of one in-flight turn.
///
/// Dropping the stream counts as a client disconnect.
pub struct TurnStream {
    frames: mpsc::Receiver<Frame>,
    handle: JoinHandle<TurnOutcome>,
}

impl TurnStream {
    pub async fn next(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Frame>, JoinHandle<TurnOutcome>) {
        (self.frames, self.handle)
    }

    /// Drain every frame, then wait for the turn to settle.
    pub async fn collect(mut self) -> Result<(Vec<Frame>, TurnOutcome), Error> {
        let mut frames = Vec::new();
        while let Some(frame) = self.frames.recv().await {
            frames.push(frame);
        }
        let outcome = self
            .handle
            .await
            .map_err(|e| Error::Internal(format!("turn task failed: {e}")))?;
        Ok((frames, outcome))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOrchestrator {
    config: OrchestratorConfig,
}

impl StreamOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a turn. Frames are produced as the turn progresses.
    pub fn submit(&self, ctx: SessionContext, prompt: &str) -> Result<TurnStream, Error> {
        if prompt.trim().is_empty() {
            return Err(Error::InvalidPrompt("prompt is empty".into()));
        }

        let (tx, rx) = mpsc::channel(self.config.frame_buffer);
        let turn = Turn {
            config: self.config.clone(),
            conversation: ctx.conversation_id().clone(),
            frames: tx,
            state: TurnState::Idle,
            model_frames: 0,
            disconnected: false,
        };
        info!(
            conversation_id = %turn.conversation,
            backend = ctx.backend.name(),
            "Turn started"
        );
        let handle = tokio::spawn(turn.run(ctx, prompt.to_string()));

        Ok(TurnStream { frames: rx, handle })
    }

    /// The conversation so far, as the client sees it.
    pub async fn list(&self, store: &dyn HistoryStore, policy: Projection) -> Result<Vec<WireMessage>, Error> {
        let records = store.read_all().await?;
        Ok(project(&records, policy)?)
    }
}

struct Turn {
    config: OrchestratorConfig,
    conversation: ConversationId,
    frames: mpsc::Sender<Frame>,
    state: TurnState,
    model_frames: usize,
    disconnected: bool,
}

impl Turn {
    async fn run(mut self, ctx: SessionContext, prompt: String) -> TurnOutcome {
        let result = self.drive(&ctx, prompt).await;

        let outcome = match result {
            Ok(committed) => {
                self.transition(TurnState::Done);
                info!(
                    conversation_id = %self.conversation,
                    committed,
                    model_frames = self.model_frames,
                    "Turn complete"
                );
                TurnOutcome {
                    state: self.state,
                    committed,
                    model_frames: self.model_frames,
                    error: None,
                }
            }
            Err(err) => {
                self.transition(TurnState::Errored);
                match &err {
                    TurnError::Abandoned => {
                        info!(conversation_id = %self.conversation, "Turn abandoned")
                    }
                    TurnError::Persistence(e) => {
                        error!(conversation_id = %self.conversation, error = %e, "Turn not committed")
                    }
                    other => warn!(conversation_id = %self.conversation, error = %other, "Turn failed"),
                }
                if !self.disconnected {
                    let _ = self.frames.send(Frame::error(err.category(), err.to_string())).await;
                }
                TurnOutcome {
                    state: self.state,
                    committed: 0,
                    model_frames: self.model_frames,
                    error: Some(err),
                }
            }
        };

        drop(ctx);
        outcome
    }

    async fn drive(&mut self, ctx: &SessionContext, prompt: String) -> Result<usize, TurnError> {
        let user = MessageRecord::user_prompt(prompt.as_str());
        let echo = to_wire(&user)?;
        self.emit(echo.into()).await?;
        self.transition(TurnState::Echoed);

        let history = ctx.store.read_all().await?;
        let generation = ctx.backend.run_stream(&prompt, &history).await?;
        self.transition(TurnState::Generating);

        let produced = self.stream_model(generation).await?;

        self.transition(TurnState::Committing);
        let mut batch = Vec::with_capacity(produced.len() + 1);
        batch.push(user);
        batch.extend(produced);
        let committed = batch.len();
        ctx.store.append(batch).await?;
        Ok(committed)
    }

    /// Forward debounced snapshots until the backend finishes, then
    /// collect the records it reports.
    ///
    /// Each model message is debounced on its own: a message boundary
    /// flushes the current snapshot and later text starts from empty.
    async fn stream_model(&mut self, mut generation: GenerationStream) -> Result<Vec<MessageRecord>, TurnError> {
        let mut started_at = generation.started_at;
        let mut debouncer = Debouncer::new(self.config.debounce);
        let mut messages = 1;
        let (mut chars, mut snapshots) = (0, 0);

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                biased;
                event = generation.next_event() => match event {
                    Some(Ok(GenerationEvent::Text(text))) => {
                        if self.frames.is_closed() {
                            self.consumer_gone()?;
                        }
                        if let Some(snapshot) = debouncer.push(&text, Instant::now()) {
                            self.emit_model(snapshot, started_at).await?;
                        }
                    }
                    Some(Ok(GenerationEvent::NewMessage(at))) => {
                        if let Some(snapshot) = debouncer.flush() {
                            self.emit_model(snapshot, started_at).await?;
                        }
                        chars += debouncer.text().len();
                        snapshots += debouncer.emitted();
                        debouncer = Debouncer::new(self.config.debounce);
                        started_at = at;
                        messages += 1;
                    }
                    Some(Err(e)) => {
                        if let Some(snapshot) = debouncer.flush() {
                            self.emit_model(snapshot, started_at).await?;
                        }
                        return Err(e.into());
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    if let Some(snapshot) = debouncer.poll(Instant::now()) {
                        self.emit_model(snapshot, started_at).await?;
                    }
                }
            }
        }

        if let Some(snapshot) = debouncer.flush() {
            self.emit_model(snapshot, started_at).await?;
        }
        debug!(
            conversation_id = %self.conversation,
            messages,
            chars = chars + debouncer.text().len(),
            snapshots = snapshots + debouncer.emitted(),
            "Generation finished"
        );
        Ok(generation.finish().await?)
    }

    /// Every snapshot of a model message carries the time that message started.
    async fn emit_model(&mut self, snapshot: String, started_at: DateTime<Utc>) -> Result<(), TurnError> {
        let message = to_wire(&MessageRecord::model_text(snapshot, started_at))?;
        self.model_frames += 1;
        self.emit(message.into()).await
    }

    async fn emit(&mut self, frame: Frame) -> Result<(), TurnError> {
        if self.disconnected {
            return self.consumer_gone();
        }
        if self.frames.send(frame).await.is_err() {
            return self.consumer_gone();
        }
        Ok(())
    }

    /// The client went away. Either keep going silently or give up.
    fn consumer_gone(&mut self) -> Result<(), TurnError> {
        if !self.disconnected {
            self.disconnected = true;
            warn!(
                conversation_id = %self.conversation,
                state = %self.state,
                policy = ?self.config.on_disconnect,
                "Client disconnected"
            );
        }
        match self.config.on_disconnect {
            DisconnectPolicy::Finish => Ok(()),
            DisconnectPolicy::Abandon => Err(TurnError::Abandoned),
        }
    }

    fn transition(&mut self, next: TurnState) {
        debug!(conversation_id = %self.conversation, from = %self.state, to = %next, "Turn state");
        self.state = next;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
