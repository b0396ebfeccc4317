//! Backend trait: the generative capability the orchestrator drives.
//!
//! A backend accepts `(prompt, history)` and produces a lazy sequence of text
//! fragments. A backend that writes more than one model message in a turn
//! (text before a tool call, then the answer) marks where each new message
//! starts. After the sequence ends it reports the authoritative list of
//! Message Records it produced, tool traffic included, for the orchestrator
//! to persist. Each model record carries the start time of its message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::error::BackendError;
use crate::record::MessageRecord;

/// Fragment buffer between a backend task and its consumer.
const FRAGMENT_BUFFER: usize = 128;

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Start generating a reply to `prompt` given the prior `history`.
    ///
    /// `history` does not contain the record for `prompt` itself.
    async fn run_stream(
        &self,
        prompt: &str,
        history: &[MessageRecord],
    ) -> Result<GenerationStream, BackendError>;
}

/// One item of a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// More text for the current model message.
    Text(String),
    /// Text from here on belongs to a new model message started at this time.
    NewMessage(DateTime<Utc>),
}

/// Consumer side of one generation.
pub struct GenerationStream {
    /// When the first model message started.
    pub started_at: DateTime<Utc>,
    fragments: mpsc::Receiver<Result<GenerationEvent, BackendError>>,
    records: oneshot::Receiver<Vec<MessageRecord>>,
}

/// Producer side of one generation, held by the backend task.
pub struct GenerationSink {
    fragments: mpsc::Sender<Result<GenerationEvent, BackendError>>,
    records: oneshot::Sender<Vec<MessageRecord>>,
}

impl GenerationStream {
    pub fn channel(started_at: DateTime<Utc>) -> (GenerationSink, GenerationStream) {
        let (frag_tx, frag_rx) = mpsc::channel(FRAGMENT_BUFFER);
        let (rec_tx, rec_rx) = oneshot::channel();
        (
            GenerationSink {
                fragments: frag_tx,
                records: rec_tx,
            },
            GenerationStream {
                started_at,
                fragments: frag_rx,
                records: rec_rx,
            },
        )
    }

    /// Next event. `None` once the backend has stopped producing.
    pub async fn next_event(&mut self) -> Option<Result<GenerationEvent, BackendError>> {
        self.fragments.recv().await
    }

    /// Collect the records the backend produced. Only meaningful once
    /// [`next_event`](Self::next_event) has returned `None`.
    ///
    /// A backend that ends without reporting, or reports no model-authored
    /// record, has violated its contract.
    pub async fn finish(self) -> Result<Vec<MessageRecord>, BackendError> {
        let records = self
            .records
            .await
            .map_err(|_| BackendError::MalformedOutput("backend ended without reporting records".into()))?;

        if !records.iter().any(|r| r.kind().is_model_authored()) {
            return Err(BackendError::MalformedOutput(
                "backend reported no model-authored record".into(),
            ));
        }
        for record in &records {
            record
                .validate()
                .map_err(|e| BackendError::MalformedOutput(e.to_string()))?;
        }
        Ok(records)
    }
}

impl GenerationSink {
    /// Forward a fragment. Returns `false` if the consumer has gone away.
    pub async fn fragment(&self, text: impl Into<String>) -> bool {
        self.fragments.send(Ok(GenerationEvent::Text(text.into()))).await.is_ok()
    }

    /// Start a new model message. Returns `false` if the consumer has gone away.
    pub async fn new_message(&self, started_at: DateTime<Utc>) -> bool {
        self.fragments
            .send(Ok(GenerationEvent::NewMessage(started_at)))
            .await
            .is_ok()
    }

    /// Terminate the generation with an error. No records are reported.
    pub async fn fail(self, err: BackendError) {
        let _ = self.fragments.send(Err(err)).await;
    }

    /// Complete the generation and report the records it produced.
    pub fn finish(self, records: Vec<MessageRecord>) {
        let Self { fragments, records: tx } = self;
        // Report first so the consumer sees the records once fragments end.
        let _ = tx.send(records);
        drop(fragments);
    }
}
