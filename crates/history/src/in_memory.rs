//! In-memory history: useful for testing and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use palaver_core::error::PersistenceError;
use palaver_core::message::ConversationId;
use palaver_core::record::MessageRecord;
use palaver_core::store::{HistoryRepository, HistoryStore};
use tokio::sync::RwLock;

type Log = Arc<RwLock<Vec<MessageRecord>>>;

/// Process-local conversations, lost on exit.
#[derive(Default)]
pub struct InMemoryRepository {
    conversations: RwLock<HashMap<ConversationId, Log>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryRepository {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, id: &ConversationId) -> Result<Arc<dyn HistoryStore>, PersistenceError> {
        let log = self
            .conversations
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .clone();
        Ok(Arc::new(InMemoryStore {
            id: id.clone(),
            log,
        }))
    }
}

/// One conversation's log. Handles opened for the same id share it.
pub struct InMemoryStore {
    id: ConversationId,
    log: Log,
}

impl InMemoryStore {
    /// A standalone store not tracked by any repository.
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            log: Log::default(),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn conversation_id(&self) -> &ConversationId {
        &self.id
    }

    async fn append(&self, records: Vec<MessageRecord>) -> Result<(), PersistenceError> {
        crate::validate_batch(&records)?;
        self.log.write().await.extend(records);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<MessageRecord>, PersistenceError> {
        Ok(self.log.read().await.clone())
    }
}
