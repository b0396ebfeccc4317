//! History Store traits: append-only persistence of Message Records.
//!
//! A [`HistoryStore`] is bound to exactly one conversation. A
//! [`HistoryRepository`] hands out stores by conversation identity and owns
//! the backing medium (database pool, directory, in-process map).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::message::ConversationId;
use crate::record::MessageRecord;

/// Ordered, append-only log of one conversation's records.
///
/// Implementations must make `append` atomic as a batch: either every record
/// in the call becomes visible to subsequent reads, in order, or none does.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The conversation this store is bound to.
    fn conversation_id(&self) -> &ConversationId;

    /// Append all records to the end of the log, preserving their order.
    async fn append(&self, records: Vec<MessageRecord>) -> Result<(), PersistenceError>;

    /// Every record in append order. Empty for an unseen conversation.
    async fn read_all(&self) -> Result<Vec<MessageRecord>, PersistenceError>;
}

/// Opens per-conversation History Stores over a shared backing medium.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Backend name (e.g. "sqlite", "jsonl", "memory").
    fn name(&self) -> &str;

    /// Acquire the store for a conversation, creating it empty if unseen.
    async fn open(&self, id: &ConversationId) -> Result<Arc<dyn HistoryStore>, PersistenceError>;
}
