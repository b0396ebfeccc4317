//! JSON-lines history backend.
//!
//! One `<conversation>.jsonl` file per conversation under a directory, one
//! serialized Message Record per line. Human-inspectable and dependency-free.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use palaver_core::error::PersistenceError;
use palaver_core::message::ConversationId;
use palaver_core::record::MessageRecord;
use palaver_core::store::{HistoryRepository, HistoryStore};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub struct JsonlRepository {
    dir: PathBuf,
}

impl JsonlRepository {
    /// Conversations are stored under `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl HistoryRepository for JsonlRepository {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn open(&self, id: &ConversationId) -> Result<Arc<dyn HistoryStore>, PersistenceError> {
        // ConversationId only admits [A-Za-z0-9_-], so it is safe as a file stem.
        let path = self.dir.join(format!("{}.jsonl", id.as_str()));
        Ok(Arc::new(JsonlStore {
            id: id.clone(),
            path,
            write_lock: Mutex::new(()),
        }))
    }
}

pub struct JsonlStore {
    id: ConversationId,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_for_append(&self) -> Result<tokio::fs::File, PersistenceError> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to open {}: {e}", self.path.display())))
    }
}

/// The file operations an append needs beyond writing.
#[async_trait]
trait LogFile: AsyncWrite + Unpin + Send {
    async fn len(&self) -> io::Result<u64>;
    async fn sync(&self) -> io::Result<()>;
    async fn truncate(&self, len: u64) -> io::Result<()>;
}

#[async_trait]
impl LogFile for tokio::fs::File {
    async fn len(&self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn sync(&self) -> io::Result<()> {
        self.sync_data().await
    }

    async fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len).await
    }
}

/// Write and sync `batch`. On failure the file is cut back to its previous
/// length, so a batch is stored whole or not at all.
async fn append_all_or_nothing<F: LogFile>(file: &mut F, batch: &[u8]) -> Result<(), PersistenceError> {
    let committed = file
        .len()
        .await
        .map_err(|e| PersistenceError::Unavailable(format!("Failed to stat history file: {e}")))?;

    let written = match file.write_all(batch).await {
        Ok(()) => file.sync().await.map_err(|e| format!("Sync failed: {e}")),
        Err(e) => Err(format!("Write failed: {e}")),
    };
    let Err(reason) = written else {
        return Ok(());
    };

    if let Err(e) = file.truncate(committed).await {
        error!(error = %e, "Failed to roll back partial append");
        return Err(PersistenceError::Storage(format!("{reason}; rollback failed: {e}")));
    }
    warn!(bytes = batch.len(), "Append rolled back");
    Err(PersistenceError::Storage(reason))
}

#[async_trait]
impl HistoryStore for JsonlStore {
    fn conversation_id(&self) -> &ConversationId {
        &self.id
    }

    async fn append(&self, records: Vec<MessageRecord>) -> Result<(), PersistenceError> {
        crate::validate_batch(&records)?;

        // Serialize everything up front so a failure leaves the file untouched.
        let mut batch = String::new();
        for record in &records {
            let line = serde_json::to_string(record)
                .map_err(|e| PersistenceError::Storage(format!("Record serialization: {e}")))?;
            batch.push_str(&line);
            batch.push('\n');
        }

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PersistenceError::Unavailable(format!("Failed to create history directory: {e}"))
            })?;
        }

        let mut file = self.open_for_append().await?;
        append_all_or_nothing(&mut file, batch.as_bytes()).await?;

        debug!(conversation_id = %self.id, records = records.len(), "Appended to JSONL history");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<MessageRecord>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::Unavailable(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| PersistenceError::Corrupt {
                    row: i as i64 + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
