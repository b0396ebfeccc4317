//! History Store implementations for palaver.
//!
//! Every backend implements `palaver_core::HistoryRepository`; the store
//! handles it opens are append-only and batch-atomic.

pub mod in_memory;
pub mod jsonl;
pub mod lease;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::{InMemoryRepository, InMemoryStore};
pub use jsonl::JsonlRepository;
pub use lease::{SessionLease, SessionLeases};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;

use std::sync::Arc;

use palaver_config::HistoryConfig;
use palaver_core::error::PersistenceError;
use palaver_core::record::MessageRecord;
use palaver_core::store::HistoryRepository;
use tracing::info;

/// Reject the whole batch if any record breaks the record invariants.
pub(crate) fn validate_batch(records: &[MessageRecord]) -> Result<(), PersistenceError> {
    for record in records {
        record.validate()?;
    }
    Ok(())
}

/// Open the repository named by `[history]` config.
pub async fn open_repository(
    config: &HistoryConfig,
) -> Result<Arc<dyn HistoryRepository>, PersistenceError> {
    let repo: Arc<dyn HistoryRepository> = match config.backend.as_str() {
        "memory" => Arc::new(InMemoryRepository::new()),
        "jsonl" => Arc::new(JsonlRepository::new(config.resolved_path())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PersistenceError::Unavailable(format!("Failed to create history directory: {e}"))
                })?;
            }
            let url = format!("sqlite://{}", path.display());
            Arc::new(SqliteRepository::new(&url).await?)
        }
        other => {
            return Err(PersistenceError::Unavailable(format!(
                "history backend '{other}' is not available"
            )));
        }
    };
    info!(backend = repo.name(), "History repository opened");
    Ok(repo)
}
