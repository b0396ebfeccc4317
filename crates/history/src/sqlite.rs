//! SQLite history backend.
//!
//! All conversations share one `messages` table. Each row holds one
//! serialized Message Record; the autoincrement `id` is the append order.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use palaver_core::error::PersistenceError;
use palaver_core::message::ConversationId;
use palaver_core::record::MessageRecord;
use palaver_core::store::{HistoryRepository, HistoryStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// Opens per-conversation stores over one SQLite database.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool_options = if path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let repo = Self::from_pool(pool).await?;
        info!("SQLite history initialized at {path}");
        Ok(repo)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        let repo = Self { pool };
        repo.run_migrations().await?;
        Ok(repo)
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                record          TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("conversation index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for SqliteRepository {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open(&self, id: &ConversationId) -> Result<Arc<dyn HistoryStore>, PersistenceError> {
        Ok(Arc::new(SqliteStore {
            id: id.clone(),
            pool: self.pool.clone(),
        }))
    }
}

/// One conversation's view of the shared table.
pub struct SqliteStore {
    id: ConversationId,
    pool: SqlitePool,
}

#[async_trait]
impl HistoryStore for SqliteStore {
    fn conversation_id(&self) -> &ConversationId {
        &self.id
    }

    async fn append(&self, records: Vec<MessageRecord>) -> Result<(), PersistenceError> {
        crate::validate_batch(&records)?;

        let rows = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PersistenceError::Storage(format!("Record serialization: {e}")))?;
        let created_at = Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("Begin transaction: {e}")))?;

        for row in &rows {
            sqlx::query("INSERT INTO messages (conversation_id, record, created_at) VALUES (?1, ?2, ?3)")
                .bind(self.id.as_str())
                .bind(row)
                .bind(&created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Storage(format!("Insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Storage(format!("Commit failed: {e}")))?;

        debug!(conversation_id = %self.id, records = rows.len(), "Appended to SQLite history");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<MessageRecord>, PersistenceError> {
        let rows = sqlx::query("SELECT id, record FROM messages WHERE conversation_id = ?1 ORDER BY id")
            .bind(self.id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("Query failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| PersistenceError::Storage(format!("id column: {e}")))?;
                let raw: String = row.try_get("record").map_err(|e| PersistenceError::Corrupt {
                    row: id,
                    reason: format!("record column: {e}"),
                })?;
                serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                    row: id,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::record::{RequestPart, RequestRecord, ResponsePart, ResponseRecord};

    async fn test_repo() -> SqliteRepository {
        SqliteRepository::new("sqlite::memory:").await.unwrap()
    }

    fn tool_turn() -> Vec<MessageRecord> {
        let now = Utc::now();
        vec![
            MessageRecord::user_prompt("What's the weather in Oslo?"),
            MessageRecord::Response(ResponseRecord {
                parts: vec![ResponsePart::ToolInvocation {
                    tool_name: "get_current_weather".into(),
                    call_id: "call_1".into(),
                    args: serde_json::json!({"location": "Oslo"}),
                }],
                timestamp: now,
                model_name: Some("gpt-4o".into()),
            }),
            MessageRecord::Request(RequestRecord {
                parts: vec![RequestPart::ToolResult {
                    tool_name: "get_current_weather".into(),
                    call_id: "call_1".into(),
                    content: serde_json::json!("Weather in Oslo: Snow -3°C"),
                    timestamp: now,
                }],
            }),
            MessageRecord::model_text("It's snowing in Oslo.", now),
        ]
    }

    #[tokio::test]
    async fn append_preserves_order_and_content() {
        let repo = test_repo().await;
        let store = repo.open(&ConversationId::default()).await.unwrap();
        let turn = tool_turn();
        store.append(turn.clone()).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), turn);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let repo = test_repo().await;
        let a = repo.open(&ConversationId::parse("a").unwrap()).await.unwrap();
        let b = repo.open(&ConversationId::parse("b").unwrap()).await.unwrap();

        a.append(vec![MessageRecord::user_prompt("for a")]).await.unwrap();
        b.append(vec![MessageRecord::user_prompt("for b")]).await.unwrap();
        a.append(vec![MessageRecord::model_text("reply a", Utc::now())])
            .await
            .unwrap();

        let a_records = a.read_all().await.unwrap();
        assert_eq!(a_records.len(), 2);
        assert_eq!(a_records[0].user_part().map(|(c, _)| c), Some("for a"));
        assert_eq!(b.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_batch_writes_nothing() {
        let repo = test_repo().await;
        let store = repo.open(&ConversationId::default()).await.unwrap();
        let err = store
            .append(vec![
                MessageRecord::user_prompt("hello"),
                MessageRecord::Response(ResponseRecord {
                    parts: vec![],
                    timestamp: Utc::now(),
                    model_name: None,
                }),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Rejected(_)));
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_row_is_reported() {
        let repo = test_repo().await;
        sqlx::query("INSERT INTO messages (conversation_id, record, created_at) VALUES ('default', 'not json', '')")
            .execute(&repo.pool)
            .await
            .unwrap();

        let store = repo.open(&ConversationId::default()).await.unwrap();
        let err = store.read_all().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { row: 1, .. }));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("history.db").display());

        {
            let repo = SqliteRepository::new(&path).await.unwrap();
            let store = repo.open(&ConversationId::default()).await.unwrap();
            store.append(tool_turn()).await.unwrap();
        }

        let repo = SqliteRepository::new(&path).await.unwrap();
        let store = repo.open(&ConversationId::default()).await.unwrap();
        assert_eq!(store.read_all().await.unwrap().len(), 4);
    }
}
