//! Error types for the palaver domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; the top-level [`Error`]
//! wraps them all.

use thiserror::Error;

use crate::record::RecordKind;

/// The top-level error type for all palaver operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- History ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // --- Projection ---
    #[error(transparent)]
    Unrepresentable(#[from] UnrepresentableRecord),

    // --- Input ---
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Transport-level failures talking to an LLM endpoint.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Generation-time failures. Terminates a turn with an error frame; never retried.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("malformed backend output: {0}")]
    MalformedOutput(String),

    #[error("gave up after {iterations} model rounds without a final answer")]
    IterationLimit { iterations: u32 },

    #[error("backend stream closed before completion")]
    Disconnected,
}

/// Commit-time or read-time failures of a History Store.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("corrupt history row {row}: {reason}")]
    Corrupt { row: i64, reason: String },

    #[error("record rejected: {0}")]
    Rejected(#[from] InvalidRecord),

    #[error("migration failed: {0}")]
    MigrationFailed(String),
}

/// A record that has no client-facing Wire Message projection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrepresentable {kind} record: {reason}")]
pub struct UnrepresentableRecord {
    pub kind: RecordKind,
    pub reason: String,
}

impl UnrepresentableRecord {
    pub fn new(kind: RecordKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// A record whose shape breaks the Message Record invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    #[error("record has no parts")]
    Empty,

    #[error("{kind} record is missing a {expected} part")]
    KindMismatch {
        kind: RecordKind,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
