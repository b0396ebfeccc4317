//! # Palaver Core
//!
//! Domain types, traits, and error definitions for the palaver session engine.
//! It has **no web or storage framework dependencies**; it defines the
//! message model and the collaborator seams that all other crates implement
//! against.
//!
//! ## Layout
//!
//! - [`record`]: Message Records, the canonical unit of history
//! - [`wire`]: projection of records into client-facing frames
//! - [`store`]: append-only History Store traits
//! - [`backend`]: the generative capability the orchestrator drives
//! - [`provider`] / [`tool`]: what a model-backed backend is built from

pub mod backend;
pub mod error;
pub mod message;
pub mod provider;
pub mod record;
pub mod store;
pub mod tool;
pub mod wire;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, GenerationEvent, GenerationSink, GenerationStream};
pub use error::{
    BackendError, Error, InvalidRecord, PersistenceError, ProviderError, Result, ToolError,
    UnrepresentableRecord,
};
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use record::{MessageRecord, RecordKind, RequestPart, RequestRecord, ResponsePart, ResponseRecord};
pub use store::{HistoryRepository, HistoryStore};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use wire::{ErrorFrame, Frame, Projection, WireMessage, WireRole};
