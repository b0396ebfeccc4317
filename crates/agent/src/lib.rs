//! Turn orchestration for palaver.
//!
//! A turn is one user prompt and everything generated in reply:
//!
//! 1. **Echo** the prompt back to the client
//! 2. **Generate** through a [`Backend`](palaver_core::Backend), streaming
//!    debounced snapshots of the reply
//! 3. **Commit** the prompt and every produced record in one append
//!
//! [`AgentBackend`] is the production backend: a model/tool loop over a
//! [`Provider`](palaver_core::Provider).

pub mod backend;
pub mod debounce;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::AgentBackend;
pub use debounce::Debouncer;
pub use orchestrator::{
    OrchestratorConfig, SessionContext, StreamOrchestrator, TurnError, TurnOutcome, TurnState,
    TurnStream,
};
