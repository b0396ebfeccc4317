//! Per-conversation session leases.
//!
//! Stores do not coordinate concurrent turns on one conversation. Callers
//! that need "one in-flight turn per conversation" take a lease first and
//! hold it for the life of the turn; dropping it releases the conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use palaver_core::message::ConversationId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>;

/// Holds one slot per conversation with a live or awaited lease.
#[derive(Default)]
pub struct SessionLeases {
    slots: Slots,
}

/// Exclusive hold on a conversation. Released on drop.
#[derive(Debug)]
pub struct SessionLease {
    conversation_id: ConversationId,
    slots: Slots,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLease {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        drop(self.guard.take());
        // Slots are only cloned under the table lock, so two references
        // (the table's and ours) means no one else holds or awaits it.
        if Arc::strong_count(&self.slot) == 2
            && slots
                .get(&self.conversation_id)
                .is_some_and(|s| Arc::ptr_eq(s, &self.slot))
        {
            slots.remove(&self.conversation_id);
        }
    }
}

impl SessionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &ConversationId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(id.clone()).or_default().clone()
    }

    fn lease(&self, id: &ConversationId, slot: Arc<AsyncMutex<()>>, guard: OwnedMutexGuard<()>) -> SessionLease {
        SessionLease {
            conversation_id: id.clone(),
            slots: self.slots.clone(),
            slot,
            guard: Some(guard),
        }
    }

    /// Take the lease if no one holds it.
    pub fn try_acquire(&self, id: &ConversationId) -> Option<SessionLease> {
        let slot = self.slot(id);
        let guard = slot.clone().try_lock_owned().ok()?;
        Some(self.lease(id, slot, guard))
    }

    /// Wait until the lease is free, then take it.
    pub async fn acquire(&self, id: &ConversationId) -> SessionLease {
        let slot = self.slot(id);
        let guard = slot.clone().lock_owned().await;
        self.lease(id, slot, guard)
    }
}
