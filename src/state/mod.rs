//! Shared game-state module for Dungeon Lab.
//!
//! - `node` - JSON-shaped tree with identity-carrying containers
//! - `pointer` - JSON pointer relations and index decoding
//! - `patch` - patch operations and batches (wire shape)
//! - `mutator` - in-place batch application with rollback
//! - `store` - canonical root plus path-keyed subscriptions
//! - `inbox` - in-order delivery of sequenced batches
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            ClientState                               │
//! │                                                                      │
//! │  transport ──(seq, batch)──▶ ┌────────────┐                          │
//! │                              │ PatchInbox │ reorder / dedupe         │
//! │                              └─────┬──────┘                          │
//! │                                    │ in-order batches                │
//! │                                    ▼                                 │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │ StateStore                                                     │  │
//! │  │                                                                │  │
//! │  │   root ◀── StateMutator (in place, rollback on failure)        │  │
//! │  │     │                                                          │  │
//! │  │     └── touched pointers ──▶ subscribers keyed by prefix       │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod inbox;
pub mod mutator;
pub mod node;
pub mod patch;
pub mod pointer;
pub mod store;

// Re-export commonly used types
pub use error::{PatchError, PointerError, SyncError};
pub use inbox::{Delivery, InboxConfig, PatchInbox, PendingBatch, DEFAULT_MAX_PENDING};
pub use mutator::{apply_in_place, AppliedBatch, Atomicity, MutatorConfig, StateMutator};
pub use node::{Map, Node};
pub use patch::{OpKind, OperationExt, PatchBatch, PatchOperation};
pub use pointer::{Pointer, PointerBuf, PointerExt};
pub use store::{Notification, StateStore, StoreStats, SubscriptionId};

use serde_json::Value;
use tracing::warn;

/// Combined client-side state: sequencing in front of the store.
///
/// This is an optional convenience struct. The inbox and store can be used
/// on their own.
#[derive(Debug, Default)]
pub struct ClientState {
    pub store: StateStore,
    pub inbox: PatchInbox,
    /// Set when a batch was rejected or the inbox overflowed
    resync_since: Option<u64>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(store: StateStore, inbox: PatchInbox) -> Self {
        Self {
            store,
            inbox,
            resync_since: None,
        }
    }

    /// Whether the client must load a snapshot before taking more patches.
    pub fn needs_resync(&self) -> bool {
        self.resync_since.is_some()
    }

    /// Accept a sequenced batch from the transport and apply whatever is now
    /// deliverable.
    pub fn receive(&mut self, seq: u64, batch: PatchBatch) -> Result<ReceiveResult, SyncError> {
        if let Some(since) = self.resync_since {
            return Err(SyncError::ResyncPending { since });
        }

        match self.inbox.push(seq, batch) {
            Delivery::Ready(ready) => self.apply_ready(ready),
            Delivery::Buffered => Ok(ReceiveResult {
                buffered: true,
                ..ReceiveResult::default()
            }),
            Delivery::Duplicate => Ok(ReceiveResult {
                duplicate: true,
                ..ReceiveResult::default()
            }),
            Delivery::ResyncRequired { expected, .. } => {
                self.resync_since = Some(expected);
                Err(SyncError::ResyncPending { since: expected })
            }
        }
    }

    /// Load an authoritative snapshot taken after batch `seq` and resume.
    pub fn resync(&mut self, seq: u64, snapshot: Value) -> Result<ReceiveResult, SyncError> {
        self.store
            .reset(snapshot)
            .map_err(|source| SyncError::Rejected { seq, source })?;
        self.resync_since = None;
        let ready = self.inbox.resynced(seq);
        self.apply_ready(ready)
    }

    /// Apply a released run in order. On the first failure the batches after
    /// it go back into the inbox, so a snapshot taken before them can replay
    /// them on [`resync`](Self::resync).
    fn apply_ready(&mut self, ready: Vec<PendingBatch>) -> Result<ReceiveResult, SyncError> {
        let mut result = ReceiveResult::default();
        let mut ready = ready.into_iter();
        while let Some(pending) = ready.next() {
            if let Err(source) = self.store.apply(&pending.batch) {
                warn!(seq = pending.seq, error = %source, "patch batch rejected; resync required");
                self.inbox.requeue(ready.collect());
                self.resync_since = Some(pending.seq);
                return Err(SyncError::Rejected {
                    seq: pending.seq,
                    source,
                });
            }
            result.applied.push(pending.seq);
        }
        Ok(result)
    }
}

/// Result of [`ClientState::receive`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveResult {
    /// Sequence numbers applied, in order.
    pub applied: Vec<u64>,
    pub buffered: bool,
    pub duplicate: bool,
}

impl ReceiveResult {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}
