//! Sequenced patch inbox.
//!
//! The authority stamps every patch batch with a sequence number starting at
//! 1. The inbox hands batches on strictly in that order, drops duplicates and
//! holds a bounded number of early arrivals while it waits for a gap to fill.
//! When the buffer overflows the client has fallen too far behind and must
//! load a full snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::patch::PatchBatch;

/// Default number of out-of-order batches held while waiting for a gap.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Inbox configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxConfig {
    /// Early arrivals held before giving up and requesting a resync.
    pub max_pending: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// A batch waiting for delivery.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub seq: u64,
    pub batch: PatchBatch,
    pub received_at: DateTime<Utc>,
}

/// Outcome of [`PatchInbox::push`].
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Batches now deliverable, in sequence order.
    Ready(Vec<PendingBatch>),
    /// Early arrival, held until the gap before it fills.
    Buffered,
    /// Already delivered or already buffered.
    Duplicate,
    /// Too many early arrivals; buffered batches were discarded.
    ResyncRequired { expected: u64, received: u64 },
}

/// Reorders incoming batches by sequence number.
#[derive(Debug, Default)]
pub struct PatchInbox {
    config: InboxConfig,

    /// Sequence of the last batch handed on
    last_delivered: u64,

    /// Early arrivals by sequence
    pending: BTreeMap<u64, PendingBatch>,
}

impl PatchInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InboxConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Sequence number the inbox is waiting for.
    pub fn expected_seq(&self) -> u64 {
        self.last_delivered + 1
    }

    pub fn last_delivered(&self) -> u64 {
        self.last_delivered
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Accept a batch from the transport.
    pub fn push(&mut self, seq: u64, batch: PatchBatch) -> Delivery {
        if seq <= self.last_delivered || self.pending.contains_key(&seq) {
            debug!(seq, last_delivered = self.last_delivered, "duplicate patch batch dropped");
            return Delivery::Duplicate;
        }

        let entry = PendingBatch {
            seq,
            batch,
            received_at: Utc::now(),
        };

        if seq == self.expected_seq() {
            let mut ready = vec![entry];
            self.last_delivered = seq;
            ready.extend(self.drain_ready());
            return Delivery::Ready(ready);
        }

        if self.pending.len() >= self.config.max_pending {
            let expected = self.expected_seq();
            warn!(
                expected,
                received = seq,
                pending = self.pending.len(),
                "patch inbox overflowed; resync required"
            );
            self.pending.clear();
            return Delivery::ResyncRequired {
                expected,
                received: seq,
            };
        }

        debug!(seq, expected = self.expected_seq(), "early patch batch buffered");
        self.pending.insert(seq, entry);
        Delivery::Buffered
    }

    /// Restart sequencing after a full snapshot taken at `seq`.
    ///
    /// Buffered batches at or before `seq` are stale and dropped; any that
    /// directly follow it are returned for delivery.
    pub fn resynced(&mut self, seq: u64) -> Vec<PendingBatch> {
        self.last_delivered = seq;
        self.pending = self.pending.split_off(&(seq + 1));
        self.drain_ready()
    }

    /// Put back batches that were released but never applied.
    ///
    /// Sequencing rewinds to just before the earliest of them, so a later
    /// [`resynced`](Self::resynced) releases them again if the snapshot
    /// predates them.
    pub fn requeue(&mut self, batches: Vec<PendingBatch>) {
        let Some(first) = batches.iter().map(|b| b.seq).min() else {
            return;
        };
        debug!(count = batches.len(), first, "patch batches requeued");
        self.last_delivered = self.last_delivered.min(first.saturating_sub(1));
        for entry in batches {
            self.pending.insert(entry.seq, entry);
        }
    }

    fn drain_ready(&mut self) -> Vec<PendingBatch> {
        let mut ready = Vec::new();
        loop {
            let next = self.expected_seq();
            let Some(entry) = self.pending.remove(&next) else {
                return ready;
            };
            self.last_delivered = entry.seq;
            ready.push(entry);
        }
    }
}
