//! State store with path-keyed subscriptions.
//!
//! The store owns the canonical root and is the only code path that mutates
//! it. Subscribers register a pointer prefix; after a batch has been applied
//! in full, each subscriber whose prefix overlaps a touched pointer is called
//! once. A failed batch notifies nobody.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::error::PatchError;
use super::mutator::{AppliedBatch, MutatorConfig, StateMutator};
use super::node::Node;
use super::patch::{PatchBatch, PatchOperation, ReplaceOperation};
use super::pointer::{Pointer, PointerBuf, PointerExt};

/// Handle returned by [`StateStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// What a subscriber is told after a batch.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The prefix the subscriber registered.
    pub prefix: PointerBuf,
    /// Touched pointers overlapping that prefix.
    pub touched: Vec<PointerBuf>,
    /// Handle to the (already updated) root.
    pub root: Node,
}

impl Notification {
    /// Current node at the subscribed prefix, if it still exists.
    pub fn current(&self) -> Option<Node> {
        self.root.pointer(&self.prefix)
    }
}

type Callback = Box<dyn FnMut(&Notification)>;

struct Subscriber {
    id: SubscriptionId,
    prefix: PointerBuf,
    callback: Callback,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("prefix", &self.prefix.as_str())
            .finish_non_exhaustive()
    }
}

/// Counters kept for diagnostics.
///
/// Snapshot loads count as resyncs, not as applied batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub batches_applied: u64,
    pub batches_failed: u64,
    pub resyncs: u64,
    pub last_applied_at: Option<DateTime<Utc>>,
}

/// Owner of the shared game-state tree.
#[derive(Debug)]
pub struct StateStore {
    root: Node,
    mutator: StateMutator,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    stats: StoreStats,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create a store holding an empty mapping.
    pub fn new() -> Self {
        Self::with_config(MutatorConfig::default())
    }

    pub fn with_config(config: MutatorConfig) -> Self {
        Self {
            root: Node::object(),
            mutator: StateMutator::with_config(config),
            subscribers: Vec::new(),
            next_id: 1,
            stats: StoreStats::default(),
        }
    }

    /// Create a store seeded from a snapshot. The snapshot must be a mapping.
    pub fn from_snapshot(snapshot: Value) -> Result<Self, PatchError> {
        let mut store = Self::new();
        store.load(snapshot)?;
        Ok(store)
    }

    /// Handle to the root. Clones alias the live tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Node at `pointer`, if it resolves.
    pub fn get(&self, pointer: &Pointer) -> Option<Node> {
        self.root.pointer(pointer)
    }

    /// Current tree as JSON.
    pub fn snapshot(&self) -> Value {
        self.root.to_json()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Register `callback` for changes at or below `prefix`, or above it.
    pub fn subscribe<F>(&mut self, prefix: PointerBuf, callback: F) -> SubscriptionId
    where
        F: FnMut(&Notification) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        debug!(id = id.0, prefix = prefix.as_str(), "subscriber added");
        self.subscribers.push(Subscriber {
            id,
            prefix,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Apply a batch, then notify affected subscribers.
    pub fn apply(&mut self, batch: &PatchBatch) -> Result<AppliedBatch, PatchError> {
        match self.apply_batch(batch) {
            Ok(applied) => {
                self.stats.batches_applied += 1;
                self.stats.last_applied_at = Some(Utc::now());
                Ok(applied)
            }
            Err(err) => {
                self.stats.batches_failed += 1;
                Err(err)
            }
        }
    }

    /// Replace the whole tree with an authoritative snapshot.
    ///
    /// The root keeps its handle; every subscriber is notified.
    pub fn reset(&mut self, snapshot: Value) -> Result<(), PatchError> {
        self.load(snapshot)?;
        self.stats.resyncs += 1;
        info!(subscribers = self.subscribers.len(), "state resynchronized from snapshot");
        Ok(())
    }

    fn load(&mut self, snapshot: Value) -> Result<(), PatchError> {
        let batch = PatchBatch::from(vec![PatchOperation::Replace(ReplaceOperation {
            path: PointerBuf::root(),
            value: snapshot,
        })]);
        self.apply_batch(&batch).map(drop)
    }

    /// Mutate and notify, without touching the counters.
    fn apply_batch(&mut self, batch: &PatchBatch) -> Result<AppliedBatch, PatchError> {
        let applied = self.mutator.apply(&self.root, batch)?;
        self.notify(&applied);
        Ok(applied)
    }

    fn notify(&mut self, applied: &AppliedBatch) {
        if applied.touched.is_empty() {
            return;
        }
        let mut notified = 0usize;
        for subscriber in &mut self.subscribers {
            let touched: Vec<PointerBuf> = applied
                .touched
                .iter()
                .filter(|p| p.overlaps(&subscriber.prefix))
                .cloned()
                .collect();
            if touched.is_empty() {
                continue;
            }
            let notification = Notification {
                prefix: subscriber.prefix.clone(),
                touched,
                root: self.root.clone(),
            };
            (subscriber.callback)(&notification);
            notified += 1;
        }
        debug!(notified, "subscribers notified");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ptr(s: &str) -> PointerBuf {
        PointerBuf::parse(s).unwrap()
    }

    fn batch(value: Value) -> PatchBatch {
        PatchBatch::from_json(value).unwrap()
    }

    fn recorder(store: &mut StateStore, prefix: &str) -> Rc<RefCell<Vec<Notification>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        store.subscribe(ptr(prefix), move |n| sink.borrow_mut().push(n.clone()));
        log
    }

    fn sample_store() -> StateStore {
        StateStore::from_snapshot(json!({
            "tokens": [{"id": "hero", "x": 1}, {"id": "orc", "x": 5}],
            "turn": {"round": 1, "active": "hero"},
            "board": {"width": 20}
        }))
        .unwrap()
    }

    #[test]
    fn test_only_overlapping_subscribers_fire() {
        let mut store = sample_store();
        let tokens = recorder(&mut store, "/tokens");
        let round = recorder(&mut store, "/turn/round");
        let board = recorder(&mut store, "/board");
        let everything = recorder(&mut store, "");

        store
            .apply(&batch(json!([
                {"op": "replace", "path": "/turn/round", "value": 2},
                {"op": "replace", "path": "/turn/active", "value": "orc"}
            ])))
            .unwrap();

        assert!(tokens.borrow().is_empty());
        assert!(board.borrow().is_empty());
        assert_eq!(round.borrow().len(), 1);
        assert_eq!(round.borrow()[0].touched, vec![ptr("/turn/round")]);
        assert_eq!(round.borrow()[0].current().unwrap().to_json(), json!(2));
        // One notification per batch even with several touched paths
        assert_eq!(everything.borrow().len(), 1);
        assert_eq!(everything.borrow()[0].touched.len(), 2);
    }

    #[test]
    fn test_ancestor_replace_notifies_descendant_subscriber() {
        let mut store = sample_store();
        let round = recorder(&mut store, "/turn/round");

        store
            .apply(&batch(json!([
                {"op": "replace", "path": "/turn", "value": {"round": 9, "active": "hero"}}
            ])))
            .unwrap();

        assert_eq!(round.borrow().len(), 1);
    }

    #[test]
    fn test_sequence_shift_notifies_later_elements() {
        let mut store = sample_store();
        let second = recorder(&mut store, "/tokens/1");

        store
            .apply(&batch(json!([{"op": "remove", "path": "/tokens/0"}])))
            .unwrap();

        assert_eq!(second.borrow().len(), 1);
        assert!(second.borrow()[0].current().is_none());
    }

    #[test]
    fn test_failed_batch_notifies_nobody() {
        let mut store = sample_store();
        let everything = recorder(&mut store, "");
        let before = store.snapshot();

        let err = store
            .apply(&batch(json!([
                {"op": "replace", "path": "/turn/round", "value": 2},
                {"op": "test", "path": "/board/width", "value": 30}
            ])))
            .unwrap_err();

        assert!(matches!(err, PatchError::TestFailed { index: 1, .. }));
        assert!(everything.borrow().is_empty());
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.stats().batches_failed, 1);
    }

    #[test]
    fn test_test_only_batch_notifies_nobody() {
        let mut store = sample_store();
        let everything = recorder(&mut store, "");

        store
            .apply(&batch(json!([{"op": "test", "path": "/board/width", "value": 20}])))
            .unwrap();

        assert!(everything.borrow().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let mut store = sample_store();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let id = store.subscribe(ptr("/board"), move |_| *sink.borrow_mut() += 1);

        store
            .apply(&batch(json!([{"op": "replace", "path": "/board/width", "value": 30}])))
            .unwrap();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store
            .apply(&batch(json!([{"op": "replace", "path": "/board/width", "value": 40}])))
            .unwrap();

        assert_eq!(*count.borrow(), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_reset_keeps_root_handle() {
        let mut store = sample_store();
        let alias = store.root().clone();
        let board = recorder(&mut store, "/board");

        store.reset(json!({"board": {"width": 8}})).unwrap();

        assert!(alias.ptr_eq(store.root()));
        assert_eq!(alias.to_json(), json!({"board": {"width": 8}}));
        assert_eq!(board.borrow().len(), 1);
        assert_eq!(store.stats().resyncs, 1);

        assert!(store.reset(json!([1, 2])).is_err());
        assert_eq!(store.stats().resyncs, 1);
    }

    #[test]
    fn test_subscriber_reads_updated_tree() {
        let mut store = sample_store();
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        store.subscribe(ptr("/tokens/0/x"), move |n| {
            *sink.borrow_mut() = n.current().and_then(|node| node.as_f64());
        });

        store
            .apply(&batch(json!([{"op": "replace", "path": "/tokens/0/x", "value": 3}])))
            .unwrap();

        assert_eq!(*seen.borrow(), Some(3.0));
        assert_eq!(store.stats().batches_applied, 1);
        assert!(store.stats().last_applied_at.is_some());
    }

    #[test]
    fn test_snapshot_loads_are_not_counted_as_batches() {
        let mut store = sample_store();
        assert_eq!(store.stats(), &StoreStats::default());

        store.reset(json!({"board": {"width": 8}})).unwrap();
        assert!(store.reset(json!("not a mapping")).is_err());

        let stats = store.stats();
        assert_eq!(stats.batches_applied, 0);
        assert_eq!(stats.batches_failed, 0);
        assert_eq!(stats.resyncs, 1);
        assert!(stats.last_applied_at.is_none());
    }
}
