//! Dungeon Lab State Library
//!
//! This crate keeps the shared game state of a Dungeon Lab session in sync
//! with the server by applying JSON Patch batches in place.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **State Tree** - JSON-shaped nodes whose containers carry an identity,
//!   so observers can tell which parts of the tree actually changed.
//!
//! - **State Mutator** - Applies an ordered patch batch in place. Only the
//!   containers on each operation's path are edited; a failing batch is rolled
//!   back to the exact pre-call tree.
//!
//! - **State Store** - Owns the root and notifies subscribers keyed by pointer
//!   prefix once a batch has fully applied.
//!
//! - **Patch Inbox** - Releases sequenced batches from the transport in order.
//!
//! # Design Principles
//!
//! 1. **Mutate minimally** - Untouched nodes keep their identity.
//!
//! 2. **Batches are atomic to observers** - Nobody is notified mid-batch or
//!    after a failed batch.
//!
//! 3. **No networking** - This crate is pure state, no WebSocket or HTTP.
//!
//! 4. **Single writer** - The tree is `!Send`; every mutation goes through
//!    `&mut StateStore`.
//!
//! # Example
//!
//! ```rust
//! use dungeon_state::state::{PatchBatch, PointerBuf, StateStore};
//! use serde_json::json;
//! use std::{cell::Cell, rc::Rc};
//!
//! let mut store = StateStore::from_snapshot(json!({
//!     "tokens": [{"id": "hero", "x": 1}],
//!     "turn": {"round": 1}
//! }))
//! .unwrap();
//!
//! let tokens_before = store.get(&PointerBuf::parse("/tokens").unwrap()).unwrap();
//!
//! let rounds = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&rounds);
//! store.subscribe(PointerBuf::parse("/turn").unwrap(), move |_| seen.set(seen.get() + 1));
//!
//! let batch = PatchBatch::from_json_str(r#"[
//!     {"op": "test", "path": "/turn/round", "value": 1},
//!     {"op": "replace", "path": "/turn/round", "value": 2}
//! ]"#)
//! .unwrap();
//! store.apply(&batch).unwrap();
//!
//! assert_eq!(store.snapshot()["turn"]["round"], 2);
//! assert_eq!(rounds.get(), 1);
//!
//! // The untouched token list is the very same container.
//! let tokens_after = store.get(&PointerBuf::parse("/tokens").unwrap()).unwrap();
//! assert!(tokens_after.ptr_eq(&tokens_before));
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
