//! In-place patch application.
//!
//! The mutator walks each operation's path down to its terminal container by
//! following shared handles, then edits only that container's entry. Ancestors
//! are never rebuilt, so every node outside the touched paths keeps its
//! identity.
//!
//! # Atomicity
//!
//! With [`Atomicity::Rollback`] (the default) each edit records its inverse.
//! When an operation fails, the inverses are replayed newest-first, which puts
//! the original handles back: the tree is restored to its pre-call state down
//! to node identity. [`Atomicity::Partial`] skips the log; operations before
//! the failing one stay applied and the caller is expected to resync.

use std::mem;
use std::rc::Rc;

use json_patch::jsonptr::index::Index;
use json_patch::jsonptr::Token;
use tracing::{debug, trace, warn};

use super::error::{Fault, PatchError};
use super::node::{ArrayHandle, Map, MapHandle, Node};
use super::patch::{OperationExt, PatchBatch, PatchOperation};
use super::pointer::{sequence_index, split_last, Pointer, PointerBuf, PointerExt};

/// What happens to earlier operations when one in the batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Atomicity {
    /// Undo everything the batch did.
    #[default]
    Rollback,
    /// Leave earlier operations applied.
    Partial,
}

/// Mutator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutatorConfig {
    pub atomicity: Atomicity,
}

/// Report of a successfully applied batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    /// Number of operations applied.
    pub ops_applied: usize,
    /// Pointers whose content may have changed, in application order.
    ///
    /// Inserting into or removing from a sequence shifts later elements, so
    /// those edits report the sequence itself.
    pub touched: Vec<PointerBuf>,
}

impl AppliedBatch {
    /// True when at least one touched pointer overlaps `prefix`.
    pub fn touches(&self, prefix: &Pointer) -> bool {
        self.touched.iter().any(|p| p.overlaps(prefix))
    }
}

/// Applies patch batches to a state tree in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMutator {
    config: MutatorConfig,
}

impl StateMutator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MutatorConfig) -> Self {
        Self { config }
    }

    /// Apply every operation of `batch` to `root`, in order.
    ///
    /// `root` must be a mapping. On failure the returned error names the
    /// failing operation; what remains applied depends on the configured
    /// [`Atomicity`].
    pub fn apply(&self, root: &Node, batch: &PatchBatch) -> Result<AppliedBatch, PatchError> {
        debug!(ops = batch.len(), "applying patch batch");

        let mut pass = Pass {
            root,
            journal: Journal::new(self.config.atomicity == Atomicity::Rollback),
            touched: Vec::new(),
        };

        for (index, op) in batch.iter().enumerate() {
            trace!(index, op = %op.kind(), path = op.target().as_str(), "applying patch operation");
            if let Err(fault) = pass.apply_op(op) {
                let err = locate(fault, index, op);
                warn!(
                    index,
                    op = %op.kind(),
                    error = %err,
                    atomicity = ?self.config.atomicity,
                    "patch batch failed"
                );
                pass.journal.rollback();
                return Err(err);
            }
        }

        debug!(touched = pass.touched.len(), "patch batch applied");
        Ok(AppliedBatch {
            ops_applied: batch.len(),
            touched: pass.touched,
        })
    }
}

/// Apply `batch` to `root` with the default configuration.
pub fn apply_in_place(root: &Node, batch: &PatchBatch) -> Result<AppliedBatch, PatchError> {
    StateMutator::new().apply(root, batch)
}

fn locate(fault: Fault, index: usize, op: &PatchOperation) -> PatchError {
    let kind = op.kind();
    let path = op.target().as_str().to_string();
    match fault {
        Fault::NotFound => PatchError::PathNotFound {
            index,
            op: kind,
            path,
        },
        Fault::TestFailed => PatchError::TestFailed {
            index,
            op: kind,
            path,
        },
        Fault::TypeMismatch(reason) => PatchError::TypeMismatch {
            index,
            op: kind,
            path,
            reason,
        },
        Fault::InvalidMove => PatchError::InvalidMove {
            index,
            op: kind,
            from: op
                .source()
                .map(|from| from.as_str().to_string())
                .unwrap_or_default(),
            path,
        },
    }
}

/// Inverse of a single container edit.
enum Undo {
    /// Restore a mapping entry; `None` removes the key.
    MapEntry {
        map: MapHandle,
        key: String,
        previous: Option<Node>,
    },
    /// Re-insert an element removed from a sequence.
    ArrayInsert {
        items: ArrayHandle,
        index: usize,
        node: Node,
    },
    /// Remove an element inserted into a sequence.
    ArrayRemove { items: ArrayHandle, index: usize },
    /// Restore an overwritten sequence element.
    ArraySet {
        items: ArrayHandle,
        index: usize,
        previous: Node,
    },
    /// Restore the root's entries after a whole-document replace.
    RootEntries { map: MapHandle, previous: Map },
}

impl Undo {
    fn revert(self) {
        match self {
            Self::MapEntry { map, key, previous } => {
                let mut map = map.borrow_mut();
                match previous {
                    Some(node) => {
                        map.insert(key, node);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
            Self::ArrayInsert { items, index, node } => items.borrow_mut().insert(index, node),
            Self::ArrayRemove { items, index } => {
                items.borrow_mut().remove(index);
            }
            Self::ArraySet {
                items,
                index,
                previous,
            } => items.borrow_mut()[index] = previous,
            Self::RootEntries { map, previous } => *map.borrow_mut() = previous,
        }
    }
}

struct Journal {
    enabled: bool,
    entries: Vec<Undo>,
}

impl Journal {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
        }
    }

    fn record(&mut self, undo: Undo) {
        if self.enabled {
            self.entries.push(undo);
        }
    }

    fn rollback(&mut self) {
        if !self.entries.is_empty() {
            debug!(edits = self.entries.len(), "rolling back patch batch");
        }
        while let Some(undo) = self.entries.pop() {
            undo.revert();
        }
    }
}

/// State of one `apply` call.
struct Pass<'a> {
    root: &'a Node,
    journal: Journal,
    touched: Vec<PointerBuf>,
}

impl Pass<'_> {
    fn apply_op(&mut self, op: &PatchOperation) -> Result<(), Fault> {
        match op {
            PatchOperation::Add(op) => self.add(&op.path, Node::from(op.value.clone())),
            PatchOperation::Remove(op) => self.remove(&op.path).map(drop),
            PatchOperation::Replace(op) => self.replace(&op.path, Node::from(op.value.clone())),
            PatchOperation::Move(op) => {
                if op.from.as_str() == op.path.as_str() {
                    return self.resolve(&op.from).map(drop);
                }
                if op.from.is_proper_prefix_of(&op.path) {
                    return Err(Fault::InvalidMove);
                }
                let node = self.remove(&op.from)?;
                self.add(&op.path, node)
            }
            PatchOperation::Copy(op) => {
                let node = self.resolve(&op.from)?.deep_clone();
                self.add(&op.path, node)
            }
            PatchOperation::Test(op) => {
                let node = self.resolve(&op.path)?;
                if node.deep_eq(&Node::from(op.value.clone())) {
                    Ok(())
                } else {
                    Err(Fault::TestFailed)
                }
            }
        }
    }

    /// Follow `pointer` from the root, returning a handle to the node found.
    fn resolve(&self, pointer: &Pointer) -> Result<Node, Fault> {
        let mut current = self.root.clone();
        for token in pointer.tokens() {
            let next = match &current {
                Node::Object(map) => map.borrow().get(&*token.decoded()).cloned(),
                Node::Array(items) => match sequence_index(&token)? {
                    Index::Num(i) => items.borrow().get(i).cloned(),
                    Index::Next => None,
                },
                _ => return Err(Fault::TypeMismatch("cannot descend into a scalar")),
            };
            current = next.ok_or(Fault::NotFound)?;
        }
        Ok(current)
    }

    fn add(&mut self, path: &Pointer, node: Node) -> Result<(), Fault> {
        let Some((parent, key)) = split_last(path) else {
            return self.swap_root(node);
        };
        match self.resolve(parent)? {
            Node::Object(map) => {
                let key = key.decoded().into_owned();
                let previous = map.borrow_mut().insert(key.clone(), node);
                self.journal.record(Undo::MapEntry { map, key, previous });
                self.touched.push(path.to_buf());
            }
            Node::Array(items) => {
                let len = items.borrow().len();
                let index = match sequence_index(&key)? {
                    Index::Next => len,
                    Index::Num(i) if i <= len => i,
                    Index::Num(_) => return Err(Fault::NotFound),
                };
                items.borrow_mut().insert(index, node);
                self.journal.record(Undo::ArrayRemove { items, index });
                self.touched.push(parent.to_buf());
            }
            _ => return Err(Fault::TypeMismatch("parent is not a container")),
        }
        Ok(())
    }

    fn remove(&mut self, path: &Pointer) -> Result<Node, Fault> {
        let Some((parent, key)) = split_last(path) else {
            return Err(Fault::TypeMismatch("cannot remove the root"));
        };
        match self.resolve(parent)? {
            Node::Object(map) => {
                let key = key.decoded().into_owned();
                let removed = map.borrow_mut().remove(&key).ok_or(Fault::NotFound)?;
                self.journal.record(Undo::MapEntry {
                    map,
                    key,
                    previous: Some(removed.clone()),
                });
                self.touched.push(path.to_buf());
                Ok(removed)
            }
            Node::Array(items) => {
                let index = existing_index(&key, items.borrow().len())?;
                let removed = items.borrow_mut().remove(index);
                self.journal.record(Undo::ArrayInsert {
                    items,
                    index,
                    node: removed.clone(),
                });
                self.touched.push(parent.to_buf());
                Ok(removed)
            }
            _ => Err(Fault::TypeMismatch("parent is not a container")),
        }
    }

    fn replace(&mut self, path: &Pointer, node: Node) -> Result<(), Fault> {
        let Some((parent, key)) = split_last(path) else {
            return self.swap_root(node);
        };
        match self.resolve(parent)? {
            Node::Object(map) => {
                let key = key.decoded().into_owned();
                let previous = {
                    let mut entries = map.borrow_mut();
                    let slot = entries.get_mut(&key).ok_or(Fault::NotFound)?;
                    mem::replace(slot, node)
                };
                self.journal.record(Undo::MapEntry {
                    map,
                    key,
                    previous: Some(previous),
                });
            }
            Node::Array(items) => {
                let index = existing_index(&key, items.borrow().len())?;
                let previous = mem::replace(&mut items.borrow_mut()[index], node);
                self.journal.record(Undo::ArraySet {
                    items,
                    index,
                    previous,
                });
            }
            _ => return Err(Fault::TypeMismatch("parent is not a container")),
        }
        self.touched.push(path.to_buf());
        Ok(())
    }

    /// Whole-document add/replace: swap the root's entries, keep its handle.
    ///
    /// The incoming mapping is copied one level deep rather than drained, so
    /// a node moved here from inside the tree is still intact if the batch
    /// later rolls back.
    fn swap_root(&mut self, node: Node) -> Result<(), Fault> {
        let Node::Object(root) = self.root else {
            return Err(Fault::TypeMismatch("root is not a mapping"));
        };
        let Node::Object(incoming) = node else {
            return Err(Fault::TypeMismatch("root can only be replaced by a mapping"));
        };
        if Rc::ptr_eq(root, &incoming) {
            self.touched.push(PointerBuf::root());
            return Ok(());
        }
        let entries = incoming.borrow().clone();
        let previous = mem::replace(&mut *root.borrow_mut(), entries);
        self.journal.record(Undo::RootEntries {
            map: root.clone(),
            previous,
        });
        self.touched.push(PointerBuf::root());
        Ok(())
    }
}

/// Index of an existing element; `-` never addresses one.
fn existing_index(token: &Token<'_>, len: usize) -> Result<usize, Fault> {
    match sequence_index(token)? {
        Index::Num(i) if i < len => Ok(i),
        _ => Err(Fault::NotFound),
    }
}
