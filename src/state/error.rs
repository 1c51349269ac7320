//! Patch decoding and application errors.

use thiserror::Error;

use super::patch::OpKind;

/// A pointer string that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pointer {pointer:?}: {reason}")]
pub struct PointerError {
    pub pointer: String,
    pub reason: String,
}

/// Failure while decoding or applying a patch batch.
///
/// Operation-level variants carry the index of the failing operation within
/// its batch and the kind of that operation, so the caller can report it
/// before asking the authority for a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("op #{index} ({op}): malformed path {path:?}: {source}")]
    MalformedPath {
        index: usize,
        op: OpKind,
        path: String,
        source: PointerError,
    },

    #[error("op #{index} ({op}): path not found: {path:?}")]
    PathNotFound {
        index: usize,
        op: OpKind,
        path: String,
    },

    #[error("op #{index} ({op}): test failed at {path:?}")]
    TestFailed {
        index: usize,
        op: OpKind,
        path: String,
    },

    #[error("op #{index} ({op}): type mismatch at {path:?}: {reason}")]
    TypeMismatch {
        index: usize,
        op: OpKind,
        path: String,
        reason: &'static str,
    },

    #[error("op #{index} ({op}): cannot move {from:?} into its own child {path:?}")]
    InvalidMove {
        index: usize,
        op: OpKind,
        from: String,
        path: String,
    },

    #[error("op #{index}: invalid operation: {reason}")]
    InvalidOperation { index: usize, reason: String },

    #[error("invalid patch batch: {reason}")]
    InvalidBatch { reason: String },
}

impl PatchError {
    /// Index of the failing operation within its batch.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::MalformedPath { index, .. }
            | Self::PathNotFound { index, .. }
            | Self::TestFailed { index, .. }
            | Self::TypeMismatch { index, .. }
            | Self::InvalidMove { index, .. }
            | Self::InvalidOperation { index, .. } => Some(*index),
            Self::InvalidBatch { .. } => None,
        }
    }

    /// Kind of the failing operation, when it is known.
    pub fn op(&self) -> Option<OpKind> {
        match self {
            Self::MalformedPath { op, .. }
            | Self::PathNotFound { op, .. }
            | Self::TestFailed { op, .. }
            | Self::TypeMismatch { op, .. }
            | Self::InvalidMove { op, .. } => Some(*op),
            Self::InvalidOperation { .. } | Self::InvalidBatch { .. } => None,
        }
    }
}

/// Failure while feeding sequenced batches into a client's state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A batch failed to apply; the client must load a snapshot.
    #[error("patch batch #{seq} rejected: {source}")]
    Rejected { seq: u64, source: PatchError },

    /// The client is waiting for a snapshot and cannot take patches.
    #[error("resync pending since batch #{since}")]
    ResyncPending { since: u64 },
}

/// Location-free failure raised while walking the tree. The mutator attaches
/// the operation index and kind before surfacing it as a [`PatchError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    NotFound,
    TestFailed,
    TypeMismatch(&'static str),
    InvalidMove,
}
