//! JSON pointers (RFC 6901).
//!
//! Parsing, escaping and index decoding come from `jsonptr` (re-exported by
//! `json_patch`). This module adds the prefix relations the store needs to
//! route notifications, and the mapping from a raw reference token to a
//! sequence position.

use json_patch::jsonptr::index::Index;
use json_patch::jsonptr::Token;
pub use json_patch::jsonptr::{Pointer, PointerBuf};

use super::error::{Fault, PointerError};

/// Prefix relations between pointers.
///
/// Encoded pointer strings are canonical (`~` and `/` always escape the same
/// way), so comparisons work on the encoded form.
pub trait PointerExt {
    /// True when `self` addresses `other` or one of its ancestors.
    fn is_prefix_of(&self, other: &Pointer) -> bool;

    /// True when `self` is a strict ancestor of `other`.
    fn is_proper_prefix_of(&self, other: &Pointer) -> bool;

    /// True when one pointer is an ancestor of (or equal to) the other.
    fn overlaps(&self, other: &Pointer) -> bool;
}

impl PointerExt for Pointer {
    fn is_prefix_of(&self, other: &Pointer) -> bool {
        let (mine, theirs) = (self.as_str(), other.as_str());
        match theirs.strip_prefix(mine) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn is_proper_prefix_of(&self, other: &Pointer) -> bool {
        self.as_str() != other.as_str() && self.is_prefix_of(other)
    }

    fn overlaps(&self, other: &Pointer) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

/// Parse a pointer string, keeping the offending text on failure.
pub fn parse(raw: &str) -> Result<PointerBuf, PointerError> {
    PointerBuf::parse(raw).map_err(|err| PointerError {
        pointer: raw.to_string(),
        reason: err.to_string(),
    })
}

/// Split into parent pointer and final token. `None` for the root.
pub(crate) fn split_last(pointer: &Pointer) -> Option<(&Pointer, Token<'_>)> {
    Some((pointer.parent()?, pointer.last()?))
}

/// Decode a reference token addressing a sequence.
///
/// Tokens that are not indices at all (letters, signs, leading zeros) are a
/// type mismatch. An all-digit token too large for `usize` is simply past
/// the end.
pub(crate) fn sequence_index(token: &Token<'_>) -> Result<Index, Fault> {
    let raw = token.encoded();
    let digits = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit());
    if digits && raw.len() > 1 && raw.starts_with('0') {
        return Err(Fault::TypeMismatch("sequence index has leading zeros"));
    }
    match token.to_index() {
        Ok(index) => Ok(index),
        Err(_) if digits => Err(Fault::NotFound),
        Err(_) => Err(Fault::TypeMismatch("sequence index must be numeric")),
    }
}
