//! Patch operations and batches (RFC 6902 wire shape).
//!
//! Operations are `json_patch`'s own types. Decoding goes through
//! [`PatchBatch::from_json`], which validates every pointer up front and
//! reports a bad one with the position of its operation in the batch.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use json_patch::{
    AddOperation, CopyOperation, MoveOperation, Patch, PatchOperation, RemoveOperation,
    ReplaceOperation, TestOperation,
};

use super::error::PatchError;
use super::pointer::{self, Pointer};

/// The six JSON Patch operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Test => "test",
        }
    }

    /// Kind named by a wire `op` field.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            "move" => Some(Self::Move),
            "copy" => Some(Self::Copy),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    fn has_source(&self) -> bool {
        matches!(self, Self::Move | Self::Copy)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accessors shared by every operation variant.
pub trait OperationExt {
    fn kind(&self) -> OpKind;

    /// The `path` pointer.
    fn target(&self) -> &Pointer;

    /// The `from` pointer, for `move` and `copy`.
    fn source(&self) -> Option<&Pointer>;
}

impl OperationExt for PatchOperation {
    fn kind(&self) -> OpKind {
        match self {
            PatchOperation::Add(_) => OpKind::Add,
            PatchOperation::Remove(_) => OpKind::Remove,
            PatchOperation::Replace(_) => OpKind::Replace,
            PatchOperation::Move(_) => OpKind::Move,
            PatchOperation::Copy(_) => OpKind::Copy,
            PatchOperation::Test(_) => OpKind::Test,
        }
    }

    fn target(&self) -> &Pointer {
        match self {
            PatchOperation::Add(op) => &op.path,
            PatchOperation::Remove(op) => &op.path,
            PatchOperation::Replace(op) => &op.path,
            PatchOperation::Move(op) => &op.path,
            PatchOperation::Copy(op) => &op.path,
            PatchOperation::Test(op) => &op.path,
        }
    }

    fn source(&self) -> Option<&Pointer> {
        match self {
            PatchOperation::Move(op) => Some(&op.from),
            PatchOperation::Copy(op) => Some(&op.from),
            _ => None,
        }
    }
}

/// Ordered group of operations applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PatchBatch {
    ops: Vec<PatchOperation>,
}

impl PatchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a batch from a message body.
    pub fn from_json_str(body: &str) -> Result<Self, PatchError> {
        let value: Value = serde_json::from_str(body).map_err(|err| PatchError::InvalidBatch {
            reason: err.to_string(),
        })?;
        Self::from_json(value)
    }

    /// Decode a batch from an already-parsed message.
    ///
    /// A pointer that does not parse is reported as
    /// [`PatchError::MalformedPath`] carrying the operation's index, so the
    /// error reads the same as one raised while applying.
    pub fn from_json(value: Value) -> Result<Self, PatchError> {
        let Value::Array(items) = value else {
            return Err(PatchError::InvalidBatch {
                reason: "expected an array of operations".to_string(),
            });
        };
        let ops = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| decode_op(index, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ops })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.ops).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn push(&mut self, op: PatchOperation) {
        self.ops.push(op);
    }

    /// Builder-style push.
    pub fn with(mut self, op: PatchOperation) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[PatchOperation] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

fn decode_op(index: usize, item: Value) -> Result<PatchOperation, PatchError> {
    let kind = item
        .get("op")
        .and_then(Value::as_str)
        .and_then(OpKind::from_name);

    if let Some(op) = kind {
        let fields: &[&str] = if op.has_source() { &["from", "path"] } else { &["path"] };
        for field in fields {
            let Some(raw) = item.get(*field).and_then(Value::as_str) else {
                continue;
            };
            if let Err(source) = pointer::parse(raw) {
                return Err(PatchError::MalformedPath {
                    index,
                    op,
                    path: raw.to_string(),
                    source,
                });
            }
        }
    }

    serde_json::from_value(item).map_err(|err| PatchError::InvalidOperation {
        index,
        reason: err.to_string(),
    })
}

impl<'de> Deserialize<'de> for PatchBatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(D::Error::custom)
    }
}

impl From<Vec<PatchOperation>> for PatchBatch {
    fn from(ops: Vec<PatchOperation>) -> Self {
        Self { ops }
    }
}

impl From<Patch> for PatchBatch {
    fn from(patch: Patch) -> Self {
        Self { ops: patch.0 }
    }
}

impl From<PatchBatch> for Patch {
    fn from(batch: PatchBatch) -> Self {
        Patch(batch.ops)
    }
}

impl FromIterator<PatchOperation> for PatchBatch {
    fn from_iter<I: IntoIterator<Item = PatchOperation>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PatchBatch {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl IntoIterator for PatchBatch {
    type Item = PatchOperation;
    type IntoIter = std::vec::IntoIter<PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use json_patch::jsonptr::PointerBuf;
    use serde_json::json;

    #[test]
    fn test_decode_wire_batch() {
        let body = r#"[
            {"op": "add", "path": "/tokens/-", "value": {"id": "orc-1"}},
            {"op": "remove", "path": "/tokens/0"},
            {"op": "replace", "path": "/turn", "value": 3},
            {"op": "move", "from": "/a", "path": "/b"},
            {"op": "copy", "from": "/b", "path": "/c"},
            {"op": "test", "path": "/turn", "value": 3}
        ]"#;
        let batch = PatchBatch::from_json_str(body).unwrap();

        assert_eq!(batch.len(), 6);
        let kinds: Vec<OpKind> = batch.iter().map(OperationExt::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OpKind::Add,
                OpKind::Remove,
                OpKind::Replace,
                OpKind::Move,
                OpKind::Copy,
                OpKind::Test
            ]
        );
        match &batch.ops()[0] {
            PatchOperation::Add(op) => assert_eq!(op.value, json!({"id": "orc-1"})),
            other => panic!("unexpected operation: {other:?}"),
        }
        assert_eq!(batch.ops()[3].source().map(Pointer::as_str), Some("/a"));
        assert_eq!(batch.ops()[3].target().as_str(), "/b");
    }

    #[test]
    fn test_decode_null_value() {
        let batch = PatchBatch::from_json_str(r#"[{"op":"add","path":"/x","value":null}]"#).unwrap();
        match &batch.ops()[0] {
            PatchOperation::Add(op) => assert_eq!(op.value, Value::Null),
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_bad_ops() {
        let err = PatchBatch::from_json_str(r#"[{"op":"remove","path":"/x"},{"op":"merge","path":"/x"}]"#)
            .unwrap_err();
        assert!(matches!(err, PatchError::InvalidOperation { index: 1, .. }));

        // Missing value
        assert!(PatchBatch::from_json_str(r#"[{"op":"add","path":"/x"}]"#).is_err());
        // Missing from
        assert!(PatchBatch::from_json_str(r#"[{"op":"move","path":"/x"}]"#).is_err());

        let err = PatchBatch::from_json_str(r#"{"op":"remove","path":"/x"}"#).unwrap_err();
        assert!(matches!(err, PatchError::InvalidBatch { .. }));
        assert_eq!(err.index(), None);

        let err = PatchBatch::from_json_str("[{").unwrap_err();
        assert!(matches!(err, PatchError::InvalidBatch { .. }));
    }

    #[test]
    fn test_decode_malformed_pointer_reports_op_index() {
        let err = PatchBatch::from_json(json!([
            {"op": "test", "path": "/a", "value": 1},
            {"op": "remove", "path": "a"}
        ]))
        .unwrap_err();
        match err {
            PatchError::MalformedPath {
                index, op, path, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(op, OpKind::Remove);
                assert_eq!(path, "a");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The source pointer is checked too
        let err =
            PatchBatch::from_json(json!([{"op": "copy", "from": "/a~9", "path": "/b"}])).unwrap_err();
        match err {
            PatchError::MalformedPath { index, path, .. } => {
                assert_eq!(index, 0);
                assert_eq!(path, "/a~9");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serde_deserialize_uses_batch_decoding() {
        let err = serde_json::from_str::<PatchBatch>(r#"[{"op":"remove","path":"x"}]"#).unwrap_err();
        assert!(err.to_string().contains("malformed path"));

        let batch: PatchBatch = serde_json::from_str(r#"[{"op":"remove","path":"/x"}]"#).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_encode_wire_shape() {
        let batch = PatchBatch::new()
            .with(PatchOperation::Replace(ReplaceOperation {
                path: PointerBuf::parse("/turn").unwrap(),
                value: json!(2),
            }))
            .with(PatchOperation::Move(MoveOperation {
                from: PointerBuf::parse("/a").unwrap(),
                path: PointerBuf::parse("/b").unwrap(),
            }));

        assert_eq!(
            batch.to_json(),
            json!([
                {"op": "replace", "path": "/turn", "value": 2},
                {"op": "move", "from": "/a", "path": "/b"}
            ])
        );
        assert_eq!(PatchBatch::from_json(batch.to_json()).unwrap(), batch);

        let patch: Patch = batch.clone().into();
        assert_eq!(PatchBatch::from(patch), batch);
    }
}
