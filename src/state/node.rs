//! State tree nodes.
//!
//! A [`Node`] is JSON-shaped. Scalars are stored inline; mappings and
//! sequences live behind shared handles so that a container has an identity
//! that survives edits to its contents. Cloning a `Node` clones the handle:
//! both clones observe the same container, and [`Node::ptr_eq`] reports them
//! as identical. Use [`Node::deep_clone`] for an independent copy.
//!
//! Trees must stay acyclic. The mutator never inserts a container beneath
//! itself, but code that builds trees by hand from shared handles can.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use json_patch::jsonptr::index::Index;

use super::pointer::{sequence_index, Pointer};

/// Entries of a mapping node.
pub type Map = BTreeMap<String, Node>;

/// Shared handle to a mapping.
pub type MapHandle = Rc<RefCell<Map>>;

/// Shared handle to a sequence.
pub type ArrayHandle = Rc<RefCell<Vec<Node>>>;

/// A value in the state tree.
#[derive(Debug, Clone, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(ArrayHandle),
    Object(MapHandle),
}

impl Node {
    /// A new, empty mapping.
    pub fn object() -> Self {
        Self::Object(Rc::new(RefCell::new(Map::new())))
    }

    pub fn from_map(map: Map) -> Self {
        Self::Object(Rc::new(RefCell::new(map)))
    }

    pub fn from_vec(items: Vec<Node>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Identity comparison.
    ///
    /// Containers are identical when they share a handle. Scalars have no
    /// identity of their own and compare by value.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(_) | Self::Array(_), _) | (_, Self::Object(_) | Self::Array(_)) => false,
            (a, b) => a.deep_eq(b),
        }
    }

    /// Structural equality. Numbers compare by numeric value, so `1` equals
    /// `1.0`; two integers compare exactly.
    pub fn deep_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(a, b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, x)| b.get(key).is_some_and(|y| x.deep_eq(y)))
            }
            _ => false,
        }
    }

    /// Copy with fresh containers at every level.
    pub fn deep_clone(&self) -> Node {
        match self {
            Self::Array(items) => {
                Self::from_vec(items.borrow().iter().map(Node::deep_clone).collect())
            }
            Self::Object(map) => Self::from_map(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    /// Handle to a mapping entry.
    pub fn get(&self, key: &str) -> Option<Node> {
        match self {
            Self::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Handle to a sequence element.
    pub fn get_index(&self, index: usize) -> Option<Node> {
        match self {
            Self::Array(items) => items.borrow().get(index).cloned(),
            _ => None,
        }
    }

    /// Handle to the node at `pointer`, if it resolves.
    pub fn pointer(&self, pointer: &Pointer) -> Option<Node> {
        pointer
            .tokens()
            .try_fold(self.clone(), |node, token| match &node {
                Self::Object(_) => node.get(&token.decoded()),
                Self::Array(_) => match sequence_index(&token).ok()? {
                    Index::Num(i) => node.get_index(i),
                    Index::Next => None,
                },
                _ => None,
            })
    }

    /// Number of entries in a container; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) => items.borrow().len(),
            Self::Object(map) => map.borrow().len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Snapshot as a `serde_json::Value`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.borrow().iter().map(Node::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    // Integers above 2^53 collapse in f64, so only mixed pairs go through it.
    if !a.is_f64() && !b.is_f64() {
        return a == b;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::from_vec(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => {
                Self::from_map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        node.to_json()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let entries = entries.borrow();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from)
    }
}
