//! Wire-agnostic value types shared by the state tree, the sync engine and
//! the codec layer: [`SnapshotValue`], JSON-Pointer [`Patch`]es and the
//! per-session [`StateUpdate`] envelope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A synced field's value, tagged so numeric/boolean distinctions survive a
/// round trip through a schemaless wire encoding.
///
/// `Object` preserves insertion order (field declaration order), required by
/// the snapshot contract: "field ordering in objects is insertion-order-by-
/// declaration."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<SnapshotValue>),
    Object(IndexMap<String, SnapshotValue>),
}

impl SnapshotValue {
    pub fn empty_object() -> Self {
        SnapshotValue::Object(IndexMap::new())
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, SnapshotValue>> {
        match self {
            SnapshotValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, SnapshotValue::Object(map) if map.is_empty())
    }
}

impl From<&SnapshotValue> for serde_json::Value {
    fn from(value: &SnapshotValue) -> Self {
        match value {
            SnapshotValue::Null => serde_json::Value::Null,
            SnapshotValue::Bool(b) => serde_json::Value::Bool(*b),
            SnapshotValue::Int(i) => serde_json::Value::from(*i),
            SnapshotValue::Double(d) => serde_json::json!(d),
            SnapshotValue::String(s) => serde_json::Value::String(s.clone()),
            SnapshotValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            SnapshotValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for SnapshotValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SnapshotValue::Null,
            serde_json::Value::Bool(b) => SnapshotValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SnapshotValue::Int(i)
                } else {
                    SnapshotValue::Double(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => SnapshotValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                SnapshotValue::Array(items.iter().map(SnapshotValue::from).collect())
            }
            serde_json::Value::Object(map) => SnapshotValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), SnapshotValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// A single JSON-Patch-shaped operation, restricted to the three ops the
/// sync engine ever emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<SnapshotValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl Patch {
    pub fn add(path: impl Into<String>, value: SnapshotValue) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: SnapshotValue) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Escape a single JSON-Pointer reference token (RFC 6901 §3).
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn pointer_join(prefix: &str, token: &str) -> String {
    format!("{prefix}/{}", escape_pointer_token(token))
}

/// What the sync engine sends to a session after an op completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateUpdate {
    FirstSync { patches: Vec<Patch> },
    Diff { patches: Vec<Patch> },
    NoChange,
}

impl StateUpdate {
    /// `true` for the variant the runtime is permitted to drop instead of
    /// sending, per "the runtime must not double-count as a packet."
    pub fn is_droppable_no_change(&self) -> bool {
        matches!(self, StateUpdate::NoChange)
    }
}
