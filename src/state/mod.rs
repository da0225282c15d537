//! State Tree & Field Metadata (`spec.md` §4.1): typed state nodes with a
//! per-field sync policy, a `FieldDescriptor` table resolved once at Land
//! creation, and dirty tracking via the [`synced`] mutation wrappers.

pub mod synced;

use crate::ids::PlayerId;
use crate::value::SnapshotValue;
use std::collections::HashSet;
use std::fmt;

pub use synced::{Synced, SyncedMap};

/// Who gets to see a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Visible to every joined session.
    Broadcast,
    /// A map keyed by `PlayerId`; each session sees only its own key.
    PerPlayerSlice,
    /// Stored, never serialized to any session.
    ServerOnly,
    /// Not even visible to the sync engine — pure server bookkeeping.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Leaf,
    Map,
    NestedNode,
}

type ReadFn<S> = Box<dyn Fn(&S, Option<&PlayerId>) -> Option<SnapshotValue> + Send + Sync>;
type WriteFn<S> = Box<dyn Fn(&mut S, SnapshotValue) + Send + Sync>;
type IsDirtyFn<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;
type ClearDirtyFn<S> = Box<dyn Fn(&mut S) + Send + Sync>;

/// One entry of the field descriptor table for state type `S`.
///
/// `read` returns `None` for `serverOnly`/`internal` fields, which the
/// snapshot generator (`crate::sync::snapshot`) interprets as "omit this
/// field entirely." `write` is the generic counterpart: a whole-field
/// replace driven by a decoded [`SnapshotValue`], the entry point an admin
/// "set field" op goes through instead of a concrete handler mutating a
/// `Synced`/`SyncedMap` field directly. Map-kind fields are ordinarily
/// mutated through their own keyed `insert`/`mutate`/`remove` API rather
/// than a whole-map replace, so their `write` is commonly a no-op.
pub struct FieldDescriptor<S> {
    pub name: &'static str,
    pub policy: SyncPolicy,
    pub kind: FieldKind,
    pub read: ReadFn<S>,
    pub write: WriteFn<S>,
    pub is_dirty: IsDirtyFn<S>,
    pub clear_dirty: ClearDirtyFn<S>,
}

/// Reverses [`ToSnapshotValue`] for leaf field types, so a generic `write`
/// closure can decode a wire-originated [`SnapshotValue`] back into the
/// concrete type a `Synced<T>` field holds.
pub trait FromSnapshotValue: Sized {
    fn from_snapshot_value(value: &SnapshotValue) -> Option<Self>;
}

macro_rules! impl_from_snapshot_int {
    ($($t:ty),+) => {
        $(impl FromSnapshotValue for $t {
            fn from_snapshot_value(value: &SnapshotValue) -> Option<Self> {
                match value {
                    SnapshotValue::Int(i) => <$t>::try_from(*i).ok(),
                    _ => None,
                }
            }
        })+
    };
}
impl_from_snapshot_int!(i8, i16, i32, i64, u8, u16, u32);

impl FromSnapshotValue for f64 {
    fn from_snapshot_value(value: &SnapshotValue) -> Option<Self> {
        match value {
            SnapshotValue::Double(d) => Some(*d),
            SnapshotValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}
impl FromSnapshotValue for f32 {
    fn from_snapshot_value(value: &SnapshotValue) -> Option<Self> {
        f64::from_snapshot_value(value).map(|d| d as f32)
    }
}
impl FromSnapshotValue for bool {
    fn from_snapshot_value(value: &SnapshotValue) -> Option<Self> {
        match value {
            SnapshotValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
impl FromSnapshotValue for String {
    fn from_snapshot_value(value: &SnapshotValue) -> Option<Self> {
        match value {
            SnapshotValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl<S> fmt::Debug for FieldDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Converts a leaf value into a [`SnapshotValue`]. Implemented for the
/// primitive types a state leaf is typically built from, plus any nested
/// [`StateSchema`] node via the blanket impl below.
pub trait ToSnapshotValue {
    fn to_snapshot_value(&self) -> SnapshotValue;
}

macro_rules! impl_to_snapshot_int {
    ($($t:ty),+) => {
        $(impl ToSnapshotValue for $t {
            fn to_snapshot_value(&self) -> SnapshotValue {
                SnapshotValue::Int(*self as i64)
            }
        })+
    };
}
impl_to_snapshot_int!(i8, i16, i32, i64, u8, u16, u32);

impl ToSnapshotValue for f64 {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::Double(*self)
    }
}
impl ToSnapshotValue for f32 {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::Double(*self as f64)
    }
}
impl ToSnapshotValue for bool {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::Bool(*self)
    }
}
impl ToSnapshotValue for String {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::String(self.clone())
    }
}
impl ToSnapshotValue for str {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::String(self.to_string())
    }
}
impl<T: ToSnapshotValue> ToSnapshotValue for Vec<T> {
    fn to_snapshot_value(&self) -> SnapshotValue {
        SnapshotValue::Array(self.iter().map(ToSnapshotValue::to_snapshot_value).collect())
    }
}
impl<T: ToSnapshotValue> ToSnapshotValue for Option<T> {
    fn to_snapshot_value(&self) -> SnapshotValue {
        match self {
            Some(v) => v.to_snapshot_value(),
            None => SnapshotValue::Null,
        }
    }
}

/// A nested state node: anything with its own field descriptor table.
/// Implemented by the application for every nested (non-leaf) state struct,
/// including the Land's top-level state type.
pub trait StateSchema: Sized + 'static {
    /// Build the field descriptor table. Called once at Land creation and
    /// cached for the Land's lifetime — never on the hot path (`spec.md` §9).
    fn field_descriptors() -> Vec<FieldDescriptor<Self>>;
}

/// Validate a descriptor table at Land-creation time: non-empty, unique
/// field names. Returns the offending name on duplication.
pub fn validate_descriptors<S>(descriptors: &[FieldDescriptor<S>]) -> Result<(), StateSchemaError> {
    if descriptors.is_empty() {
        return Err(StateSchemaError::Empty);
    }
    let mut seen = HashSet::new();
    for d in descriptors {
        if !seen.insert(d.name) {
            return Err(StateSchemaError::DuplicateField(d.name));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSchemaError {
    Empty,
    DuplicateField(&'static str),
}

impl fmt::Display for StateSchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSchemaError::Empty => write!(f, "state schema declares no fields"),
            StateSchemaError::DuplicateField(name) => {
                write!(f, "state schema declares field '{name}' more than once")
            }
        }
    }
}

impl std::error::Error for StateSchemaError {}

/// Render a nested [`StateSchema`] node as a [`SnapshotValue::Object`] using
/// its own descriptor table — the building block `read` closures use for
/// `FieldKind::NestedNode` fields.
pub fn snapshot_node<N: StateSchema>(
    node: &N,
    descriptors: &[FieldDescriptor<N>],
    for_session: Option<&PlayerId>,
) -> SnapshotValue {
    let mut map = indexmap::IndexMap::new();
    for d in descriptors {
        if let Some(value) = (d.read)(node, for_session) {
            map.insert(d.name.to_string(), value);
        }
    }
    SnapshotValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;
    impl StateSchema for Empty {
        fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
            vec![]
        }
    }

    #[test]
    fn empty_descriptor_table_is_invalid() {
        let err = validate_descriptors(&Empty::field_descriptors()).unwrap_err();
        assert_eq!(err, StateSchemaError::Empty);
    }

    struct Dup {
        a: Synced<i64>,
    }
    impl StateSchema for Dup {
        fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
            vec![
                FieldDescriptor {
                    name: "a",
                    policy: SyncPolicy::Broadcast,
                    kind: FieldKind::Leaf,
                    read: Box::new(|s: &Dup, _| Some(s.a.get().to_snapshot_value())),
                    write: Box::new(|s: &mut Dup, v| {
                        if let Some(parsed) = i64::from_snapshot_value(&v) {
                            s.a.set(parsed);
                        }
                    }),
                    is_dirty: Box::new(|s: &Dup| s.a.is_dirty()),
                    clear_dirty: Box::new(|s: &mut Dup| s.a.clear_dirty()),
                },
                FieldDescriptor {
                    name: "a",
                    policy: SyncPolicy::Broadcast,
                    kind: FieldKind::Leaf,
                    read: Box::new(|s: &Dup, _| Some(s.a.get().to_snapshot_value())),
                    write: Box::new(|s: &mut Dup, v| {
                        if let Some(parsed) = i64::from_snapshot_value(&v) {
                            s.a.set(parsed);
                        }
                    }),
                    is_dirty: Box::new(|s: &Dup| s.a.is_dirty()),
                    clear_dirty: Box::new(|s: &mut Dup| s.a.clear_dirty()),
                },
            ]
        }
    }

    #[test]
    fn duplicate_field_name_is_invalid() {
        let err = validate_descriptors(&Dup::field_descriptors()).unwrap_err();
        assert_eq!(err, StateSchemaError::DuplicateField("a"));
    }
}
