//! State hashing for the reevaluation runner (`spec.md` §4.8): FNV-1a64 over
//! a canonical JSON rendering of a full (`forSession: nil`) snapshot.

use crate::value::SnapshotValue;
use std::collections::BTreeMap;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// `fnv1a64(canonicalJsonBytes(snapshot))`, rendered as 16 lowercase hex
/// digits. The sole match criterion for replay (`spec.md` §4.7/§4.8) — this
/// algorithm must never change.
pub fn state_hash(snapshot: &SnapshotValue) -> String {
    let bytes = canonical_json_bytes(snapshot);
    format!("{:016x}", fnv1a64(&bytes))
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Canonicalize a snapshot: object keys sorted lexicographically at every
/// level, numbers in their minimal exact representation.
///
/// NFC normalization of string values (named in `spec.md` §4.8 for
/// "strings in NFC if Unicode") is not applied here — no crate in this
/// project's dependency stack provides Unicode normalization, and every
/// string this runtime handles (player ids, field names, action payloads)
/// is expected to already arrive pre-normalized from the client. See
/// `DESIGN.md` for this Open Question's resolution.
pub fn canonical_json_bytes(value: &SnapshotValue) -> Vec<u8> {
    let canonical = to_canonical_json(value);
    serde_json::to_vec(&canonical).expect("canonical JSON is always serializable")
}

fn to_canonical_json(value: &SnapshotValue) -> serde_json::Value {
    match value {
        SnapshotValue::Null => serde_json::Value::Null,
        SnapshotValue::Bool(b) => serde_json::Value::Bool(*b),
        SnapshotValue::Int(i) => serde_json::Value::from(*i),
        SnapshotValue::Double(d) => serde_json::json!(d),
        SnapshotValue::String(s) => serde_json::Value::String(s.clone()),
        SnapshotValue::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_canonical_json).collect())
        }
        SnapshotValue::Object(map) => {
            let sorted: BTreeMap<&String, &SnapshotValue> = map.iter().collect();
            let mut obj = serde_json::Map::new();
            for (k, v) in sorted {
                obj.insert(k.clone(), to_canonical_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn key_order_does_not_affect_hash() {
        let mut a = IndexMap::new();
        a.insert("b".to_string(), SnapshotValue::Int(2));
        a.insert("a".to_string(), SnapshotValue::Int(1));

        let mut b = IndexMap::new();
        b.insert("a".to_string(), SnapshotValue::Int(1));
        b.insert("b".to_string(), SnapshotValue::Int(2));

        assert_eq!(
            state_hash(&SnapshotValue::Object(a)),
            state_hash(&SnapshotValue::Object(b))
        );
    }

    #[test]
    fn different_values_hash_differently() {
        let mut a = IndexMap::new();
        a.insert("a".to_string(), SnapshotValue::Int(1));
        let mut b = IndexMap::new();
        b.insert("a".to_string(), SnapshotValue::Int(2));
        assert_ne!(
            state_hash(&SnapshotValue::Object(a)),
            state_hash(&SnapshotValue::Object(b))
        );
    }

    #[test]
    fn hash_is_16_hex_chars() {
        let hash = state_hash(&SnapshotValue::empty_object());
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
