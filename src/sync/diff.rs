//! Minimal JSON-Patch-shaped diff synthesis between two [`SnapshotValue`]
//! trees, as specified in `spec.md` §4.2 "Diff generation".

use crate::value::{Patch, SnapshotValue, pointer_join};

/// Diff `prev` against `next`, emitting the minimal patch sequence that
/// turns `prev` into `next` when applied in order.
///
/// Object pairs recurse key by key; anything else (primitives, arrays) is
/// replaced atomically — arrays never get positional patches, "intentional:
/// avoids element-identity ambiguity."
pub fn diff(prev: &SnapshotValue, next: &SnapshotValue, path: &str) -> Vec<Patch> {
    let mut patches = Vec::new();
    diff_into(prev, next, path, &mut patches);
    patches
}

fn diff_into(prev: &SnapshotValue, next: &SnapshotValue, path: &str, out: &mut Vec<Patch>) {
    match (prev, next) {
        (SnapshotValue::Object(prev_map), SnapshotValue::Object(next_map)) => {
            for key in prev_map.keys() {
                if !next_map.contains_key(key) {
                    out.push(Patch::remove(pointer_join(path, key)));
                }
            }
            for (key, next_value) in next_map {
                let field_path = pointer_join(path, key);
                match prev_map.get(key) {
                    None => out.push(Patch::add(field_path, next_value.clone())),
                    Some(prev_value) => diff_into(prev_value, next_value, &field_path, out),
                }
            }
        }
        _ => {
            if prev != next {
                out.push(Patch::replace(path.to_string(), next.clone()));
            }
        }
    }
}

/// Apply a patch sequence to a [`SnapshotValue`] tree, used by tests to
/// verify invariant 6 (snapshot -> diff -> apply -> snapshot is idempotent)
/// and available to any caller that wants to reconstruct state from a patch
/// log (e.g. a thin client).
pub fn apply(base: &SnapshotValue, patches: &[Patch]) -> SnapshotValue {
    let mut result = base.clone();
    for patch in patches {
        apply_one(&mut result, patch);
    }
    result
}

fn apply_one(root: &mut SnapshotValue, patch: &Patch) {
    let tokens: Vec<String> = patch
        .path
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect();

    if tokens.is_empty() {
        if let Some(value) = &patch.value {
            *root = value.clone();
        }
        return;
    }

    let mut current = root;
    for token in &tokens[..tokens.len() - 1] {
        let SnapshotValue::Object(map) = current else {
            return;
        };
        let Some(next) = map.get_mut(token) else {
            return;
        };
        current = next;
    }

    let SnapshotValue::Object(map) = current else {
        return;
    };
    let last = &tokens[tokens.len() - 1];
    match patch.op {
        crate::value::PatchOp::Remove => {
            map.shift_remove(last);
        }
        crate::value::PatchOp::Add | crate::value::PatchOp::Replace => {
            if let Some(value) = &patch.value {
                map.insert(last.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn obj(pairs: &[(&str, SnapshotValue)]) -> SnapshotValue {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        SnapshotValue::Object(map)
    }

    #[test]
    fn removes_added_and_recurses() {
        let prev = obj(&[
            ("a", SnapshotValue::Int(1)),
            ("b", SnapshotValue::Int(2)),
            (
                "nested",
                obj(&[("x", SnapshotValue::String("keep".into()))]),
            ),
        ]);
        let next = obj(&[
            ("a", SnapshotValue::Int(1)),
            ("c", SnapshotValue::Int(3)),
            (
                "nested",
                obj(&[("x", SnapshotValue::String("changed".into()))]),
            ),
        ]);

        let patches = diff(&prev, &next, "");
        assert!(patches.contains(&Patch::remove("/b")));
        assert!(patches.contains(&Patch::add("/c", SnapshotValue::Int(3))));
        assert!(patches.contains(&Patch::replace(
            "/nested/x",
            SnapshotValue::String("changed".into())
        )));
        assert_eq!(patches.len(), 3);
    }

    #[test]
    fn arrays_replace_atomically() {
        let prev = obj(&[(
            "items",
            SnapshotValue::Array(vec![SnapshotValue::Int(1), SnapshotValue::Int(2)]),
        )]);
        let next = obj(&[(
            "items",
            SnapshotValue::Array(vec![SnapshotValue::Int(1)]),
        )]);
        let patches = diff(&prev, &next, "");
        assert_eq!(
            patches,
            vec![Patch::replace(
                "/items",
                SnapshotValue::Array(vec![SnapshotValue::Int(1)])
            )]
        );
    }

    #[test]
    fn no_change_yields_no_patches() {
        let snap = obj(&[("a", SnapshotValue::Int(1))]);
        assert!(diff(&snap, &snap, "").is_empty());
    }

    #[test]
    fn diff_then_apply_roundtrips() {
        let prev = obj(&[
            ("a", SnapshotValue::Int(1)),
            ("b", SnapshotValue::Int(2)),
        ]);
        let next = obj(&[
            ("a", SnapshotValue::Int(1)),
            ("c", SnapshotValue::Int(3)),
        ]);
        let patches = diff(&prev, &next, "");
        assert_eq!(apply(&prev, &patches), next);
    }

    #[test]
    fn path_tokens_are_escaped() {
        let prev = SnapshotValue::empty_object();
        let next = obj(&[("a/b~c", SnapshotValue::Int(1))]);
        let patches = diff(&prev, &next, "");
        assert_eq!(patches[0].path, "/a~1b~0c");
    }
}
