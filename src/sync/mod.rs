//! The Sync Engine (`spec.md` §4.2): snapshot generation, diff synthesis and
//! the per-session emission rule (first-sync / diff / no-change).

pub mod diff;

use crate::ids::PlayerId;
use crate::state::{FieldDescriptor, SyncPolicy, ToSnapshotValue};
use crate::value::{SnapshotValue, StateUpdate};
use indexmap::IndexMap;

pub use diff::{apply, diff as compute_diff};

/// Build the full snapshot for `state`, filtered by `for_session`.
///
/// - `broadcast` fields: always included.
/// - `perPlayerSlice` fields: the whole map if `for_session` is `None`
///   (admin/audit/hash path), else a single-key object for that player's
///   slice (or empty object if they have none).
/// - `serverOnly`/`internal`: omitted (their descriptor `read` returns
///   `None`).
pub fn snapshot<S>(
    state: &S,
    descriptors: &[FieldDescriptor<S>],
    for_session: Option<&PlayerId>,
) -> SnapshotValue {
    let mut map = IndexMap::new();
    for d in descriptors {
        if let Some(value) = (d.read)(state, for_session) {
            map.insert(d.name.to_string(), value);
        }
    }
    SnapshotValue::Object(map)
}

/// Render a `perPlayerSlice` map field's value for a given viewer, per the
/// contract in `spec.md` §4.2 point 2. Used by application `read` closures.
pub fn per_player_slice_value<V>(
    map: &crate::state::SyncedMap<PlayerId, V>,
    for_session: Option<&PlayerId>,
) -> SnapshotValue
where
    V: ToSnapshotValue,
{
    let mut out = IndexMap::new();
    match for_session {
        None => {
            for (k, v) in map.iter() {
                out.insert(k.to_string(), v.to_snapshot_value());
            }
        }
        Some(pid) => {
            if let Some(v) = map.get(pid) {
                out.insert(pid.to_string(), v.to_snapshot_value());
            }
        }
    }
    SnapshotValue::Object(out)
}

/// Whether any `perPlayerSlice`-policy descriptor reports dirty. If this is
/// false, a single broadcast-only diff may be safely reused across every
/// joined session (the "fast path" in `spec.md` §4.2).
pub fn only_broadcast_dirty<S>(state: &S, descriptors: &[FieldDescriptor<S>]) -> bool {
    descriptors
        .iter()
        .filter(|d| d.policy == SyncPolicy::PerPlayerSlice)
        .all(|d| !(d.is_dirty)(state))
}

/// Per-session sync bookkeeping: whether the first full snapshot has been
/// sent yet, and (once it has) the last snapshot sent to that session.
#[derive(Debug, Clone)]
pub enum SessionSyncState {
    FirstSyncPending,
    Subscribed { last_sent: SnapshotValue },
}

impl Default for SessionSyncState {
    fn default() -> Self {
        SessionSyncState::FirstSyncPending
    }
}

impl SessionSyncState {
    /// Compute the `StateUpdate` to send this session given the current
    /// snapshot-for-that-session, transitioning internal bookkeeping.
    pub fn advance(&mut self, current: SnapshotValue) -> StateUpdate {
        match self {
            SessionSyncState::FirstSyncPending => {
                let patches = compute_diff(&SnapshotValue::empty_object(), &current, "");
                *self = SessionSyncState::Subscribed { last_sent: current };
                StateUpdate::FirstSync { patches }
            }
            SessionSyncState::Subscribed { last_sent } => {
                let patches = compute_diff(last_sent, &current, "");
                let update = if patches.is_empty() {
                    StateUpdate::NoChange
                } else {
                    StateUpdate::Diff { patches }
                };
                *last_sent = current;
                update
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sync_diffs_against_empty_object() {
        let mut state = SessionSyncState::default();
        let mut snap = IndexMap::new();
        snap.insert("totalCookies".to_string(), SnapshotValue::Int(0));
        let update = state.advance(SnapshotValue::Object(snap));
        match update {
            StateUpdate::FirstSync { patches } => {
                assert_eq!(patches.len(), 1);
                assert_eq!(patches[0].path, "/totalCookies");
            }
            _ => panic!("expected FirstSync"),
        }
    }

    #[test]
    fn subsequent_no_change_is_reported() {
        let mut state = SessionSyncState::default();
        let mut snap = IndexMap::new();
        snap.insert("a".to_string(), SnapshotValue::Int(1));
        state.advance(SnapshotValue::Object(snap.clone()));
        let update = state.advance(SnapshotValue::Object(snap));
        assert_eq!(update, StateUpdate::NoChange);
    }

    #[test]
    fn subsequent_change_is_a_diff() {
        let mut state = SessionSyncState::default();
        let mut snap1 = IndexMap::new();
        snap1.insert("a".to_string(), SnapshotValue::Int(1));
        state.advance(SnapshotValue::Object(snap1));
        let mut snap2 = IndexMap::new();
        snap2.insert("a".to_string(), SnapshotValue::Int(2));
        let update = state.advance(SnapshotValue::Object(snap2));
        match update {
            StateUpdate::Diff { patches } => assert_eq!(patches.len(), 1),
            _ => panic!("expected Diff"),
        }
    }
}
