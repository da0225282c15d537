//! LandManager / Realm (`spec.md` §4.6): the multi-Land registry. Routes by
//! `LandID`, creates Lands lazily and tears them down on `remove`.

use crate::ids::LandId;
use crate::land::context::Services;
use crate::land::keeper::{LandKeeper, OpRecorder, Outbound};
use crate::land::op::{AdminOp, LandHandle, Op};
use crate::land::{LandDefinition, error::LandError};
use crate::state::StateSchema;
use crate::value::SnapshotValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// One entry in the Realm's registry: the running Land plus what
/// `enumerate()` needs without going through the keeper's op queue.
struct LandEntry {
    land_id: LandId,
    land_type: &'static str,
    handle: LandHandle,
    _join_handle: JoinHandle<()>,
    created_at_millis: u64,
}

/// Read-only summary of a registered Land, for admin listing
/// (`spec.md` §4.6: `enumerate() -> [LandSummary]`).
#[derive(Debug, Clone)]
pub struct LandSummary {
    pub land_id: String,
    pub land_type: String,
    pub created_at_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealmError {
    DuplicateLandType,
    InvalidLandType,
}

impl std::fmt::Display for RealmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealmError::DuplicateLandType => write!(f, "duplicateLandType"),
            RealmError::InvalidLandType => write!(f, "invalidLandType"),
        }
    }
}

impl std::error::Error for RealmError {}

/// Builds and owns every live [`LandKeeper`] for one `StateSchema` type.
/// A real deployment runs one `Realm<S>` per distinct Land shape; multiple
/// `landType`s sharing the same state shape register distinct
/// [`LandDefinition`]s against the same Realm.
pub struct Realm<S: StateSchema + Clone> {
    definitions: Mutex<HashMap<&'static str, Arc<LandDefinition<S>>>>,
    lands: Mutex<HashMap<LandId, LandEntry>>,
}

impl<S: StateSchema + Clone> Default for Realm<S> {
    fn default() -> Self {
        Self {
            definitions: Mutex::new(HashMap::new()),
            lands: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: StateSchema + Clone> Realm<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `landType`'s definition at the Realm (host) level.
    /// Rejected for a duplicate or empty `landType` (`spec.md` §4.6).
    pub fn register_definition(
        &self,
        definition: Arc<LandDefinition<S>>,
    ) -> Result<(), RealmError> {
        if definition.land_type.is_empty() {
            return Err(RealmError::InvalidLandType);
        }
        let mut definitions = self.definitions.lock().unwrap();
        if definitions.contains_key(definition.land_type) {
            return Err(RealmError::DuplicateLandType);
        }
        definitions.insert(definition.land_type, definition);
        Ok(())
    }

    /// Atomically get or create the Land for `land_id`. Never spawns a
    /// second keeper for the same id (`spec.md` §4.6: "atomic; never
    /// creates twice for the same ID").
    pub fn get_or_create(
        &self,
        land_id: LandId,
        initial_state: impl FnOnce() -> S,
        recorder_factory: impl FnOnce(&LandId) -> Option<Box<dyn OpRecorder>>,
        outbound: Arc<dyn Outbound>,
        now_millis: u64,
    ) -> Result<LandHandle, LandError> {
        let mut lands = self.lands.lock().unwrap();
        if let Some(entry) = lands.get(&land_id) {
            return Ok(entry.handle.clone());
        }

        let definitions = self.definitions.lock().unwrap();
        let definition = definitions
            .get(land_id.land_type.as_str())
            .cloned()
            .ok_or(LandError::InvalidLandType)?;
        drop(definitions);

        let recorder = recorder_factory(&land_id);
        let (handle, join_handle) = LandKeeper::spawn(
            land_id.clone(),
            definition.clone(),
            initial_state(),
            Services::default(),
            recorder,
            outbound,
        );
        lands.insert(
            land_id.clone(),
            LandEntry {
                land_id,
                land_type: definition.land_type,
                handle: handle.clone(),
                _join_handle: join_handle,
                created_at_millis: now_millis,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, land_id: &LandId) -> Option<LandHandle> {
        self.lands.lock().unwrap().get(land_id).map(|e| e.handle.clone())
    }

    /// Drain and tear down a Land: stop admitting new ops by dropping its
    /// registry entry, then ask the keeper to run `afterFinalize` and hand
    /// back its final state before its thread falls idle (`spec.md` §4.6).
    pub fn remove(&self, land_id: &LandId) -> bool {
        let entry = self.lands.lock().unwrap().remove(land_id);
        match entry {
            Some(entry) => {
                let (tx, rx) = std::sync::mpsc::channel();
                let sent = entry.handle.send(Op::Admin(AdminOp::Finalize {
                    respond: Box::new(move |snapshot: SnapshotValue| {
                        let _ = tx.send(snapshot);
                    }),
                }));
                if sent.is_ok() {
                    let _ = rx.recv_timeout(Duration::from_secs(5));
                }
                true
            }
            None => false,
        }
    }

    /// Tear down every registered Land that's both older than
    /// `idle_after_millis` and currently empty (`session_count` returns 0
    /// for its canonical id). A coarse idle check — it keys off creation
    /// time rather than last-activity time, since no per-Land "last
    /// touched" timestamp is tracked — but catches the common case of a
    /// multi-room instance nobody ever joined, or that everyone has since
    /// left, lingering forever. Returns the ids it tore down.
    pub fn reap_idle(
        &self,
        idle_after_millis: u64,
        now_millis: u64,
        session_count: impl Fn(&str) -> usize,
    ) -> Vec<LandId> {
        let idle: Vec<LandId> = {
            let lands = self.lands.lock().unwrap();
            lands
                .values()
                .filter(|entry| {
                    now_millis.saturating_sub(entry.created_at_millis) >= idle_after_millis
                        && session_count(&entry.land_id.canonical()) == 0
                })
                .map(|entry| entry.land_id.clone())
                .collect()
        };
        for land_id in &idle {
            self.remove(land_id);
        }
        idle
    }

    pub fn enumerate(&self) -> Vec<LandSummary> {
        self.lands
            .lock()
            .unwrap()
            .values()
            .map(|e| LandSummary {
                land_id: e.land_id.canonical(),
                land_type: e.land_type.to_string(),
                created_at_millis: e.created_at_millis,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lands.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lands.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::land::LandDefinitionBuilder;
    use crate::state::{
        FieldDescriptor, FieldKind, FromSnapshotValue, StateSchema, Synced, SyncPolicy,
        ToSnapshotValue,
    };

    #[derive(Clone, Default)]
    struct Counter {
        value: Synced<i64>,
    }

    impl StateSchema for Counter {
        fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
            vec![FieldDescriptor {
                name: "value",
                policy: SyncPolicy::Broadcast,
                kind: FieldKind::Leaf,
                read: Box::new(|s: &Counter, _| Some(s.value.get().to_snapshot_value())),
                write: Box::new(|s: &mut Counter, v| {
                    if let Some(parsed) = i64::from_snapshot_value(&v) {
                        s.value.set(parsed);
                    }
                }),
                is_dirty: Box::new(|s: &Counter| s.value.is_dirty()),
                clear_dirty: Box::new(|s: &mut Counter| s.value.clear_dirty()),
            }]
        }
    }

    struct NullOutbound;
    impl Outbound for NullOutbound {
        fn send_state_update(&self, _: crate::ids::SessionId, _: crate::value::StateUpdate) {}
        fn send_server_event(
            &self,
            _: crate::ids::SessionId,
            _: crate::land::op::ServerEventEnvelope,
        ) {
        }
        fn close_session(&self, _: crate::ids::SessionId, _: crate::land::op::LeaveReason) {}
    }

    #[test]
    fn duplicate_land_type_registration_is_rejected() {
        let realm: Realm<Counter> = Realm::new();
        let def = Arc::new(
            LandDefinitionBuilder::<Counter>::new("lobby")
                .build()
                .unwrap(),
        );
        realm.register_definition(def.clone()).unwrap();
        let err = realm.register_definition(def).unwrap_err();
        assert_eq!(err, RealmError::DuplicateLandType);
    }

    #[test]
    fn get_or_create_is_idempotent_for_same_id() {
        let realm: Realm<Counter> = Realm::new();
        let def = Arc::new(
            LandDefinitionBuilder::<Counter>::new("lobby")
                .build()
                .unwrap(),
        );
        realm.register_definition(def).unwrap();

        let id = LandId::single_room("lobby");
        let outbound = Arc::new(NullOutbound);
        let h1 = realm
            .get_or_create(id.clone(), Counter::default, |_| None, outbound.clone(), 0)
            .unwrap();
        let h2 = realm
            .get_or_create(id, Counter::default, |_| None, outbound, 0)
            .unwrap();
        assert_eq!(realm.len(), 1);
        drop(h1);
        drop(h2);
    }

    #[test]
    fn reap_idle_removes_old_empty_lands_only() {
        let realm: Realm<Counter> = Realm::new();
        let def = Arc::new(
            LandDefinitionBuilder::<Counter>::new("lobby")
                .build()
                .unwrap(),
        );
        realm.register_definition(def).unwrap();

        let outbound = Arc::new(NullOutbound);
        let old_id = LandId::new("lobby", "old-room");
        let fresh_id = LandId::new("lobby", "fresh-room");
        realm
            .get_or_create(old_id.clone(), Counter::default, |_| None, outbound.clone(), 0)
            .unwrap();
        realm
            .get_or_create(fresh_id.clone(), Counter::default, |_| None, outbound, 10_000)
            .unwrap();

        let reaped = realm.reap_idle(5_000, 10_000, |_| 0);
        assert_eq!(reaped, vec![old_id]);
        assert_eq!(realm.len(), 1);
        assert!(realm.get(&fresh_id).is_some());
    }

    #[test]
    fn reap_idle_skips_occupied_lands() {
        let realm: Realm<Counter> = Realm::new();
        let def = Arc::new(
            LandDefinitionBuilder::<Counter>::new("lobby")
                .build()
                .unwrap(),
        );
        realm.register_definition(def).unwrap();
        let outbound = Arc::new(NullOutbound);
        let id = LandId::single_room("lobby");
        realm
            .get_or_create(id.clone(), Counter::default, |_| None, outbound, 0)
            .unwrap();

        let reaped = realm.reap_idle(5_000, 10_000, |_| 1);
        assert!(reaped.is_empty());
        assert_eq!(realm.len(), 1);
    }

    #[test]
    fn get_or_create_for_unregistered_land_type_fails() {
        let realm: Realm<Counter> = Realm::new();
        let outbound = Arc::new(NullOutbound);
        let err = realm
            .get_or_create(
                LandId::single_room("missing"),
                Counter::default,
                |_| None,
                outbound,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, LandError::InvalidLandType));
    }
}
