//! Exercises the scenarios from `spec.md` §8 end-to-end against a small
//! Cookie-Clicker-shaped Land: `totalCookies` (broadcast), `players`
//! (broadcast map) and `privateStates` (perPlayerSlice map).

use super::context::Services;
use super::keeper::{LandKeeper, Outbound};
use super::op::{
    ActionOutcome, Effects, JoinOutcome, JoinRequest, LeaveReason, Op, ServerEventEnvelope,
};
use super::{JoinDecision, LandDefinitionBuilder};
use crate::ids::{LandId, PlayerId, SessionId};
use crate::state::{
    FieldDescriptor, FieldKind, FromSnapshotValue, StateSchema, Synced, SyncedMap, SyncPolicy,
    ToSnapshotValue,
};
use crate::sync::per_player_slice_value;
use crate::value::{Patch, PatchOp, SnapshotValue, StateUpdate};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct PlayerSlot {
    cookies: i64,
}

impl ToSnapshotValue for PlayerSlot {
    fn to_snapshot_value(&self) -> SnapshotValue {
        let mut map = IndexMap::new();
        map.insert("cookies".to_string(), self.cookies.to_snapshot_value());
        SnapshotValue::Object(map)
    }
}

#[derive(Debug, Clone, Default)]
struct PrivateState {
    upgrades: HashMap<String, i64>,
}

impl ToSnapshotValue for PrivateState {
    fn to_snapshot_value(&self) -> SnapshotValue {
        let mut upgrades = IndexMap::new();
        for (k, v) in &self.upgrades {
            upgrades.insert(k.clone(), v.to_snapshot_value());
        }
        let mut map = IndexMap::new();
        map.insert("upgrades".to_string(), SnapshotValue::Object(upgrades));
        SnapshotValue::Object(map)
    }
}

#[derive(Clone, Default)]
struct CookieState {
    total_cookies: Synced<i64>,
    players: SyncedMap<PlayerId, PlayerSlot>,
    private_states: SyncedMap<PlayerId, PrivateState>,
}

impl StateSchema for CookieState {
    fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
        vec![
            FieldDescriptor {
                name: "totalCookies",
                policy: SyncPolicy::Broadcast,
                kind: FieldKind::Leaf,
                read: Box::new(|s: &CookieState, _| Some(s.total_cookies.get().to_snapshot_value())),
                write: Box::new(|s: &mut CookieState, v| {
                    if let Some(parsed) = i64::from_snapshot_value(&v) {
                        s.total_cookies.set(parsed);
                    }
                }),
                is_dirty: Box::new(|s: &CookieState| s.total_cookies.is_dirty()),
                clear_dirty: Box::new(|s: &mut CookieState| s.total_cookies.clear_dirty()),
            },
            FieldDescriptor {
                name: "players",
                policy: SyncPolicy::Broadcast,
                kind: FieldKind::Map,
                read: Box::new(|s: &CookieState, _| {
                    let mut map = IndexMap::new();
                    for (k, v) in s.players.iter() {
                        map.insert(k.to_string(), v.to_snapshot_value());
                    }
                    Some(SnapshotValue::Object(map))
                }),
                // Map-kind fields are mutated through `players`' own keyed
                // `insert`/`mutate`/`remove`, not a whole-map replace.
                write: Box::new(|_s: &mut CookieState, _v| {}),
                is_dirty: Box::new(|s: &CookieState| s.players.is_dirty()),
                clear_dirty: Box::new(|s: &mut CookieState| s.players.clear_dirty()),
            },
            FieldDescriptor {
                name: "privateStates",
                policy: SyncPolicy::PerPlayerSlice,
                kind: FieldKind::Map,
                read: Box::new(|s: &CookieState, for_session| {
                    Some(per_player_slice_value(&s.private_states, for_session))
                }),
                write: Box::new(|_s: &mut CookieState, _v| {}),
                is_dirty: Box::new(|s: &CookieState| s.private_states.is_dirty()),
                clear_dirty: Box::new(|s: &mut CookieState| s.private_states.clear_dirty()),
            },
        ]
    }
}

#[derive(Default)]
struct RecordingOutbound {
    updates: Mutex<Vec<(SessionId, StateUpdate)>>,
    events: Mutex<Vec<(SessionId, ServerEventEnvelope)>>,
    closed: Mutex<Vec<(SessionId, LeaveReason)>>,
}

impl RecordingOutbound {
    fn updates_for(&self, session_id: SessionId) -> Vec<StateUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == session_id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    fn drain(&self) {
        self.updates.lock().unwrap().clear();
    }
}

impl Outbound for RecordingOutbound {
    fn send_state_update(&self, session_id: SessionId, update: StateUpdate) {
        self.updates.lock().unwrap().push((session_id, update));
    }

    fn send_server_event(&self, session_id: SessionId, event: ServerEventEnvelope) {
        self.events.lock().unwrap().push((session_id, event));
    }

    fn close_session(&self, session_id: SessionId, reason: LeaveReason) {
        self.closed.lock().unwrap().push((session_id, reason));
    }
}

fn build_definition() -> Arc<super::LandDefinition<CookieState>> {
    let def = LandDefinitionBuilder::<CookieState>::new("cookie-clicker")
        .max_players(2)
        .action(
            "IncrementCookies",
            Box::new(|state, _payload, _ctx| {
                state.total_cookies.mutate(|v| *v += 1);
                Ok((serde_json::json!({"ok": true}), Effects::default()))
            }),
        )
        .action(
            "BuyUpgrade",
            Box::new(|state, payload, ctx| {
                let Some(session_id) = ctx.origin_session else {
                    return Err(super::error::HandlerError::new("NOT_JOINED", "no origin session"));
                };
                let player_id = ctx
                    .sessions
                    .get(session_id)
                    .expect("session must be joined to act")
                    .player_id
                    .clone();
                let upgrade = payload["upgrade"].as_str().unwrap_or("cursor").to_string();
                state.private_states.mutate(&player_id, |slice| {
                    *slice.upgrades.entry(upgrade).or_insert(0) += 1;
                });
                Ok((serde_json::json!({"ok": true}), Effects::default()))
            }),
        )
        .build()
        .expect("fixture definition is valid");
    Arc::new(def)
}

fn join(
    handle: &super::op::LandHandle,
    session_id: SessionId,
    player_id: &str,
) -> JoinOutcome {
    let (tx, rx) = std::sync::mpsc::channel();
    handle
        .send(Op::Join {
            request: JoinRequest {
                session_id,
                requested_player_id: Some(PlayerId::new(player_id)),
                device_id: None,
                metadata: HashMap::new(),
            },
            respond: Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(1)).unwrap()
}

fn act(
    handle: &super::op::LandHandle,
    session_id: SessionId,
    type_identifier: &str,
    payload: serde_json::Value,
    request_id: &str,
) -> ActionOutcome {
    let (tx, rx) = std::sync::mpsc::channel();
    handle
        .send(Op::Action {
            session_id,
            type_identifier: type_identifier.to_string(),
            payload,
            request_id: request_id.to_string(),
            respond: Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(1)).unwrap()
}

fn spawn_test_keeper() -> (super::op::LandHandle, Arc<RecordingOutbound>) {
    let outbound = Arc::new(RecordingOutbound::default());
    let (handle, _join) = LandKeeper::spawn(
        LandId::single_room("cookie-clicker"),
        build_definition(),
        CookieState::default(),
        Services::default(),
        None,
        outbound.clone(),
    );
    (handle, outbound)
}

#[test]
fn first_sync_on_join() {
    let (handle, outbound) = spawn_test_keeper();
    let outcome = join(&handle, SessionId::next(), "p1");
    let JoinOutcome::Allowed { player_id } = outcome else {
        panic!("expected join to be allowed")
    };
    assert_eq!(player_id, PlayerId::new("p1"));

    let sessions = outbound.updates.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    let (_, update) = &sessions[0];
    match update {
        StateUpdate::FirstSync { patches } => {
            assert!(patches.contains(&Patch::add("/totalCookies", SnapshotValue::Int(0))));
            assert!(patches.contains(&Patch {
                op: PatchOp::Add,
                path: "/players".to_string(),
                value: Some(SnapshotValue::empty_object()),
            }));
            assert!(patches.contains(&Patch {
                op: PatchOp::Add,
                path: "/privateStates".to_string(),
                value: Some(SnapshotValue::empty_object()),
            }));
        }
        other => panic!("expected FirstSync, got {other:?}"),
    }
}

#[test]
fn broadcast_field_update_visible_to_all() {
    let (handle, outbound) = spawn_test_keeper();
    let a = SessionId::next();
    let b = SessionId::next();
    join(&handle, a, "p1");
    join(&handle, b, "p2");
    outbound.drain();

    let outcome = act(&handle, a, "IncrementCookies", serde_json::json!({}), "r1");
    assert!(matches!(outcome, ActionOutcome::Success(_)));

    for session in [a, b] {
        let updates = outbound.updates_for(session);
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            StateUpdate::Diff { patches } => {
                assert_eq!(
                    patches,
                    &vec![Patch::replace("/totalCookies", SnapshotValue::Int(1))]
                );
            }
            other => panic!("expected Diff, got {other:?}"),
        }
    }
}

#[test]
fn per_player_slice_isolation() {
    let (handle, outbound) = spawn_test_keeper();
    let a = SessionId::next();
    let b = SessionId::next();
    join(&handle, a, "p1");
    join(&handle, b, "p2");
    outbound.drain();

    act(
        &handle,
        a,
        "BuyUpgrade",
        serde_json::json!({"upgrade": "cursor"}),
        "r1",
    );

    let a_updates = outbound.updates_for(a);
    assert_eq!(a_updates.len(), 1);
    match &a_updates[0] {
        StateUpdate::Diff { patches } => {
            assert_eq!(patches.len(), 1);
            assert_eq!(patches[0].path, "/privateStates/p1");
        }
        other => panic!("expected Diff, got {other:?}"),
    }

    let b_updates = outbound.updates_for(b);
    assert_eq!(b_updates.len(), 1);
    assert_eq!(b_updates[0], StateUpdate::NoChange);
}

#[test]
fn action_error_round_trip() {
    let (handle, outbound) = spawn_test_keeper();
    let a = SessionId::next();
    join(&handle, a, "p1");
    outbound.drain();

    let outcome = act(&handle, a, "UnknownAction", serde_json::json!({}), "r1");
    match outcome {
        ActionOutcome::Error { code, message } => {
            assert_eq!(code, "ACTION_NOT_REGISTERED");
            assert_eq!(message, "UnknownAction");
        }
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(outbound.updates.lock().unwrap().is_empty());
}

#[test]
fn leave_removes_slice() {
    let (handle, outbound) = spawn_test_keeper();
    let a = SessionId::next();
    let b = SessionId::next();
    join(&handle, a, "p1");
    join(&handle, b, "p2");
    act(
        &handle,
        b,
        "BuyUpgrade",
        serde_json::json!({"upgrade": "cursor"}),
        "r1",
    );
    outbound.drain();

    handle
        .send(Op::Leave {
            session_id: b,
            reason: LeaveReason::ClientRequested,
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let closed = outbound.closed.lock().unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, b);

    let a_updates = outbound.updates_for(a);
    assert_eq!(a_updates.len(), 1);
    match &a_updates[0] {
        StateUpdate::Diff { patches } => {
            assert!(patches.iter().any(|p| p.path == "/privateStates/p2" && p.op == PatchOp::Remove));
            assert!(patches.iter().any(|p| p.path == "/players" && p.op == PatchOp::Replace));
        }
        other => panic!("expected Diff, got {other:?}"),
    }
}

#[test]
fn join_already_joined_is_rejected() {
    let (handle, _outbound) = spawn_test_keeper();
    let a = SessionId::next();
    join(&handle, a, "p1");
    let second = join(&handle, a, "p1");
    match second {
        JoinOutcome::Denied { reason } => assert_eq!(reason, "JOIN_ALREADY_JOINED"),
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn join_room_full_is_rejected() {
    let (handle, _outbound) = spawn_test_keeper();
    join(&handle, SessionId::next(), "p1");
    join(&handle, SessionId::next(), "p2");
    let third = join(&handle, SessionId::next(), "p3");
    match third {
        JoinOutcome::Denied { reason } => assert_eq!(reason, "JOIN_ROOM_FULL"),
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn anonymous_join_gets_a_minted_player_id() {
    let (handle, _outbound) = spawn_test_keeper();
    let (tx, rx) = std::sync::mpsc::channel();
    handle
        .send(Op::Join {
            request: JoinRequest {
                session_id: SessionId::next(),
                requested_player_id: None,
                device_id: None,
                metadata: HashMap::new(),
            },
            respond: Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        })
        .unwrap();
    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let JoinOutcome::Allowed { player_id } = outcome else {
        panic!("expected join to be allowed")
    };
    assert_eq!(player_id.as_str().len(), 36);
    assert_eq!(player_id.as_str().matches('-').count(), 4);
}

#[test]
fn access_control_denial_blocks_join() {
    let def = LandDefinitionBuilder::<CookieState>::new("private-room")
        .can_join(Box::new(|_attempt, _state| JoinDecision::Deny("JOIN_DENIED".to_string())))
        .build()
        .unwrap();
    let outbound = Arc::new(RecordingOutbound::default());
    let (handle, _join) = LandKeeper::spawn(
        LandId::single_room("private-room"),
        Arc::new(def),
        CookieState::default(),
        Services::default(),
        None,
        outbound,
    );
    let outcome = join(&handle, SessionId::next(), "p1");
    match outcome {
        JoinOutcome::Denied { reason } => assert_eq!(reason, "JOIN_DENIED"),
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn action_on_unjoined_session_is_not_joined() {
    let (handle, outbound) = spawn_test_keeper();
    let outcome = act(
        &handle,
        SessionId::next(),
        "IncrementCookies",
        serde_json::json!({}),
        "r1",
    );
    match outcome {
        ActionOutcome::Error { code, .. } => assert_eq!(code, "NOT_JOINED"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(outbound.updates.lock().unwrap().is_empty());
}
