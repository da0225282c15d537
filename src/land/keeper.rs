//! LandKeeper (`spec.md` §4.4): the single writer for one Land. Grounded on
//! the dedicated-thread-plus-mpsc shape of a synchronous runtime loop, with
//! `recv_timeout` driving the tick clock the same way a fixed-interval
//! update loop does.

use crate::hash::state_hash;
use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::context::{HandlerContext, JoinedSessions, Services, Session};
use crate::land::op::{
    ActionOutcome, AdminOp, Effects, JoinOutcome, LandHandle, LeaveReason, Op, ServerEventEnvelope,
    ServerEventTarget,
};
use crate::land::{JoinAttempt, JoinDecision, LandDefinition};
use crate::rng::DeterministicRng;
use crate::state::StateSchema;
use crate::sync::snapshot;
use crate::value::StateUpdate;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// What the keeper does with everything it would otherwise push over a
/// transport — implemented by the transport adapter, injected at
/// Land-creation time (`spec.md` §5: "Services bag: registration happens
/// at Land creation ... post-creation it is read-only").
pub trait Outbound: Send + Sync + 'static {
    fn send_state_update(&self, session_id: SessionId, update: StateUpdate);
    fn send_server_event(&self, session_id: SessionId, event: ServerEventEnvelope);
    fn close_session(&self, session_id: SessionId, reason: LeaveReason);
}

/// What gets appended to the reevaluation log after each committed op
/// (`spec.md` §4.7). The concrete writer lives in `crate::replay`; the
/// keeper only needs this narrow seam so the two modules don't cycle.
pub trait OpRecorder: Send {
    fn append(
        &mut self,
        tick_id: u64,
        kind: RecordedOpKind,
        payload: &serde_json::Value,
        state_hash: &str,
        emitted: &[ServerEventEnvelope],
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedOpKind {
    Action,
    Event,
    Tick,
}

/// One running Land instance: its state, its joined sessions, and every
/// piece of per-Land bookkeeping the processing loop needs.
pub struct LandKeeper<S: StateSchema + Clone> {
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    state: S,
    tick_id: u64,
    sessions: JoinedSessions,
    join_order: VecDeque<SessionId>,
    services: Services,
    rng: DeterministicRng,
    recorder: Option<Box<dyn OpRecorder>>,
    outbound: Arc<dyn Outbound>,
    tick_handler_disabled: bool,
    self_handle: Option<LandHandle>,
}

impl<S: StateSchema + Clone> LandKeeper<S> {
    fn new(
        land_id: LandId,
        definition: Arc<LandDefinition<S>>,
        state: S,
        services: Services,
        recorder: Option<Box<dyn OpRecorder>>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        let rng = DeterministicRng::from_land_id(&land_id.canonical());
        Self {
            land_id,
            definition,
            state,
            tick_id: 0,
            sessions: JoinedSessions::default(),
            join_order: VecDeque::new(),
            services,
            rng,
            recorder,
            outbound,
            tick_handler_disabled: false,
            self_handle: None,
        }
    }

    /// Spawn the keeper on a dedicated OS thread and return a handle other
    /// threads can enqueue ops through. `afterCreate` runs synchronously
    /// before the loop starts, matching `spec.md` §4.3's lifecycle order.
    pub fn spawn(
        land_id: LandId,
        definition: Arc<LandDefinition<S>>,
        mut state: S,
        services: Services,
        recorder: Option<Box<dyn OpRecorder>>,
        outbound: Arc<dyn Outbound>,
    ) -> (LandHandle, JoinHandle<()>) {
        if let Some(after_create) = &definition.after_create {
            after_create(&mut state);
        }
        let mut keeper = Self::new(land_id, definition, state, services, recorder, outbound);
        let (tx, rx) = mpsc::channel();
        let handle = LandHandle::new(tx);
        keeper.self_handle = Some(handle.clone());
        let join_handle = thread::spawn(move || keeper.run(rx));
        (handle, join_handle)
    }

    fn run(&mut self, rx: Receiver<Op>) {
        let tick_interval = self.definition.tick_interval;
        loop {
            let op = match tick_interval {
                Some(interval) => match rx.recv_timeout(interval) {
                    Ok(op) => op,
                    Err(RecvTimeoutError::Timeout) => Op::Tick,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(op) => op,
                    Err(_) => break,
                },
            };
            self.process(op);
        }
    }

    /// One full iteration of the processing loop (`spec.md` §4.4): dispatch
    /// the op, run the post-op sync pass, fan out server events, clear
    /// dirty bits, then record. Join/Leave/Admin run their own sync pass
    /// inline and return early — they never carry handler-produced effects.
    fn process(&mut self, op: Op) {
        let (recorded_kind, recorded_payload, mut effects) = match op {
            Op::Join { request, respond } => {
                self.handle_join(request, respond);
                return;
            }
            Op::Leave { session_id, reason } => {
                self.handle_leave(session_id, reason);
                return;
            }
            Op::Action {
                session_id,
                type_identifier,
                payload,
                request_id,
                respond,
            } => {
                let (outcome, effects) =
                    self.handle_action(session_id, &type_identifier, payload.clone());
                respond(outcome);
                let record_payload = serde_json::json!({
                    "requestId": request_id,
                    "typeIdentifier": type_identifier,
                    "payload": payload,
                });
                (RecordedOpKind::Action, record_payload, effects)
            }
            Op::ClientEvent {
                session_id,
                type_identifier,
                payload,
            } => {
                let effects =
                    self.handle_client_event(session_id, &type_identifier, payload.clone());
                let record_payload = serde_json::json!({
                    "typeIdentifier": type_identifier,
                    "payload": payload,
                });
                (RecordedOpKind::Event, record_payload, effects)
            }
            Op::Tick => {
                let effects = self.handle_tick();
                (RecordedOpKind::Tick, serde_json::Value::Null, effects)
            }
            Op::Admin(admin) => {
                self.handle_admin(admin);
                return;
            }
        };

        self.post_op_sync_pass();
        let emitted = effects.server_events.clone();
        self.fan_out_server_events(&mut effects);
        self.spawn_subtasks(effects);
        self.clear_dirty_all();
        self.record(recorded_kind, &recorded_payload, &emitted);
    }

    fn handle_join(
        &mut self,
        request: crate::land::op::JoinRequest,
        respond: Box<dyn FnOnce(JoinOutcome) + Send>,
    ) {
        if self.sessions.contains(request.session_id) {
            respond(JoinOutcome::Denied {
                reason: "JOIN_ALREADY_JOINED".to_string(),
            });
            return;
        }

        let attempt = JoinAttempt {
            requested_player_id: request.requested_player_id.as_ref(),
            device_id: request.device_id.as_deref(),
            metadata: &request.metadata,
            currently_joined: self.sessions.len(),
        };
        let decision = (self.definition.can_join)(&attempt, &self.state);

        let at_capacity = self
            .definition
            .max_players
            .is_some_and(|max| self.sessions.len() >= max);

        let decision = if at_capacity {
            match decision {
                JoinDecision::Allow => JoinDecision::Deny("JOIN_ROOM_FULL".to_string()),
                other => other,
            }
        } else {
            decision
        };

        match decision {
            JoinDecision::Deny(reason) => {
                respond(JoinOutcome::Denied { reason });
            }
            JoinDecision::ReplaceOldest => {
                if let Some(oldest) = self.join_order.pop_front() {
                    self.handle_leave(oldest, LeaveReason::ReplacedByNewerJoin);
                }
                self.admit(request, respond);
            }
            JoinDecision::Allow => {
                self.admit(request, respond);
            }
        }
    }

    fn admit(
        &mut self,
        request: crate::land::op::JoinRequest,
        respond: Box<dyn FnOnce(JoinOutcome) + Send>,
    ) {
        let player_id = request
            .requested_player_id
            .clone()
            .unwrap_or_else(|| PlayerId::new(uuid::Uuid::new_v4().to_string()));
        let session = Session {
            id: request.session_id,
            player_id: player_id.clone(),
            device_id: request.device_id,
            metadata: request.metadata,
            joined_at_tick: self.tick_id,
        };
        self.sessions.insert(session);
        self.join_order.push_back(request.session_id);

        if let Some(on_join) = &self.definition.on_join {
            let mut ctx = HandlerContext {
                tick_id: self.tick_id,
                rng: &mut self.rng,
                services: &self.services,
                sessions: &self.sessions,
                origin_session: Some(request.session_id),
            };
            on_join(&mut self.state, &mut ctx);
        }

        respond(JoinOutcome::Allowed { player_id });

        self.post_op_sync_pass();
        self.clear_dirty_all();
        self.record(RecordedOpKind::Event, &serde_json::json!({ "join": true }), &[]);
    }

    fn handle_leave(&mut self, session_id: SessionId, reason: LeaveReason) {
        if !self.sessions.contains(session_id) {
            return;
        }
        if let Some(on_leave) = &self.definition.on_leave {
            let mut ctx = HandlerContext {
                tick_id: self.tick_id,
                rng: &mut self.rng,
                services: &self.services,
                sessions: &self.sessions,
                origin_session: Some(session_id),
            };
            on_leave(&mut self.state, &mut ctx);
        }
        self.sessions.remove(session_id);
        self.join_order.retain(|id| *id != session_id);
        self.outbound.close_session(session_id, reason);

        self.post_op_sync_pass();
        self.clear_dirty_all();
        self.record(RecordedOpKind::Event, &serde_json::json!({ "leave": true }), &[]);
    }

    fn handle_action(
        &mut self,
        session_id: SessionId,
        type_identifier: &str,
        payload: serde_json::Value,
    ) -> (ActionOutcome, Effects) {
        if !self.sessions.contains(session_id) {
            return (
                ActionOutcome::Error {
                    code: "NOT_JOINED".to_string(),
                    message: "session has not joined this land".to_string(),
                },
                Effects::default(),
            );
        }
        let Some(action) = self.definition.action(type_identifier) else {
            return (
                ActionOutcome::Error {
                    code: "ACTION_NOT_REGISTERED".to_string(),
                    message: type_identifier.to_string(),
                },
                Effects::default(),
            );
        };
        let prestate = self.state.clone();
        let mut ctx = HandlerContext {
            tick_id: self.tick_id,
            rng: &mut self.rng,
            services: &self.services,
            sessions: &self.sessions,
            origin_session: Some(session_id),
        };
        match (action.handler)(&mut self.state, payload, &mut ctx) {
            Ok((response, effects)) => (ActionOutcome::Success(response), effects),
            Err(err) => {
                self.state = prestate;
                (
                    ActionOutcome::Error {
                        code: err.code,
                        message: err.message,
                    },
                    Effects::default(),
                )
            }
        }
    }

    fn handle_client_event(
        &mut self,
        session_id: SessionId,
        type_identifier: &str,
        payload: serde_json::Value,
    ) -> Effects {
        if !self.sessions.contains(session_id) {
            return Effects::default();
        }
        let Some(definition) = self.definition.client_event(type_identifier) else {
            return Effects::default();
        };
        let Some(handler) = &definition.handler else {
            return Effects::default();
        };
        let mut ctx = HandlerContext {
            tick_id: self.tick_id,
            rng: &mut self.rng,
            services: &self.services,
            sessions: &self.sessions,
            origin_session: Some(session_id),
        };
        handler(&mut self.state, payload, &mut ctx)
    }

    /// Runs the tick handler under `catch_unwind`; a panic rolls `state`
    /// back to its pre-tick value and disables further ticks until an
    /// admin resets it (`spec.md` §4.4 failure semantics).
    fn handle_tick(&mut self) -> Effects {
        self.tick_id += 1;
        if self.tick_handler_disabled {
            return Effects::default();
        }
        let Some(tick_handler) = &self.definition.tick_handler else {
            return Effects::default();
        };
        let prestate = self.state.clone();
        let mut rng = self.rng.clone();
        let services = &self.services;
        let sessions = &self.sessions;
        let tick_id = self.tick_id;
        let state = &mut self.state;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = HandlerContext {
                tick_id,
                rng: &mut rng,
                services,
                sessions,
                origin_session: None,
            };
            tick_handler(state, &mut ctx)
        }));

        match result {
            Ok(effects) => {
                self.rng = rng;
                effects
            }
            Err(_) => {
                log::error!(
                    "land {} tick handler panicked at tick {}; rolling back state and disabling further ticks",
                    self.land_id,
                    self.tick_id
                );
                self.state = prestate;
                self.tick_handler_disabled = true;
                Effects::default()
            }
        }
    }

    fn handle_admin(&mut self, admin: AdminOp) {
        match admin {
            AdminOp::ForceKick { session_id, reason } => {
                log::info!("land {} force-kicking session {session_id}: {reason}", self.land_id);
                self.handle_leave(session_id, LeaveReason::Kicked);
            }
            AdminOp::GetState { respond } => {
                let snap = snapshot(&self.state, self.definition.descriptors(), None);
                respond(snap);
            }
            AdminOp::Finalize { respond } => {
                if let Some(after_finalize) = &self.definition.after_finalize {
                    let mut ctx = HandlerContext {
                        tick_id: self.tick_id,
                        rng: &mut self.rng,
                        services: &self.services,
                        sessions: &self.sessions,
                        origin_session: None,
                    };
                    after_finalize(&mut self.state, &mut ctx);
                }
                let snap = snapshot(&self.state, self.definition.descriptors(), None);
                respond(snap);
            }
            AdminOp::ResetTickPanic => {
                self.tick_handler_disabled = false;
            }
        }
    }

    /// Emit a `StateUpdate` to every joined session, per `spec.md` §4.2's
    /// per-session emission rule. Sessions with only `broadcast` dirt share
    /// one computed diff; `perPlayerSlice` owners get their own.
    fn post_op_sync_pass(&mut self) {
        let descriptors = self.definition.descriptors();
        let ids: Vec<SessionId> = self.sessions.ids().collect();
        for session_id in ids {
            let player_id = self.sessions.get(session_id).map(|s| s.player_id.clone());
            let Some(player_id) = player_id else { continue };
            let current = snapshot(&self.state, descriptors, Some(&player_id));
            let update = self
                .sessions
                .sync_state_mut(session_id)
                .map(|s| s.advance(current));
            if let Some(update) = update
                && !update.is_droppable_no_change()
            {
                self.outbound.send_state_update(session_id, update);
            }
        }
    }

    fn fan_out_server_events(&self, effects: &mut Effects) {
        for event in effects.server_events.drain(..) {
            for session_id in self.resolve_targets(&event.target) {
                self.outbound.send_server_event(session_id, event.clone());
            }
        }
    }

    fn resolve_targets(&self, target: &ServerEventTarget) -> Vec<SessionId> {
        match target {
            ServerEventTarget::Session(id) => {
                if self.sessions.contains(*id) {
                    vec![*id]
                } else {
                    vec![]
                }
            }
            ServerEventTarget::Player(player_id) => self.sessions.sessions_for_player(player_id),
            ServerEventTarget::All => self.sessions.ids().collect(),
            ServerEventTarget::AllExcept(excluded) => {
                self.sessions.ids().filter(|id| id != excluded).collect()
            }
        }
    }

    fn spawn_subtasks(&self, effects: Effects) {
        for subtask in effects.subtasks {
            let handle = self
                .self_handle
                .clone()
                .expect("keeper always has a self_handle once spawned");
            tokio::spawn(subtask(handle));
        }
    }

    fn clear_dirty_all(&mut self) {
        for d in self.definition.descriptors() {
            (d.clear_dirty)(&mut self.state);
        }
    }

    fn record(
        &mut self,
        kind: RecordedOpKind,
        payload: &serde_json::Value,
        emitted: &[ServerEventEnvelope],
    ) {
        if let Some(recorder) = &mut self.recorder {
            let full = snapshot(&self.state, self.definition.descriptors(), None);
            let hash = state_hash(&full);
            recorder.append(self.tick_id, kind, payload, &hash, emitted);
        }
    }
}

/// A self-contained stepper used by the reevaluation runner
/// (`crate::replay::runner`): drives a fresh `LandKeeper` directly through
/// recorded ops, bypassing the op queue and transport entirely, so replay
/// stays single-threaded and synchronous.
pub struct ReevaluationStepper<S: StateSchema + Clone> {
    keeper: LandKeeper<S>,
}

impl<S: StateSchema + Clone> ReevaluationStepper<S> {
    pub fn new(land_id: LandId, definition: Arc<LandDefinition<S>>, mut state: S) -> Self {
        if let Some(after_create) = &definition.after_create {
            after_create(&mut state);
        }
        Self {
            keeper: LandKeeper::new(
                land_id,
                definition,
                state,
                Services::default(),
                None,
                Arc::new(NullOutbound),
            ),
        }
    }

    /// Replay one recorded action: runs the registered handler for
    /// `type_identifier` with `payload` directly against state, ignoring
    /// the handler's direct response (the runner only cares about the
    /// resulting state hash) and bypassing the live keeper's
    /// joined-session check — reevaluation has no transport session to
    /// check membership against.
    pub fn replay_action(&mut self, type_identifier: &str, payload: serde_json::Value) {
        let keeper = &mut self.keeper;
        let Some(action) = keeper.definition.action(type_identifier) else {
            log::warn!("reevaluation log references unregistered action '{type_identifier}'");
            return;
        };
        let mut ctx = HandlerContext {
            tick_id: keeper.tick_id,
            rng: &mut keeper.rng,
            services: &keeper.services,
            sessions: &keeper.sessions,
            origin_session: None,
        };
        if let Err(err) = (action.handler)(&mut keeper.state, payload, &mut ctx) {
            log::warn!("reevaluation replay of action '{type_identifier}' returned an error: {err}");
        }
        keeper.clear_dirty_all();
    }

    /// Replay one recorded client event the same way.
    pub fn replay_event(&mut self, type_identifier: &str, payload: serde_json::Value) {
        let keeper = &mut self.keeper;
        let Some(definition) = keeper.definition.client_event(type_identifier) else {
            return;
        };
        let Some(handler) = &definition.handler else {
            return;
        };
        let mut ctx = HandlerContext {
            tick_id: keeper.tick_id,
            rng: &mut keeper.rng,
            services: &keeper.services,
            sessions: &keeper.sessions,
            origin_session: None,
        };
        handler(&mut keeper.state, payload, &mut ctx);
        keeper.clear_dirty_all();
    }

    /// Replay one recorded tick.
    pub fn replay_tick(&mut self) {
        let _effects = self.keeper.handle_tick();
        self.keeper.clear_dirty_all();
    }

    /// The current full state hash, for comparison against the recorded one.
    pub fn state_hash(&self) -> String {
        let full = snapshot(
            &self.keeper.state,
            self.keeper.definition.descriptors(),
            None,
        );
        state_hash(&full)
    }
}

struct NullOutbound;
impl Outbound for NullOutbound {
    fn send_state_update(&self, _session_id: SessionId, _update: StateUpdate) {}
    fn send_server_event(&self, _session_id: SessionId, _event: ServerEventEnvelope) {}
    fn close_session(&self, _session_id: SessionId, _reason: LeaveReason) {}
}
