//! The per-session state machine (`spec.md` §4.5): `connected` ->
//! `joining` -> `joined` -> `ended`, plus the bookkeeping a
//! [`WebSocketProtocol`](super::ws::WebSocketProtocol) needs to route
//! frames without touching a `LandKeeper` directly.
//!
//! Grounded on the teacher's `SessionManager` (`protocol.rs`,
//! `server/protocol.rs`): a registry of per-session outbound channels. This
//! version adds the join/action request-response wiring (via `Op`'s
//! `respond` closures) and bounded-queue backpressure instead of an
//! unbounded channel.

use crate::codec::{
    ActionPayload, ActionResponsePayload, ActionResult, Encoding, Envelope, ErrorPayload,
    EventDirection, EventPayload, JoinPayload, JoinResponsePayload, LeavePayload,
    StateUpdatePayload,
};
use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::error::LandError;
use crate::land::keeper::{OpRecorder, Outbound};
use crate::land::op::{
    ActionOutcome, JoinOutcome, JoinRequest, LandHandle, LeaveReason, Op, ServerEventEnvelope,
};
use crate::realm::Realm;
use crate::state::StateSchema;
use crate::value::StateUpdate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Outbound frames queued per session before a slow reader gets disconnected
/// rather than letting memory grow without bound (`spec.md` §4.5: "a
/// session whose outbound queue exceeds a bound is closed with
/// `SLOW_CONSUMER`").
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Joining,
    Joined { land_id: String, player_id: String },
    Ended,
}

struct SessionEntry {
    outbound: mpsc::Sender<Vec<u8>>,
    encoding: Encoding,
    phase: SessionPhase,
    land_handle: Option<LandHandle>,
}

/// Returned from [`SessionManager::connect`]: the new session's id and the
/// receiving half of its outbound queue, for the transport's per-session
/// drain task to read from.
pub struct SessionHandle {
    pub session_id: SessionId,
    pub outbound_rx: mpsc::Receiver<Vec<u8>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Registry of connected sessions for one [`Realm`]. Implements
/// [`Outbound`] directly, so a `Realm<S>`'s Lands send state updates and
/// server events straight back through here without knowing a WebSocket is
/// involved.
pub struct SessionManager<S: StateSchema + Clone + Default> {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    realm: Arc<Realm<S>>,
    recorder_factory: Box<dyn Fn(&LandId) -> Option<Box<dyn OpRecorder>> + Send + Sync>,
}

impl<S: StateSchema + Clone + Default> SessionManager<S> {
    pub fn new(
        realm: Arc<Realm<S>>,
        recorder_factory: impl Fn(&LandId) -> Option<Box<dyn OpRecorder>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            realm,
            recorder_factory: Box::new(recorder_factory),
        })
    }

    /// Register a freshly-accepted connection. `spec.md` §4.5's `connected`
    /// phase: no Land yet, just a live outbound channel.
    pub fn connect(&self, encoding: Encoding) -> SessionHandle {
        let session_id = SessionId::next();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.sessions.write().unwrap().insert(
            session_id,
            SessionEntry {
                outbound: tx,
                encoding,
                phase: SessionPhase::Connected,
                land_handle: None,
            },
        );
        SessionHandle {
            session_id,
            outbound_rx: rx,
        }
    }

    pub fn phase(&self, session_id: SessionId) -> Option<SessionPhase> {
        self.sessions
            .read()
            .unwrap()
            .get(&session_id)
            .map(|e| e.phase.clone())
    }

    fn set_phase(&self, session_id: SessionId, phase: SessionPhase) {
        if let Some(entry) = self.sessions.write().unwrap().get_mut(&session_id) {
            entry.phase = phase;
        }
    }

    fn set_joined(
        &self,
        session_id: SessionId,
        land_id: &LandId,
        player_id: &PlayerId,
        land_handle: LandHandle,
    ) {
        if let Some(entry) = self.sessions.write().unwrap().get_mut(&session_id) {
            entry.phase = SessionPhase::Joined {
                land_id: land_id.canonical(),
                player_id: player_id.as_str().to_string(),
            };
            entry.land_handle = Some(land_handle);
        }
    }

    fn joined_land(&self, session_id: SessionId) -> Option<(LandHandle, String)> {
        let sessions = self.sessions.read().unwrap();
        let entry = sessions.get(&session_id)?;
        match &entry.phase {
            SessionPhase::Joined { land_id, .. } => {
                entry.land_handle.clone().map(|h| (h, land_id.clone()))
            }
            _ => None,
        }
    }

    fn encoding(&self, session_id: SessionId) -> Option<Encoding> {
        self.sessions.read().unwrap().get(&session_id).map(|e| e.encoding)
    }

    /// Count sessions currently joined to `land_id`, for an idle-Land reaper
    /// deciding whether a Land is safe to tear down.
    pub fn session_count_for_land(&self, land_id: &str) -> usize {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|entry| matches!(&entry.phase, SessionPhase::Joined { land_id: joined, .. } if joined == land_id))
            .count()
    }

    /// Disconnect: tell the joined Land (if any), then forget the session.
    /// `reason` distinguishes a client-initiated close from a dropped
    /// socket, mirroring `spec.md` §4.5's `ended` transitions.
    pub fn disconnect(&self, session_id: SessionId, reason: LeaveReason) {
        let entry = self.sessions.write().unwrap().remove(&session_id);
        if let Some(entry) = entry {
            if matches!(entry.phase, SessionPhase::Joined { .. }) {
                if let Some(handle) = entry.land_handle {
                    let _ = handle.send(Op::Leave { session_id, reason });
                }
            }
        }
    }

    fn send_envelope(&self, session_id: SessionId, envelope: &Envelope) {
        let encoding = match self.encoding(session_id) {
            Some(encoding) => encoding,
            None => return,
        };
        let bytes = match crate::codec::encode_envelope(encoding, envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("failed to encode outbound envelope for session {session_id}: {err}");
                return;
            }
        };
        let full = {
            let sessions = self.sessions.read().unwrap();
            match sessions.get(&session_id) {
                Some(entry) => entry.outbound.try_send(bytes).is_err(),
                None => return,
            }
        };
        if full {
            log::warn!("session {session_id} outbound queue full; closing as SLOW_CONSUMER");
            self.disconnect(session_id, LeaveReason::Disconnected);
        }
    }

    fn ensure_land(self: &Arc<Self>, land_id: LandId) -> Result<LandHandle, LandError> {
        let outbound: Arc<dyn Outbound> = Arc::clone(self) as Arc<dyn Outbound>;
        let recorder_factory = &self.recorder_factory;
        self.realm.get_or_create(
            land_id,
            S::default,
            |id| (recorder_factory)(id),
            outbound,
            now_millis(),
        )
    }

    /// Route one decoded inbound envelope to the right handler. This is
    /// the strict-routing seam (`spec.md` §9): a message naming a
    /// `landID`/`requestID` the session hasn't joined, or a kind the
    /// server doesn't accept inbound, is dropped rather than broadcast.
    pub fn dispatch_inbound(self: &Arc<Self>, session_id: SessionId, envelope: Envelope) {
        match envelope {
            Envelope::Join(payload) => self.handle_join(session_id, payload),
            Envelope::Action(payload) => self.handle_action(session_id, payload),
            Envelope::Leave(payload) => self.handle_leave(session_id, payload),
            Envelope::Event(payload) if payload.direction == EventDirection::FromClient => {
                self.handle_client_event(session_id, payload)
            }
            other => {
                log::debug!("session {session_id} sent an unsupported inbound envelope: {other:?}");
            }
        }
    }

    fn handle_join(self: &Arc<Self>, session_id: SessionId, payload: JoinPayload) {
        let land_id = match &payload.land_instance_id {
            Some(instance) => LandId::new(payload.land_type.clone(), instance.clone()),
            None => LandId::single_room(payload.land_type.clone()),
        };
        self.set_phase(session_id, SessionPhase::Joining);

        let land_handle = match self.ensure_land(land_id.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                self.set_phase(session_id, SessionPhase::Connected);
                self.send_envelope(
                    session_id,
                    &Envelope::JoinResponse(JoinResponsePayload {
                        request_id: payload.request_id,
                        success: false,
                        land_type: Some(payload.land_type),
                        land_instance_id: payload.land_instance_id,
                        land_id: None,
                        player_id: None,
                        player_slot: None,
                        encoding: None,
                        reason: Some(err.to_string()),
                    }),
                );
                return;
            }
        };

        let request = JoinRequest {
            session_id,
            requested_player_id: payload.player_id.clone().map(PlayerId::new),
            device_id: payload.device_id.clone(),
            metadata: payload.metadata.clone().unwrap_or_default(),
        };

        let manager = Arc::clone(self);
        let response_land_id = land_id.clone();
        let response_land_handle = land_handle.clone();
        let request_id = payload.request_id.clone();
        let land_type = payload.land_type.clone();
        let land_instance_id = payload.land_instance_id.clone();
        let encoding_name = self
            .encoding(session_id)
            .map(|e| e.as_wire_name().to_string());

        let sent = land_handle.send(Op::Join {
            request,
            respond: Box::new(move |outcome: JoinOutcome| match outcome {
                JoinOutcome::Allowed { player_id } => {
                    manager.set_joined(
                        session_id,
                        &response_land_id,
                        &player_id,
                        response_land_handle.clone(),
                    );
                    manager.send_envelope(
                        session_id,
                        &Envelope::JoinResponse(JoinResponsePayload {
                            request_id,
                            success: true,
                            land_type: Some(land_type),
                            land_instance_id,
                            land_id: Some(response_land_id.canonical()),
                            player_id: Some(player_id.as_str().to_string()),
                            player_slot: None,
                            encoding: encoding_name,
                            reason: None,
                        }),
                    );
                }
                JoinOutcome::Denied { reason } => {
                    manager.set_phase(session_id, SessionPhase::Connected);
                    manager.send_envelope(
                        session_id,
                        &Envelope::JoinResponse(JoinResponsePayload {
                            request_id,
                            success: false,
                            land_type: Some(land_type),
                            land_instance_id,
                            land_id: None,
                            player_id: None,
                            player_slot: None,
                            encoding: None,
                            reason: Some(reason),
                        }),
                    );
                }
            }),
        });

        if sent.is_err() {
            log::error!("land {land_id} disappeared before it could accept a join");
            self.set_phase(session_id, SessionPhase::Connected);
        }
    }

    fn handle_action(self: &Arc<Self>, session_id: SessionId, payload: ActionPayload) {
        let Some((land_handle, joined_land_id)) = self.joined_land(session_id) else {
            log::debug!("action from session {session_id} that hasn't joined a land; rejecting");
            self.send_envelope(
                session_id,
                &Envelope::ActionResponse(ActionResponsePayload {
                    request_id: payload.request_id,
                    response: ActionResult::Error {
                        code: "NOT_JOINED".into(),
                        message: "session has not joined a land".into(),
                        details: None,
                    },
                }),
            );
            return;
        };
        if joined_land_id != payload.land_id {
            log::debug!(
                "action landID {} doesn't match session {session_id}'s joined land {joined_land_id}; rejecting",
                payload.land_id
            );
            self.send_envelope(
                session_id,
                &Envelope::ActionResponse(ActionResponsePayload {
                    request_id: payload.request_id,
                    response: ActionResult::Error {
                        code: "NOT_JOINED".into(),
                        message: format!(
                            "session has not joined land {}",
                            payload.land_id
                        ),
                        details: None,
                    },
                }),
            );
            return;
        }

        let action_payload: serde_json::Value =
            serde_json::from_slice(&payload.payload).unwrap_or(serde_json::Value::Null);
        let manager = Arc::clone(self);
        let request_id = payload.request_id.clone();

        let sent = land_handle.send(Op::Action {
            session_id,
            type_identifier: payload.type_identifier,
            payload: action_payload,
            request_id: request_id.clone(),
            respond: Box::new(move |outcome: ActionOutcome| {
                let response = match outcome {
                    ActionOutcome::Success(value) => ActionResult::Success(value),
                    ActionOutcome::Error { code, message } => ActionResult::Error {
                        code,
                        message,
                        details: None,
                    },
                };
                manager.send_envelope(
                    session_id,
                    &Envelope::ActionResponse(ActionResponsePayload {
                        request_id,
                        response,
                    }),
                );
            }),
        });

        if sent.is_err() {
            self.send_envelope(
                session_id,
                &Envelope::ActionResponse(ActionResponsePayload {
                    request_id,
                    response: ActionResult::Error {
                        code: "LAND_GONE".into(),
                        message: "the land is no longer running".into(),
                        details: None,
                    },
                }),
            );
        }
    }

    fn handle_leave(&self, session_id: SessionId, payload: LeavePayload) {
        if let Some((land_handle, joined_land_id)) = self.joined_land(session_id) {
            if joined_land_id == payload.land_id {
                let _ = land_handle.send(Op::Leave {
                    session_id,
                    reason: LeaveReason::ClientRequested,
                });
                self.set_phase(session_id, SessionPhase::Connected);
            }
        }
    }

    fn handle_client_event(&self, session_id: SessionId, payload: EventPayload) {
        if let Some((land_handle, joined_land_id)) = self.joined_land(session_id) {
            if joined_land_id == payload.land_id {
                let _ = land_handle.send(Op::ClientEvent {
                    session_id,
                    type_identifier: payload.type_identifier,
                    payload: payload.payload,
                });
            }
        }
    }
}

impl<S: StateSchema + Clone + Default> Outbound for SessionManager<S> {
    fn send_state_update(&self, session_id: SessionId, update: StateUpdate) {
        if update.is_droppable_no_change() {
            return;
        }
        let Some((_, land_id)) = self.joined_land(session_id) else {
            return;
        };
        self.send_envelope(
            session_id,
            &Envelope::StateUpdate(StateUpdatePayload { land_id, update }),
        );
    }

    fn send_server_event(&self, session_id: SessionId, event: ServerEventEnvelope) {
        let Some((_, land_id)) = self.joined_land(session_id) else {
            return;
        };
        self.send_envelope(
            session_id,
            &Envelope::Event(EventPayload {
                land_id,
                direction: EventDirection::FromServer,
                type_identifier: event.type_identifier,
                payload: event.payload,
            }),
        );
    }

    fn close_session(&self, session_id: SessionId, reason: LeaveReason) {
        let code = match reason {
            LeaveReason::Kicked => "KICKED",
            LeaveReason::ReplacedByNewerJoin => "REPLACED_BY_NEWER_JOIN",
            LeaveReason::ClientRequested | LeaveReason::Disconnected => "SESSION_CLOSED",
        };
        self.send_envelope(
            session_id,
            &Envelope::Error(ErrorPayload {
                code: code.to_string(),
                message: "the server closed this session".to_string(),
                details: None,
            }),
        );
        self.disconnect(session_id, reason);
    }
}
