//! The Land op queue (`spec.md` §4.4): the only way anything outside the
//! keeper's thread touches a Land's state.

use crate::ids::{PlayerId, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::Sender;

/// A deferred re-entry into the op queue, spawned outside the single-writer
/// loop for I/O that must not block it (`spec.md` §5: "subtasks run outside
/// the single-writer loop ... they must go back through the op queue").
///
/// Boxed so a handler can hand back an arbitrary future without the keeper
/// needing to know its concrete type; `LandHandle` is the only thing it may
/// use to get back in, typically by enqueueing a synthetic `Action` once the
/// async work completes.
pub type Subtask =
    Box<dyn FnOnce(LandHandle) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A cheap, cloneable capability to re-enqueue ops against a specific Land
/// from outside its keeper thread — the thing a spawned subtask (or the
/// transport adapter) holds.
#[derive(Clone)]
pub struct LandHandle {
    sender: Sender<Op>,
}

impl LandHandle {
    pub fn new(sender: Sender<Op>) -> Self {
        Self { sender }
    }

    /// Enqueue an op. Fails only once the keeper thread has shut down and
    /// dropped its receiver.
    pub fn send(&self, op: Op) -> Result<(), Op> {
        self.sender.send(op).map_err(|e| e.0)
    }
}

/// Where a handler-emitted server event should be fanned out, per
/// `spec.md` §4.4's "server-event fan-out targets".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEventTarget {
    Session(SessionId),
    Player(PlayerId),
    All,
    AllExcept(SessionId),
}

/// A typed server event payload (already encoded to the internal JSON
/// representation by the registered event's schema) plus its routing.
#[derive(Debug, Clone)]
pub struct ServerEventEnvelope {
    pub type_identifier: String,
    pub payload: serde_json::Value,
    pub target: ServerEventTarget,
}

/// What a handler hands back alongside its (optional) response:
/// server events to fan out and subtasks to spawn outside the loop.
#[derive(Default)]
pub struct Effects {
    pub server_events: Vec<ServerEventEnvelope>,
    pub subtasks: Vec<Subtask>,
}

impl Effects {
    pub fn emit(&mut self, event: ServerEventEnvelope) {
        self.server_events.push(event);
    }

    pub fn spawn(&mut self, subtask: Subtask) {
        self.subtasks.push(subtask);
    }
}

/// The reason a session left, for bookkeeping/logging — not wire-visible
/// beyond whatever the caller chooses to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    ClientRequested,
    Disconnected,
    Kicked,
    ReplacedByNewerJoin,
}

/// Outcome of a Join attempt, used both to drive `onJoin`/access control and
/// to build the `joinResponse` envelope at the transport layer.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Allowed { player_id: PlayerId },
    Denied { reason: String },
}

/// An in-flight Join request: carries enough to run access control and,
/// on success, construct a [`Session`].
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub session_id: SessionId,
    pub requested_player_id: Option<PlayerId>,
    pub device_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// The internal op types a `LandKeeper` drains from its queue
/// (`spec.md` §4.4).
pub enum Op {
    Join {
        request: JoinRequest,
        respond: Box<dyn FnOnce(JoinOutcome) + Send>,
    },
    Leave {
        session_id: SessionId,
        reason: LeaveReason,
    },
    Action {
        session_id: SessionId,
        type_identifier: String,
        payload: serde_json::Value,
        request_id: String,
        respond: Box<dyn FnOnce(ActionOutcome) + Send>,
    },
    ClientEvent {
        session_id: SessionId,
        type_identifier: String,
        payload: serde_json::Value,
    },
    Tick,
    Admin(AdminOp),
}

/// The outcome delivered back to the transport adapter for a completed
/// Action, matched to the caller by `requestID`.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Success(serde_json::Value),
    Error { code: String, message: String },
}

/// Admin ops (`spec.md` §4.4: "force-kick, force-destroy, get-state —
/// same serialization").
pub enum AdminOp {
    ForceKick {
        session_id: SessionId,
        reason: String,
    },
    GetState {
        respond: Box<dyn FnOnce(crate::value::SnapshotValue) + Send>,
    },
    /// Runs `afterFinalize` (if registered) then responds with the
    /// resulting final snapshot. Sent by `Realm::remove` as the last op a
    /// Land's keeper thread processes before it's torn down.
    Finalize {
        respond: Box<dyn FnOnce(crate::value::SnapshotValue) + Send>,
    },
    ResetTickPanic,
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Join { request, .. } => f
                .debug_struct("Join")
                .field("session_id", &request.session_id)
                .finish(),
            Op::Leave { session_id, reason } => f
                .debug_struct("Leave")
                .field("session_id", session_id)
                .field("reason", reason)
                .finish(),
            Op::Action {
                session_id,
                type_identifier,
                request_id,
                ..
            } => f
                .debug_struct("Action")
                .field("session_id", session_id)
                .field("type_identifier", type_identifier)
                .field("request_id", request_id)
                .finish(),
            Op::ClientEvent {
                session_id,
                type_identifier,
                ..
            } => f
                .debug_struct("ClientEvent")
                .field("session_id", session_id)
                .field("type_identifier", type_identifier)
                .finish(),
            Op::Tick => write!(f, "Tick"),
            Op::Admin(_) => write!(f, "Admin"),
        }
    }
}
