//! Per-session bookkeeping and the context object handed to handlers.

use crate::ids::{PlayerId, SessionId};
use crate::rng::DeterministicRng;
use crate::sync::SessionSyncState;
use std::any::Any;
use std::collections::HashMap;

/// A joined session, as tracked inside a `LandKeeper`.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub player_id: PlayerId,
    pub device_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub joined_at_tick: u64,
}

/// Sessions are arena-owned by the keeper; handlers and the sync pass both
/// need read access to the same set, so it lives behind a small struct
/// rather than being threaded through every call individually.
#[derive(Default)]
pub struct JoinedSessions {
    by_session: HashMap<SessionId, Session>,
    sync_state: HashMap<SessionId, SessionSyncState>,
}

impl JoinedSessions {
    pub fn insert(&mut self, session: Session) {
        self.sync_state
            .insert(session.id, SessionSyncState::default());
        self.by_session.insert(session.id, session);
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sync_state.remove(&id);
        self.by_session.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.by_session.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.by_session.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.by_session.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.by_session.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }

    pub fn sessions_for_player(&self, player_id: &PlayerId) -> Vec<SessionId> {
        self.by_session
            .values()
            .filter(|s| &s.player_id == player_id)
            .map(|s| s.id)
            .collect()
    }

    pub fn sync_state_mut(&mut self, id: SessionId) -> Option<&mut SessionSyncState> {
        self.sync_state.get_mut(&id)
    }
}

/// Opaque, injected external collaborators (`ctx.services` in `spec.md`
/// §4.3): the deterministic RNG plus any application-registered extension,
/// looked up by a type id the way a request-scoped service locator would.
/// Registration happens at Land creation; post-creation, read-only.
#[derive(Default)]
pub struct Services {
    extensions: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn register<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.extensions.insert(key, Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.extensions.get(key).and_then(|v| v.downcast_ref())
    }
}

/// The mutable context passed to every handler invocation: the tick id, the
/// deterministic RNG, the services bag, and the currently joined sessions
/// (read-only — handlers mutate state, not membership, directly).
pub struct HandlerContext<'a> {
    pub tick_id: u64,
    pub rng: &'a mut DeterministicRng,
    pub services: &'a Services,
    pub sessions: &'a JoinedSessions,
    pub origin_session: Option<SessionId>,
}
