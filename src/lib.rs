// An authoritative, server-side runtime for real-time multiplayer state.
//
// A Land is one running instance of some game mode, lobby, or match — it
// owns a typed state tree, a single-writer processing loop, and the set of
// sessions currently joined to it. The server is always right: clients send
// Actions and receive diffs against the last state they were sent, never the
// other way around.
//
// Layered architecture:
//
// State Tree & Sync Engine (`state`, `sync`, `value`)
// Per-field sync policies (broadcast, per-player slice, server-only,
// internal) resolved once at Land creation into a descriptor table. The sync
// engine reads that table to produce first-sync snapshots and incremental
// diffs per session.
//
// Land (`land`, `realm`)
// `LandDefinition` is the immutable, declarative registration of a Land's
// actions, events, access control and lifecycle hooks. `LandKeeper` is the
// single-writer runtime loop driving one instance of it. `Realm` is the
// multi-Land registry, routing by `LandID` and creating instances lazily.
//
// Codec Layer (`codec`)
// Three wire encodings over one internal `Envelope` type: tagged JSON
// objects, flat opcode arrays, and MessagePack — chosen per session at
// connect time, never mixed mid-session.
//
// Transport Adapter (`transport`)
// Protocol-agnostic session bookkeeping (`connected` -> `joining` ->
// `joined`) plus a WebSocket binding. Routes inbound frames to a Land by
// strict `landID`/`requestID` match, dropping anything that doesn't.
//
// Reevaluation Recorder & Runner (`replay`)
// An append-only log of every committed op, and an offline runner that
// replays it against a fresh Land instance to verify the state hash matches
// at every step — the tool for catching nondeterminism bugs after the fact.
//
// Deterministic RNG & Hashing (`rng`, `hash`)
// A Land's RNG is seeded from its own `LandID`, never from wall-clock time,
// so the same action sequence against the same initial state always
// produces the same output state.

pub mod codec;
pub mod config;
pub mod hash;
pub mod ids;
pub mod land;
pub mod realm;
pub mod replay;
pub mod rng;
pub mod state;
pub mod sync;
pub mod transport;
pub mod value;

use crate::ids::LandId;
use crate::land::keeper::OpRecorder;
use crate::land::LandDefinition;
use crate::realm::Realm;
use crate::state::StateSchema;
use crate::transport::SessionManager;
use std::sync::Arc;

/// Top-level wiring for one deployed Realm: register Land definitions, wire
/// up a reevaluation recorder, and hand the result to a transport.
///
/// Mirrors the host-side assembly a deployment does once at startup —
/// register every `landType` this process serves, then start accepting
/// connections.
pub struct StateTreeServer<S: StateSchema + Clone + Default> {
    realm: Arc<Realm<S>>,
    recorder_factory: Box<dyn Fn(&LandId) -> Option<Box<dyn OpRecorder>> + Send + Sync>,
}

impl<S: StateSchema + Clone + Default> Default for StateTreeServer<S> {
    fn default() -> Self {
        Self {
            realm: Arc::new(Realm::new()),
            recorder_factory: Box::new(|_| None),
        }
    }
}

impl<S: StateSchema + Clone + Default> StateTreeServer<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `landType`'s definition. Panics on a duplicate or invalid
    /// `landType` — a fatal configuration error that must surface at
    /// startup, not once traffic is flowing.
    pub fn land(self, definition: LandDefinition<S>) -> Self {
        self.realm
            .register_definition(Arc::new(definition))
            .expect("duplicate or invalid landType registered at startup");
        self
    }

    /// Supply a factory for the reevaluation recorder attached to each Land
    /// instance this Realm creates. Defaults to "record nothing."
    pub fn recorder_factory(
        mut self,
        factory: impl Fn(&LandId) -> Option<Box<dyn OpRecorder>> + Send + Sync + 'static,
    ) -> Self {
        self.recorder_factory = Box::new(factory);
        self
    }

    pub fn realm(&self) -> Arc<Realm<S>> {
        Arc::clone(&self.realm)
    }

    /// Build the session manager a transport binds against.
    pub fn session_manager(self) -> Arc<SessionManager<S>> {
        SessionManager::new(self.realm, self.recorder_factory)
    }

    #[cfg(feature = "ws")]
    pub async fn run_websocket(self, addr: &'static str)
    where
        S: Send + Sync + 'static,
    {
        let session_manager = self.session_manager();
        transport::WebSocketProtocol { addr }.run(session_manager).await;
    }
}
