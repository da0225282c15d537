//! Transport Adapter (`spec.md` §4.5): turns WebSocket frames into
//! [`crate::land::op::Op`]s and `Op` outcomes back into frames. Nothing in
//! `land` or `realm` knows a WebSocket exists; this is the only module that
//! does.

pub mod session;

#[cfg(feature = "ws")]
pub mod ws;

pub use session::{SessionHandle, SessionManager, SessionPhase};

#[cfg(feature = "ws")]
pub use ws::WebSocketProtocol;
