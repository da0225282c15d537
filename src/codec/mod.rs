//! Codec Layer (`spec.md` §6, §9): the wire-agnostic [`Envelope`] plus the
//! three required encodings. A session picks one encoding at connection
//! setup and keeps it for the session's whole life; state-update frames
//! (snapshots/diffs) may independently choose their own encoding, reported
//! in `joinResponse.encoding`.

pub mod json_object;
pub mod opcode_array;

#[cfg(feature = "msgpack")]
pub mod messagepack;

use std::collections::HashMap;

/// Matches `crate::api::schema::SchemaType` in spirit: whether an encoding
/// produces text or binary frames, so the transport layer knows which
/// WebSocket frame kind to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    JsonObject,
    OpcodeJsonArray,
    MessagePack,
}

impl Encoding {
    pub fn schema_type(self) -> SchemaType {
        match self {
            Encoding::JsonObject | Encoding::OpcodeJsonArray => SchemaType::Text,
            Encoding::MessagePack => SchemaType::Binary,
        }
    }

    pub fn as_wire_name(self) -> &'static str {
        match self {
            Encoding::JsonObject => "jsonObject",
            Encoding::OpcodeJsonArray => "opcodeJsonArray",
            Encoding::MessagePack => "messagepack",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "jsonObject" => Some(Encoding::JsonObject),
            "opcodeJsonArray" => Some(Encoding::OpcodeJsonArray),
            "messagepack" => Some(Encoding::MessagePack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    MalformedEnvelope,
    UnknownKind(String),
    UnsupportedEncoding,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MalformedEnvelope => write!(f, "malformed envelope"),
            CodecError::UnknownKind(kind) => write!(f, "unknown envelope kind '{kind}'"),
            CodecError::UnsupportedEncoding => write!(f, "encoding not compiled in"),
        }
    }
}

impl std::error::Error for CodecError {}

/// The opcode table (`spec.md` §6): integers are part of the wire contract
/// and must never be reassigned. `STATE_UPDATE` extends the table the spec
/// names to give snapshots/diffs a wire shape in `opcodeJsonArray`, since
/// those are the one envelope kind the spec leaves to "whichever encoding
/// is active" without pinning an opcode.
pub mod opcode {
    pub const ACTION: i64 = 100;
    pub const ACTION_RESPONSE: i64 = 101;
    pub const JOIN: i64 = 102;
    pub const ERROR: i64 = 104;
    pub const EVENT: i64 = 103;
    pub const JOIN_RESPONSE: i64 = 105;
    pub const LEAVE: i64 = 106;
    pub const STATE_UPDATE: i64 = 107;
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPayload {
    pub request_id: String,
    pub land_type: String,
    pub land_instance_id: Option<String>,
    pub player_id: Option<String>,
    pub device_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponsePayload {
    pub request_id: String,
    pub success: bool,
    pub land_type: Option<String>,
    pub land_instance_id: Option<String>,
    pub land_id: Option<String>,
    pub player_id: Option<String>,
    pub player_slot: Option<u32>,
    pub encoding: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeavePayload {
    pub land_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionPayload {
    pub request_id: String,
    pub land_id: String,
    pub type_identifier: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Success(serde_json::Value),
    Error {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponsePayload {
    pub request_id: String,
    pub response: ActionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    FromClient,
    FromServer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub land_id: String,
    pub direction: EventDirection,
    pub type_identifier: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdatePayload {
    pub land_id: String,
    pub update: crate::value::StateUpdate,
}

/// The envelope every wire message carries (`spec.md` §4.5, §6):
/// `{kind, payload}`, isomorphic across all three encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Join(JoinPayload),
    JoinResponse(JoinResponsePayload),
    Leave(LeavePayload),
    Action(ActionPayload),
    ActionResponse(ActionResponsePayload),
    Event(EventPayload),
    Error(ErrorPayload),
    StateUpdate(StateUpdatePayload),
}

pub trait WireCodec {
    const ENCODING: Encoding;

    fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError>;
    fn decode(bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// Dispatch to whichever codec a session negotiated. The transport layer
/// only ever knows the session's [`Encoding`], not a concrete codec type.
pub fn encode_envelope(encoding: Encoding, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::JsonObject => json_object::JsonObject::encode(envelope),
        Encoding::OpcodeJsonArray => opcode_array::OpcodeJsonArray::encode(envelope),
        #[cfg(feature = "msgpack")]
        Encoding::MessagePack => messagepack::MessagePack::encode(envelope),
        #[cfg(not(feature = "msgpack"))]
        Encoding::MessagePack => Err(CodecError::UnsupportedEncoding),
    }
}

pub fn decode_envelope(encoding: Encoding, bytes: &[u8]) -> Result<Envelope, CodecError> {
    match encoding {
        Encoding::JsonObject => json_object::JsonObject::decode(bytes),
        Encoding::OpcodeJsonArray => opcode_array::OpcodeJsonArray::decode(bytes),
        #[cfg(feature = "msgpack")]
        Encoding::MessagePack => messagepack::MessagePack::decode(bytes),
        #[cfg(not(feature = "msgpack"))]
        Encoding::MessagePack => Err(CodecError::UnsupportedEncoding),
    }
}
