//! `messagepack` encoding: binary frames via `rmp-serde`, for deployments
//! that want the bandwidth win and don't need to read frames off the wire
//! by eye. Mirrors [`super::Envelope`] with a serde-derived wire struct
//! since the internal enum intentionally isn't `Serialize`/`Deserialize`
//! itself (it carries raw `Vec<u8>`/`serde_json::Value` payloads shaped by
//! whichever encoding is active).

use super::{
    ActionPayload, ActionResponsePayload, ActionResult, CodecError, Encoding, Envelope,
    ErrorPayload, EventDirection, EventPayload, JoinPayload, JoinResponsePayload, LeavePayload,
    StateUpdatePayload, WireCodec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub struct MessagePack;

impl WireCodec for MessagePack {
    const ENCODING: Encoding = Encoding::MessagePack;

    fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let wire = WireEnvelope::from(envelope);
        rmp_serde::to_vec_named(&wire).map_err(|_| CodecError::MalformedEnvelope)
    }

    fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
        let wire: WireEnvelope =
            rmp_serde::from_slice(bytes).map_err(|_| CodecError::MalformedEnvelope)?;
        Envelope::try_from(wire)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WireEnvelope {
    Join(WireJoin),
    JoinResponse(WireJoinResponse),
    Leave(WireLeave),
    Action(WireAction),
    ActionResponse(WireActionResponse),
    Event(WireEvent),
    Error(WireError),
    StateUpdate(WireStateUpdate),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStateUpdate {
    land_id: String,
    update: crate::value::StateUpdate,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJoin {
    request_id: String,
    land_type: String,
    land_instance_id: Option<String>,
    player_id: Option<String>,
    device_id: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJoinResponse {
    request_id: String,
    success: bool,
    land_type: Option<String>,
    land_instance_id: Option<String>,
    land_id: Option<String>,
    player_id: Option<String>,
    player_slot: Option<u32>,
    encoding: Option<String>,
    reason: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLeave {
    land_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAction {
    request_id: String,
    land_id: String,
    type_identifier: String,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
enum WireActionResult {
    Success { result: serde_json::Value },
    Error {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActionResponse {
    request_id: String,
    response: WireActionResult,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum WireDirection {
    FromClient,
    FromServer,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    land_id: String,
    direction: WireDirection,
    type_identifier: String,
    payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Join(p) => WireEnvelope::Join(WireJoin {
                request_id: p.request_id.clone(),
                land_type: p.land_type.clone(),
                land_instance_id: p.land_instance_id.clone(),
                player_id: p.player_id.clone(),
                device_id: p.device_id.clone(),
                metadata: p.metadata.clone(),
            }),
            Envelope::JoinResponse(p) => WireEnvelope::JoinResponse(WireJoinResponse {
                request_id: p.request_id.clone(),
                success: p.success,
                land_type: p.land_type.clone(),
                land_instance_id: p.land_instance_id.clone(),
                land_id: p.land_id.clone(),
                player_id: p.player_id.clone(),
                player_slot: p.player_slot,
                encoding: p.encoding.clone(),
                reason: p.reason.clone(),
            }),
            Envelope::Leave(p) => WireEnvelope::Leave(WireLeave {
                land_id: p.land_id.clone(),
            }),
            Envelope::Action(p) => WireEnvelope::Action(WireAction {
                request_id: p.request_id.clone(),
                land_id: p.land_id.clone(),
                type_identifier: p.type_identifier.clone(),
                payload: p.payload.clone(),
            }),
            Envelope::ActionResponse(p) => WireEnvelope::ActionResponse(WireActionResponse {
                request_id: p.request_id.clone(),
                response: match &p.response {
                    ActionResult::Success(value) => WireActionResult::Success {
                        result: value.clone(),
                    },
                    ActionResult::Error {
                        code,
                        message,
                        details,
                    } => WireActionResult::Error {
                        code: code.clone(),
                        message: message.clone(),
                        details: details.clone(),
                    },
                },
            }),
            Envelope::Event(p) => WireEnvelope::Event(WireEvent {
                land_id: p.land_id.clone(),
                direction: match p.direction {
                    EventDirection::FromClient => WireDirection::FromClient,
                    EventDirection::FromServer => WireDirection::FromServer,
                },
                type_identifier: p.type_identifier.clone(),
                payload: p.payload.clone(),
            }),
            Envelope::Error(p) => WireEnvelope::Error(WireError {
                code: p.code.clone(),
                message: p.message.clone(),
                details: p.details.clone(),
            }),
            Envelope::StateUpdate(p) => WireEnvelope::StateUpdate(WireStateUpdate {
                land_id: p.land_id.clone(),
                update: p.update.clone(),
            }),
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = CodecError;

    fn try_from(wire: WireEnvelope) -> Result<Self, CodecError> {
        Ok(match wire {
            WireEnvelope::Join(p) => Envelope::Join(JoinPayload {
                request_id: p.request_id,
                land_type: p.land_type,
                land_instance_id: p.land_instance_id,
                player_id: p.player_id,
                device_id: p.device_id,
                metadata: p.metadata,
            }),
            WireEnvelope::JoinResponse(p) => Envelope::JoinResponse(JoinResponsePayload {
                request_id: p.request_id,
                success: p.success,
                land_type: p.land_type,
                land_instance_id: p.land_instance_id,
                land_id: p.land_id,
                player_id: p.player_id,
                player_slot: p.player_slot,
                encoding: p.encoding,
                reason: p.reason,
            }),
            WireEnvelope::Leave(p) => Envelope::Leave(LeavePayload { land_id: p.land_id }),
            WireEnvelope::Action(p) => Envelope::Action(ActionPayload {
                request_id: p.request_id,
                land_id: p.land_id,
                type_identifier: p.type_identifier,
                payload: p.payload,
            }),
            WireEnvelope::ActionResponse(p) => {
                Envelope::ActionResponse(ActionResponsePayload {
                    request_id: p.request_id,
                    response: match p.response {
                        WireActionResult::Success { result } => ActionResult::Success(result),
                        WireActionResult::Error {
                            code,
                            message,
                            details,
                        } => ActionResult::Error {
                            code,
                            message,
                            details,
                        },
                    },
                })
            }
            WireEnvelope::Event(p) => Envelope::Event(EventPayload {
                land_id: p.land_id,
                direction: match p.direction {
                    WireDirection::FromClient => EventDirection::FromClient,
                    WireDirection::FromServer => EventDirection::FromServer,
                },
                type_identifier: p.type_identifier,
                payload: p.payload,
            }),
            WireEnvelope::Error(p) => Envelope::Error(ErrorPayload {
                code: p.code,
                message: p.message,
                details: p.details,
            }),
            WireEnvelope::StateUpdate(p) => Envelope::StateUpdate(StateUpdatePayload {
                land_id: p.land_id,
                update: p.update,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips() {
        let envelope = Envelope::Event(EventPayload {
            land_id: "lobby#main".into(),
            direction: EventDirection::FromServer,
            type_identifier: "playerScored".into(),
            payload: serde_json::json!({"points": 10}),
        });
        let bytes = MessagePack::encode(&envelope).unwrap();
        assert_eq!(MessagePack::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn action_round_trips() {
        let envelope = Envelope::Action(ActionPayload {
            request_id: "req-9".into(),
            land_id: "lobby#main".into(),
            type_identifier: "buyUpgrade".into(),
            payload: serde_json::to_vec(&serde_json::json!({"upgradeId": "speed"})).unwrap(),
        });
        let bytes = MessagePack::encode(&envelope).unwrap();
        assert_eq!(MessagePack::decode(&bytes).unwrap(), envelope);
    }
}
