//! `jsonObject` encoding: `{"kind": "...", "payload": {...}}`, UTF-8 text
//! frames. The reference encoding every client library supports; the other
//! two exist for bandwidth, not capability, so this one is written first
//! and the others checked against it.

use super::{
    ActionPayload, ActionResponsePayload, ActionResult, CodecError, Encoding, Envelope,
    ErrorPayload, EventDirection, EventPayload, JoinPayload, JoinResponsePayload, LeavePayload,
    StateUpdatePayload, WireCodec,
};
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;

pub struct JsonObject;

impl WireCodec for JsonObject {
    const ENCODING: Encoding = Encoding::JsonObject;

    fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let value = to_value(envelope);
        serde_json::to_vec(&value).map_err(|_| CodecError::MalformedEnvelope)
    }

    fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| CodecError::MalformedEnvelope)?;
        from_value(&value)
    }
}

fn to_value(envelope: &Envelope) -> Value {
    match envelope {
        Envelope::Join(p) => json!({
            "kind": "join",
            "payload": {
                "requestID": p.request_id,
                "landType": p.land_type,
                "landInstanceID": p.land_instance_id,
                "playerID": p.player_id,
                "deviceID": p.device_id,
                "metadata": p.metadata,
            }
        }),
        Envelope::JoinResponse(p) => json!({
            "kind": "joinResponse",
            "payload": {
                "requestID": p.request_id,
                "success": p.success,
                "landType": p.land_type,
                "landInstanceID": p.land_instance_id,
                "landID": p.land_id,
                "playerID": p.player_id,
                "playerSlot": p.player_slot,
                "encoding": p.encoding,
                "reason": p.reason,
            }
        }),
        Envelope::Leave(p) => json!({
            "kind": "leave",
            "payload": { "landID": p.land_id }
        }),
        Envelope::Action(p) => json!({
            "kind": "action",
            "payload": {
                "requestID": p.request_id,
                "landID": p.land_id,
                "type": p.type_identifier,
                "payload": base64::engine::general_purpose::STANDARD.encode(&p.payload),
            }
        }),
        Envelope::ActionResponse(p) => {
            let response = match &p.response {
                ActionResult::Success(value) => json!({ "ok": true, "result": value }),
                ActionResult::Error {
                    code,
                    message,
                    details,
                } => json!({
                    "ok": false,
                    "code": code,
                    "message": message,
                    "details": details,
                }),
            };
            json!({
                "kind": "actionResponse",
                "payload": {
                    "requestID": p.request_id,
                    "response": response,
                }
            })
        }
        Envelope::Event(p) => json!({
            "kind": "event",
            "payload": {
                "landID": p.land_id,
                "direction": match p.direction {
                    EventDirection::FromClient => "fromClient",
                    EventDirection::FromServer => "fromServer",
                },
                "type": p.type_identifier,
                "payload": p.payload,
            }
        }),
        Envelope::Error(p) => json!({
            "kind": "error",
            "payload": {
                "code": p.code,
                "message": p.message,
                "details": p.details,
            }
        }),
        Envelope::StateUpdate(p) => json!({
            "kind": "stateUpdate",
            "payload": {
                "landID": p.land_id,
                "update": p.update,
            }
        }),
    }
}

fn from_value(value: &Value) -> Result<Envelope, CodecError> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or(CodecError::MalformedEnvelope)?;
    let payload = value.get("payload").ok_or(CodecError::MalformedEnvelope)?;

    match kind {
        "join" => Ok(Envelope::Join(JoinPayload {
            request_id: string_field(payload, "requestID")?,
            land_type: string_field(payload, "landType")?,
            land_instance_id: optional_string_field(payload, "landInstanceID"),
            player_id: optional_string_field(payload, "playerID"),
            device_id: optional_string_field(payload, "deviceID"),
            metadata: metadata_field(payload),
        })),
        "joinResponse" => Ok(Envelope::JoinResponse(JoinResponsePayload {
            request_id: string_field(payload, "requestID")?,
            success: payload
                .get("success")
                .and_then(Value::as_bool)
                .ok_or(CodecError::MalformedEnvelope)?,
            land_type: optional_string_field(payload, "landType"),
            land_instance_id: optional_string_field(payload, "landInstanceID"),
            land_id: optional_string_field(payload, "landID"),
            player_id: optional_string_field(payload, "playerID"),
            player_slot: payload
                .get("playerSlot")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            encoding: optional_string_field(payload, "encoding"),
            reason: optional_string_field(payload, "reason"),
        })),
        "leave" => Ok(Envelope::Leave(LeavePayload {
            land_id: string_field(payload, "landID")?,
        })),
        "action" => {
            let encoded = string_field(payload, "payload")?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| CodecError::MalformedEnvelope)?;
            Ok(Envelope::Action(ActionPayload {
                request_id: string_field(payload, "requestID")?,
                land_id: string_field(payload, "landID")?,
                type_identifier: string_field(payload, "type")?,
                payload: decoded,
            }))
        }
        "actionResponse" => {
            let response = payload
                .get("response")
                .ok_or(CodecError::MalformedEnvelope)?;
            let ok = response
                .get("ok")
                .and_then(Value::as_bool)
                .ok_or(CodecError::MalformedEnvelope)?;
            let result = if ok {
                ActionResult::Success(response.get("result").cloned().unwrap_or(Value::Null))
            } else {
                ActionResult::Error {
                    code: string_field(response, "code")?,
                    message: string_field(response, "message")?,
                    details: response.get("details").cloned(),
                }
            };
            Ok(Envelope::ActionResponse(ActionResponsePayload {
                request_id: string_field(payload, "requestID")?,
                response: result,
            }))
        }
        "event" => {
            let direction = match payload.get("direction").and_then(Value::as_str) {
                Some("fromClient") => EventDirection::FromClient,
                Some("fromServer") => EventDirection::FromServer,
                _ => return Err(CodecError::MalformedEnvelope),
            };
            Ok(Envelope::Event(EventPayload {
                land_id: string_field(payload, "landID")?,
                direction,
                type_identifier: string_field(payload, "type")?,
                payload: payload.get("payload").cloned().unwrap_or(Value::Null),
            }))
        }
        "error" => Ok(Envelope::Error(ErrorPayload {
            code: string_field(payload, "code")?,
            message: string_field(payload, "message")?,
            details: payload.get("details").cloned(),
        })),
        "stateUpdate" => Ok(Envelope::StateUpdate(StateUpdatePayload {
            land_id: string_field(payload, "landID")?,
            update: serde_json::from_value(
                payload.get("update").cloned().ok_or(CodecError::MalformedEnvelope)?,
            )
            .map_err(|_| CodecError::MalformedEnvelope)?,
        })),
        other => Err(CodecError::UnknownKind(other.to_string())),
    }
}

fn string_field(value: &Value, key: &str) -> Result<String, CodecError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(CodecError::MalformedEnvelope)
}

fn optional_string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn metadata_field(value: &Value) -> Option<HashMap<String, String>> {
    let object = value.get("metadata")?.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}
