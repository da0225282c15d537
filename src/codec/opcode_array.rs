//! `opcodeJsonArray` encoding: still JSON text, but each envelope is a flat
//! array `[opcode, ...fields]` instead of a tagged object — cuts the
//! per-message key overhead of [`super::json_object`] while staying
//! debuggable over the wire. Field order per opcode is part of the wire
//! contract; see [`super::opcode`].

use super::{
    opcode, ActionPayload, ActionResponsePayload, ActionResult, CodecError, Encoding, Envelope,
    ErrorPayload, EventDirection, EventPayload, JoinPayload, JoinResponsePayload, LeavePayload,
    StateUpdatePayload, WireCodec,
};
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;

pub struct OpcodeJsonArray;

impl WireCodec for OpcodeJsonArray {
    const ENCODING: Encoding = Encoding::OpcodeJsonArray;

    fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let array = to_array(envelope);
        serde_json::to_vec(&array).map_err(|_| CodecError::MalformedEnvelope)
    }

    fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| CodecError::MalformedEnvelope)?;
        let array = value.as_array().ok_or(CodecError::MalformedEnvelope)?;
        from_array(array)
    }
}

fn to_array(envelope: &Envelope) -> Value {
    match envelope {
        Envelope::Join(p) => json!([
            opcode::JOIN,
            p.request_id,
            p.land_type,
            p.land_instance_id,
            p.player_id,
            p.device_id,
            p.metadata,
        ]),
        Envelope::JoinResponse(p) => json!([
            opcode::JOIN_RESPONSE,
            p.request_id,
            p.success,
            p.land_type,
            p.land_instance_id,
            p.land_id,
            p.player_id,
            p.player_slot,
            p.encoding,
            p.reason,
        ]),
        Envelope::Leave(p) => json!([opcode::LEAVE, p.land_id]),
        Envelope::Action(p) => json!([
            opcode::ACTION,
            p.request_id,
            p.land_id,
            p.type_identifier,
            base64::engine::general_purpose::STANDARD.encode(&p.payload),
        ]),
        Envelope::ActionResponse(p) => match &p.response {
            ActionResult::Success(value) => {
                json!([opcode::ACTION_RESPONSE, p.request_id, true, value, Value::Null, Value::Null])
            }
            ActionResult::Error {
                code,
                message,
                details,
            } => json!([
                opcode::ACTION_RESPONSE,
                p.request_id,
                false,
                code,
                message,
                details,
            ]),
        },
        Envelope::Event(p) => json!([
            opcode::EVENT,
            p.land_id,
            match p.direction {
                EventDirection::FromClient => "fromClient",
                EventDirection::FromServer => "fromServer",
            },
            p.type_identifier,
            p.payload,
        ]),
        Envelope::Error(p) => json!([opcode::ERROR, p.code, p.message, p.details]),
        Envelope::StateUpdate(p) => {
            json!([opcode::STATE_UPDATE, p.land_id, p.update])
        }
    }
}

fn from_array(array: &[Value]) -> Result<Envelope, CodecError> {
    let op = array
        .first()
        .and_then(Value::as_i64)
        .ok_or(CodecError::MalformedEnvelope)?;

    match op {
        o if o == opcode::JOIN => Ok(Envelope::Join(JoinPayload {
            request_id: str_at(array, 1)?,
            land_type: str_at(array, 2)?,
            land_instance_id: opt_str_at(array, 3),
            player_id: opt_str_at(array, 4),
            device_id: opt_str_at(array, 5),
            metadata: opt_metadata_at(array, 6),
        })),
        o if o == opcode::JOIN_RESPONSE => Ok(Envelope::JoinResponse(JoinResponsePayload {
            request_id: str_at(array, 1)?,
            success: array
                .get(2)
                .and_then(Value::as_bool)
                .ok_or(CodecError::MalformedEnvelope)?,
            land_type: opt_str_at(array, 3),
            land_instance_id: opt_str_at(array, 4),
            land_id: opt_str_at(array, 5),
            player_id: opt_str_at(array, 6),
            player_slot: array.get(7).and_then(Value::as_u64).map(|v| v as u32),
            encoding: opt_str_at(array, 8),
            reason: opt_str_at(array, 9),
        })),
        o if o == opcode::LEAVE => Ok(Envelope::Leave(LeavePayload {
            land_id: str_at(array, 1)?,
        })),
        o if o == opcode::ACTION => Ok(Envelope::Action(ActionPayload {
            request_id: str_at(array, 1)?,
            land_id: str_at(array, 2)?,
            type_identifier: str_at(array, 3)?,
            payload: base64::engine::general_purpose::STANDARD
                .decode(str_at(array, 4)?)
                .map_err(|_| CodecError::MalformedEnvelope)?,
        })),
        o if o == opcode::ACTION_RESPONSE => {
            let request_id = str_at(array, 1)?;
            let ok = array
                .get(2)
                .and_then(Value::as_bool)
                .ok_or(CodecError::MalformedEnvelope)?;
            let response = if ok {
                ActionResult::Success(array.get(3).cloned().unwrap_or(Value::Null))
            } else {
                ActionResult::Error {
                    code: str_at(array, 3)?,
                    message: str_at(array, 4)?,
                    details: array.get(5).cloned(),
                }
            };
            Ok(Envelope::ActionResponse(ActionResponsePayload {
                request_id,
                response,
            }))
        }
        o if o == opcode::EVENT => {
            let direction = match array.get(2).and_then(Value::as_str) {
                Some("fromClient") => EventDirection::FromClient,
                Some("fromServer") => EventDirection::FromServer,
                _ => return Err(CodecError::MalformedEnvelope),
            };
            Ok(Envelope::Event(EventPayload {
                land_id: str_at(array, 1)?,
                direction,
                type_identifier: str_at(array, 3)?,
                payload: array.get(4).cloned().unwrap_or(Value::Null),
            }))
        }
        o if o == opcode::ERROR => Ok(Envelope::Error(ErrorPayload {
            code: str_at(array, 1)?,
            message: str_at(array, 2)?,
            details: array.get(3).cloned(),
        })),
        o if o == opcode::STATE_UPDATE => Ok(Envelope::StateUpdate(StateUpdatePayload {
            land_id: str_at(array, 1)?,
            update: serde_json::from_value(array.get(2).cloned().ok_or(CodecError::MalformedEnvelope)?)
                .map_err(|_| CodecError::MalformedEnvelope)?,
        })),
        other => Err(CodecError::UnknownKind(other.to_string())),
    }
}

fn str_at(array: &[Value], index: usize) -> Result<String, CodecError> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(CodecError::MalformedEnvelope)
}

fn opt_str_at(array: &[Value], index: usize) -> Option<String> {
    array.get(index).and_then(Value::as_str).map(str::to_string)
}

fn opt_metadata_at(array: &[Value], index: usize) -> Option<HashMap<String, String>> {
    let object = array.get(index)?.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_round_trips() {
        let envelope = Envelope::Leave(LeavePayload {
            land_id: "lobby#main".into(),
        });
        let bytes = OpcodeJsonArray::encode(&envelope).unwrap();
        assert_eq!(bytes, br#"[106,"lobby#main"]"#);
        assert_eq!(OpcodeJsonArray::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn join_response_round_trips() {
        let envelope = Envelope::JoinResponse(JoinResponsePayload {
            request_id: "req-1".into(),
            success: true,
            land_type: Some("lobby".into()),
            land_instance_id: None,
            land_id: Some("lobby#main".into()),
            player_id: Some("p1".into()),
            player_slot: Some(2),
            encoding: Some("jsonObject".into()),
            reason: None,
        });
        let bytes = OpcodeJsonArray::encode(&envelope).unwrap();
        assert_eq!(OpcodeJsonArray::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn unrecognized_opcode_is_rejected() {
        let bytes = b"[999]";
        let err = OpcodeJsonArray::decode(bytes).unwrap_err();
        assert_eq!(err, CodecError::UnknownKind("999".into()));
    }
}
