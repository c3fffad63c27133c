//! OCPP-J wire envelope.
//!
//! Frames are JSON arrays with an integer type indicator in the first
//! position:
//!
//! - `[2, "<messageId>", "<Action>", {payload}]` — Call (request)
//! - `[3, "<messageId>", {payload}]` — CallResult (response)
//! - `[4, "<messageId>", "<ErrorCode>", "<description>", {details}]` — CallError
//!
//! Decoding rejects anything that is not an array, whose indicator is not an
//! integer, or whose indicator is outside {2, 3, 4}.

use crate::error::{CallErrorCode, ProtocolError, ProtocolResult};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub const MESSAGE_TYPE_CALL: u64 = 2;
pub const MESSAGE_TYPE_CALL_RESULT: u64 = 3;
pub const MESSAGE_TYPE_CALL_ERROR: u64 = 4;

/// An outbound or inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    /// Build a Call with a fresh UUID v4 message id.
    pub fn new<T: Serialize>(action: impl Into<String>, payload: T) -> ProtocolResult<Self> {
        Ok(Call {
            message_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into a typed request.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A response correlated to a prior [`Call`] by message id.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    /// Build the response to `call`, carrying its message id forward.
    pub fn to<T: Serialize>(call: &Call, payload: T) -> ProtocolResult<Self> {
        Ok(CallResult {
            message_id: call.message_id.clone(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A protocol-level failure response.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub code: CallErrorCode,
    pub description: String,
    pub details: Value,
}

impl CallError {
    pub fn new(
        message_id: impl Into<String>,
        code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        CallError {
            message_id: message_id.into(),
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

/// Any OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Frame {
    pub fn message_id(&self) -> &str {
        match self {
            Frame::Call(c) => &c.message_id,
            Frame::CallResult(r) => &r.message_id,
            Frame::CallError(e) => &e.message_id,
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> ProtocolResult<String> {
        let value = match self {
            Frame::Call(c) => json!([MESSAGE_TYPE_CALL, c.message_id, c.action, c.payload]),
            Frame::CallResult(r) => json!([MESSAGE_TYPE_CALL_RESULT, r.message_id, r.payload]),
            Frame::CallError(e) => json!([
                MESSAGE_TYPE_CALL_ERROR,
                e.message_id,
                e.code.as_str(),
                e.description,
                e.details
            ]),
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// Parse a wire frame, validating shape before touching the payload.
    pub fn decode(text: &str) -> ProtocolResult<Frame> {
        let value: Value = serde_json::from_str(text)?;
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(ProtocolError::NotAnArray),
        };

        let indicator = items
            .first()
            .ok_or(ProtocolError::NonIntegerTypeIndicator)?;
        let message_type = match indicator {
            Value::Number(n) if n.is_u64() => n.as_u64().unwrap(),
            _ => return Err(ProtocolError::NonIntegerTypeIndicator),
        };

        match message_type {
            MESSAGE_TYPE_CALL => {
                expect_arity("Call", &items, 4)?;
                Ok(Frame::Call(Call {
                    message_id: string_at(&items, 1, "message id must be a string")?,
                    action: string_at(&items, 2, "action must be a string")?,
                    payload: items[3].clone(),
                }))
            }
            MESSAGE_TYPE_CALL_RESULT => {
                expect_arity("CallResult", &items, 3)?;
                Ok(Frame::CallResult(CallResult {
                    message_id: string_at(&items, 1, "message id must be a string")?,
                    payload: items[2].clone(),
                }))
            }
            MESSAGE_TYPE_CALL_ERROR => {
                expect_arity("CallError", &items, 5)?;
                let code_str = string_at(&items, 2, "error code must be a string")?;
                Ok(Frame::CallError(CallError {
                    message_id: string_at(&items, 1, "message id must be a string")?,
                    code: CallErrorCode::parse(&code_str)?,
                    description: string_at(&items, 3, "error description must be a string")?,
                    details: items[4].clone(),
                }))
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

fn expect_arity(kind: &'static str, items: &[Value], expected: usize) -> ProtocolResult<()> {
    if items.len() != expected {
        return Err(ProtocolError::WrongArity {
            kind,
            expected,
            got: items.len(),
        });
    }
    Ok(())
}

fn string_at(items: &[Value], index: usize, what: &'static str) -> ProtocolResult<String> {
    match &items[index] {
        Value::String(s) => Ok(s.clone()),
        _ => Err(ProtocolError::BadElement(what)),
    }
}
