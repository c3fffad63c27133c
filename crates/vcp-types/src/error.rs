//! Protocol-level errors and the OCPP call error codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while framing or unframing OCPP-J messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame was not a JSON array.
    #[error("frame is not a JSON array")]
    NotAnArray,

    /// The message type indicator was missing or not an integer.
    #[error("message type indicator is not an integer")]
    NonIntegerTypeIndicator,

    /// The message type indicator was an integer outside {2, 3, 4}.
    #[error("unknown message type indicator: {0}")]
    UnknownMessageType(u64),

    /// The frame had the wrong number of elements for its type.
    #[error("malformed {kind} frame: expected {expected} elements, got {got}")]
    WrongArity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    /// A frame element had the wrong JSON type (e.g. non-string message id).
    #[error("malformed frame: {0}")]
    BadElement(&'static str),

    /// The error code string of a CallError was not a known OCPP code.
    #[error("unknown call error code: {0}")]
    UnknownErrorCode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Call error codes defined by OCPP-J 1.6.
///
/// `FormationViolation` is the wire spelling used by the 1.6 specification
/// and its errata for syntactically broken payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl CallErrorCode {
    /// Wire string as defined in the OCPP-J specification.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse the wire string back into a code.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "NotImplemented" => Ok(CallErrorCode::NotImplemented),
            "NotSupported" => Ok(CallErrorCode::NotSupported),
            "InternalError" => Ok(CallErrorCode::InternalError),
            "ProtocolError" => Ok(CallErrorCode::ProtocolError),
            "SecurityError" => Ok(CallErrorCode::SecurityError),
            "FormationViolation" => Ok(CallErrorCode::FormationViolation),
            "PropertyConstraintViolation" => Ok(CallErrorCode::PropertyConstraintViolation),
            "OccurrenceConstraintViolation" => Ok(CallErrorCode::OccurrenceConstraintViolation),
            "TypeConstraintViolation" => Ok(CallErrorCode::TypeConstraintViolation),
            "GenericError" => Ok(CallErrorCode::GenericError),
            other => Err(ProtocolError::UnknownErrorCode(other.to_string())),
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        let codes = [
            CallErrorCode::NotImplemented,
            CallErrorCode::NotSupported,
            CallErrorCode::InternalError,
            CallErrorCode::ProtocolError,
            CallErrorCode::SecurityError,
            CallErrorCode::FormationViolation,
            CallErrorCode::PropertyConstraintViolation,
            CallErrorCode::OccurrenceConstraintViolation,
            CallErrorCode::TypeConstraintViolation,
            CallErrorCode::GenericError,
        ];
        for code in codes {
            assert_eq!(CallErrorCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_error_code() {
        let err = CallErrorCode::parse("NoSuchCode").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownErrorCode(_)));
    }

    #[test]
    fn test_error_code_serde_matches_wire_string() {
        let json = serde_json::to_string(&CallErrorCode::FormationViolation).unwrap();
        assert_eq!(json, "\"FormationViolation\"");
    }
}
