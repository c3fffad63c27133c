//! Payload validation: OCPP string caps and decode-error classification.
//!
//! OCPP 1.6 constrains most string fields to CiString20/25/50/255/500. The
//! caps are enforced on both encode and decode so a misbehaving CSMS (or a
//! bug on our side) surfaces as a proper CallError instead of silently
//! truncated data.

use thiserror::Error;
use vcp_types::CallErrorCode;

/// A payload that failed validation, carrying the OCPP error code the peer
/// should receive.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{detail}")]
pub struct ValidationError {
    pub code: CallErrorCode,
    pub detail: String,
}

impl ValidationError {
    pub fn new(code: CallErrorCode, detail: impl Into<String>) -> Self {
        ValidationError {
            code,
            detail: detail.into(),
        }
    }

    pub fn wrong_action(expected: &str, got: &str) -> Self {
        ValidationError::new(
            CallErrorCode::InternalError,
            format!("expected action {expected}, got {got}"),
        )
    }

    /// Classify a serde decode failure into the closest OCPP error code.
    /// Missing fields read as an incomplete payload (FormationViolation);
    /// wrong JSON types as TypeConstraintViolation.
    pub fn from_decode(err: serde_json::Error) -> Self {
        let detail = err.to_string();
        let code = if err.classify() == serde_json::error::Category::Data {
            if detail.starts_with("missing field") {
                CallErrorCode::FormationViolation
            } else {
                CallErrorCode::TypeConstraintViolation
            }
        } else {
            CallErrorCode::FormationViolation
        };
        ValidationError::new(code, detail)
    }
}

/// Check a required string field against its CiString cap.
pub fn max_len(field: &str, value: &str, cap: usize) -> Result<(), ValidationError> {
    if value.chars().count() > cap {
        return Err(ValidationError::new(
            CallErrorCode::PropertyConstraintViolation,
            format!("{field} exceeds {cap} characters"),
        ));
    }
    Ok(())
}

/// Check an optional string field against its CiString cap.
pub fn max_len_opt(
    field: &str,
    value: &Option<String>,
    cap: usize,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => max_len(field, v, cap),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_len() {
        assert!(max_len("idTag", "TAG1", 20).is_ok());
        assert!(max_len("idTag", &"x".repeat(20), 20).is_ok());

        let err = max_len("idTag", &"x".repeat(21), 20).unwrap_err();
        assert_eq!(err.code, CallErrorCode::PropertyConstraintViolation);
        assert!(err.detail.contains("idTag"));
    }

    #[test]
    fn test_max_len_opt() {
        assert!(max_len_opt("info", &None, 50).is_ok());
        assert!(max_len_opt("info", &Some("ok".to_string()), 50).is_ok());
        assert!(max_len_opt("info", &Some("y".repeat(51)), 50).is_err());
    }

    #[test]
    fn test_decode_classification_missing_field() {
        #[derive(serde::Deserialize, Debug)]
        struct Probe {
            #[allow(dead_code)]
            id_tag: String,
        }
        let err = serde_json::from_value::<Probe>(serde_json::json!({})).unwrap_err();
        let classified = ValidationError::from_decode(err);
        assert_eq!(classified.code, CallErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_classification_wrong_type() {
        #[derive(serde::Deserialize, Debug)]
        struct Probe {
            #[allow(dead_code)]
            id_tag: String,
        }
        let err =
            serde_json::from_value::<Probe>(serde_json::json!({"id_tag": 12})).unwrap_err();
        let classified = ValidationError::from_decode(err);
        assert_eq!(classified.code, CallErrorCode::TypeConstraintViolation);
    }
}
