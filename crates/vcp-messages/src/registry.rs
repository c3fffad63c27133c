//! Per-action message descriptors and the 1.6J registry.
//!
//! Each descriptor carries the action name, the direction the request flows
//! in, and schema checks for both the request and the response payload. The
//! checks decode into the typed payload and run its field constraints, so a
//! payload that passes here is guaranteed to deserialize in a handler.

use crate::validation::ValidationError;
use crate::{v16, OcppPayload, OcppRequest};
use serde_json::Value;
use std::collections::HashMap;
use vcp_types::CallErrorCode;

/// Who initiates the request for a given action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// CSMS -> charge point.
    Incoming,
    /// Charge point -> CSMS.
    Outgoing,
}

type PayloadCheck = fn(&Value) -> Result<(), ValidationError>;

#[derive(Debug)]
pub struct MessageDescriptor {
    pub action: &'static str,
    pub direction: MessageDirection,
    check_request: PayloadCheck,
    check_response: PayloadCheck,
}

impl MessageDescriptor {
    pub fn check_request(&self, payload: &Value) -> Result<(), ValidationError> {
        (self.check_request)(payload)
    }

    pub fn check_response(&self, payload: &Value) -> Result<(), ValidationError> {
        (self.check_response)(payload)
    }
}

fn check<T: OcppPayload>(payload: &Value) -> Result<(), ValidationError> {
    let decoded: T =
        serde_json::from_value(payload.clone()).map_err(ValidationError::from_decode)?;
    decoded.validate()
}

fn descriptor<T: OcppRequest>(direction: MessageDirection) -> MessageDescriptor {
    MessageDescriptor {
        action: T::ACTION,
        direction,
        check_request: check::<T>,
        check_response: check::<T::Response>,
    }
}

/// All actions the simulator speaks, keyed by action name.
pub struct MessageRegistry {
    by_action: HashMap<&'static str, MessageDescriptor>,
}

impl MessageRegistry {
    /// The OCPP 1.6J registry.
    pub fn v16() -> Self {
        use MessageDirection::{Incoming, Outgoing};

        let descriptors = vec![
            // Charge point initiated
            descriptor::<v16::AuthorizeRequest>(Outgoing),
            descriptor::<v16::BootNotificationRequest>(Outgoing),
            descriptor::<v16::DiagnosticsStatusNotificationRequest>(Outgoing),
            descriptor::<v16::FirmwareStatusNotificationRequest>(Outgoing),
            descriptor::<v16::HeartbeatRequest>(Outgoing),
            descriptor::<v16::MeterValuesRequest>(Outgoing),
            descriptor::<v16::StartTransactionRequest>(Outgoing),
            descriptor::<v16::StatusNotificationRequest>(Outgoing),
            descriptor::<v16::StopTransactionRequest>(Outgoing),
            // CSMS initiated
            descriptor::<v16::CancelReservationRequest>(Incoming),
            descriptor::<v16::ChangeAvailabilityRequest>(Incoming),
            descriptor::<v16::ChangeConfigurationRequest>(Incoming),
            descriptor::<v16::ClearCacheRequest>(Incoming),
            descriptor::<v16::ClearChargingProfileRequest>(Incoming),
            descriptor::<v16::GetCompositeScheduleRequest>(Incoming),
            descriptor::<v16::GetConfigurationRequest>(Incoming),
            descriptor::<v16::GetLocalListVersionRequest>(Incoming),
            descriptor::<v16::RemoteStartTransactionRequest>(Incoming),
            descriptor::<v16::RemoteStopTransactionRequest>(Incoming),
            descriptor::<v16::ReserveNowRequest>(Incoming),
            descriptor::<v16::ResetRequest>(Incoming),
            descriptor::<v16::SendLocalListRequest>(Incoming),
            descriptor::<v16::SetChargingProfileRequest>(Incoming),
            descriptor::<v16::TriggerMessageRequest>(Incoming),
            descriptor::<v16::UnlockConnectorRequest>(Incoming),
            // Both directions in 1.6; registered under the charge point's
            // outgoing slot, and dispatched incoming by its own handler.
            descriptor::<v16::DataTransferRequest>(Outgoing),
        ];

        let mut by_action = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            by_action.insert(d.action, d);
        }
        MessageRegistry { by_action }
    }

    pub fn lookup(&self, action: &str) -> Option<&MessageDescriptor> {
        self.by_action.get(action)
    }

    /// Look up an action, mapping unknown actions to the OCPP error the
    /// peer should receive.
    pub fn require(&self, action: &str) -> Result<&MessageDescriptor, ValidationError> {
        self.lookup(action).ok_or_else(|| {
            ValidationError::new(
                CallErrorCode::NotImplemented,
                format!("action {action} is not implemented"),
            )
        })
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_action.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_covers_core_actions() {
        let registry = MessageRegistry::v16();
        for action in [
            "Authorize",
            "BootNotification",
            "Heartbeat",
            "MeterValues",
            "StartTransaction",
            "StatusNotification",
            "StopTransaction",
            "Reset",
            "TriggerMessage",
            "GetConfiguration",
            "ChangeConfiguration",
            "RemoteStartTransaction",
            "RemoteStopTransaction",
            "UnlockConnector",
            "ReserveNow",
            "CancelReservation",
            "SetChargingProfile",
            "ClearChargingProfile",
            "GetCompositeSchedule",
            "SendLocalList",
            "GetLocalListVersion",
            "DataTransfer",
        ] {
            assert!(registry.lookup(action).is_some(), "missing {action}");
        }
    }

    #[test]
    fn test_unknown_action_maps_to_not_implemented() {
        let registry = MessageRegistry::v16();
        let err = registry.require("NoSuchAction").unwrap_err();
        assert_eq!(err.code, CallErrorCode::NotImplemented);
    }

    #[test]
    fn test_request_check_accepts_valid_payload() {
        let registry = MessageRegistry::v16();
        let d = registry.lookup("Authorize").unwrap();
        assert!(d.check_request(&json!({"idTag": "TAG1"})).is_ok());
    }

    #[test]
    fn test_request_check_flags_missing_field() {
        let registry = MessageRegistry::v16();
        let d = registry.lookup("Authorize").unwrap();
        let err = d.check_request(&json!({})).unwrap_err();
        assert_eq!(err.code, CallErrorCode::FormationViolation);
    }

    #[test]
    fn test_request_check_flags_wrong_type() {
        let registry = MessageRegistry::v16();
        let d = registry.lookup("Authorize").unwrap();
        let err = d.check_request(&json!({"idTag": 99})).unwrap_err();
        assert_eq!(err.code, CallErrorCode::TypeConstraintViolation);
    }

    #[test]
    fn test_request_check_flags_over_cap_string() {
        let registry = MessageRegistry::v16();
        let d = registry.lookup("Authorize").unwrap();
        let err = d
            .check_request(&json!({"idTag": "x".repeat(21)}))
            .unwrap_err();
        assert_eq!(err.code, CallErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_response_check() {
        let registry = MessageRegistry::v16();
        let d = registry.lookup("BootNotification").unwrap();
        assert!(d
            .check_response(&json!({
                "currentTime": "2024-05-01T12:00:00.000Z",
                "interval": 300,
                "status": "Accepted"
            }))
            .is_ok());
        assert!(d.check_response(&json!({"interval": 300})).is_err());
    }

    #[test]
    fn test_directions() {
        let registry = MessageRegistry::v16();
        assert_eq!(
            registry.lookup("BootNotification").unwrap().direction,
            MessageDirection::Outgoing
        );
        assert_eq!(
            registry.lookup("Reset").unwrap().direction,
            MessageDirection::Incoming
        );
    }
}
