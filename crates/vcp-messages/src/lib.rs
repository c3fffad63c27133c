//! # VCP Messages
//!
//! Typed request/response payloads for every OCPP 1.6J action the simulator
//! speaks, plus the schema registry that validates payloads in both
//! directions before they reach a handler or the wire.

pub mod registry;
pub mod v16;
pub mod validation;

pub use registry::{MessageDescriptor, MessageDirection, MessageRegistry};
pub use validation::ValidationError;

use serde::{de::DeserializeOwned, Serialize};
use vcp_types::{Call, CallResult, ProtocolResult};

/// A payload that can cross the wire in either direction.
pub trait OcppPayload: Serialize + DeserializeOwned + Send + Sync {
    /// Field-level constraints beyond what the type system expresses
    /// (string caps, value ranges). The default payload is unconstrained.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A request payload, tied to its action name and response type.
pub trait OcppRequest: OcppPayload {
    const ACTION: &'static str;
    type Response: OcppPayload;
}

/// Build a [`Call`] frame from a typed request.
pub fn to_call<T: OcppRequest>(request: &T) -> ProtocolResult<Call> {
    Call::new(T::ACTION, request)
}

/// Decode a typed request out of a [`Call`], checking the action name.
pub fn from_call<T: OcppRequest>(call: &Call) -> Result<T, ValidationError> {
    if call.action != T::ACTION {
        return Err(ValidationError::wrong_action(T::ACTION, &call.action));
    }
    let payload: T = serde_json::from_value(call.payload.clone())
        .map_err(ValidationError::from_decode)?;
    payload.validate()?;
    Ok(payload)
}

/// Decode a typed response out of a [`CallResult`].
pub fn from_result<T: OcppPayload>(result: &CallResult) -> Result<T, ValidationError> {
    let payload: T =
        serde_json::from_value(result.payload.clone()).map_err(ValidationError::from_decode)?;
    payload.validate()?;
    Ok(payload)
}
