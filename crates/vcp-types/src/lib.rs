//! # VCP Types
//!
//! Foundational types for the virtual charge point simulator: the OCPP-J
//! wire envelope, call error codes, the OCPP 1.6 enums and compound types
//! shared by requests and responses, and the charger identity config.

pub mod charger;
pub mod error;
pub mod frame;
pub mod v16;

pub use charger::ChargerConfig;
pub use error::{CallErrorCode, ProtocolError, ProtocolResult};
pub use frame::{Call, CallError, CallResult, Frame};

use serde::{Deserialize, Serialize};

/// OCPP protocol version spoken on a session.
///
/// Selects the WebSocket subprotocol advertised during the handshake. Only
/// 1.6J carries a message surface here; 2.0.1 exists so the handshake can be
/// exercised against servers that negotiate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    #[serde(rename = "1.6")]
    V16,
    #[serde(rename = "2.0.1")]
    V201,
}

impl OcppVersion {
    /// The `Sec-WebSocket-Protocol` token for this version.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            OcppVersion::V16 => "ocpp1.6",
            OcppVersion::V201 => "ocpp2.0.1",
        }
    }
}

impl std::fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcppVersion::V16 => write!(f, "1.6"),
            OcppVersion::V201 => write!(f, "2.0.1"),
        }
    }
}

/// Transaction identifier assigned by the CSMS.
pub type TransactionId = i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_subprotocol() {
        assert_eq!(OcppVersion::V16.subprotocol(), "ocpp1.6");
        assert_eq!(OcppVersion::V201.subprotocol(), "ocpp2.0.1");
    }

    #[test]
    fn test_version_serialization() {
        assert_eq!(serde_json::to_string(&OcppVersion::V16).unwrap(), "\"1.6\"");
        assert_eq!(
            serde_json::to_string(&OcppVersion::V201).unwrap(),
            "\"2.0.1\""
        );
    }
}
