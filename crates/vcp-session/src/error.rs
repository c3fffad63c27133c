//! Session error surface.

use thiserror::Error;
use vcp_messages::ValidationError;
use vcp_types::{CallError, ProtocolError};

#[derive(Error, Debug)]
pub enum SessionError {
    /// The endpoint URL is not a ws:// or wss:// URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The WebSocket handshake did not complete.
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// No correlated response arrived within the call timeout.
    #[error("call timed out: {action}")]
    CallTimeout { action: String },

    /// The peer answered with an OCPP CallError.
    #[error("call error: {0}")]
    CallError(CallError),

    /// The socket closed while calls were outstanding, or an operation was
    /// attempted on a closed session.
    #[error("transport closed")]
    TransportClosed,

    #[error("payload validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("send failed: {0}")]
    Send(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
