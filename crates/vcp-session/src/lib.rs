//! # VCP Session
//!
//! The transport layer of a virtual charge point: one persistent WebSocket
//! to the CSMS, OCPP-J call/response correlation with timeout eviction, and
//! schema-validated dispatch to per-action handlers.

pub mod dispatch;
pub mod error;
pub mod pending;
pub mod session;

pub use dispatch::{Dispatcher, DispatcherBuilder, RequestHandler, ResponseHandler};
pub use error::{SessionError, SessionResult};
pub use session::{
    SessionOptions, SessionState, VcpSession, DEFAULT_CALL_TIMEOUT,
};
