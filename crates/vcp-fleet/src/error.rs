//! Fleet-level errors, mapped to HTTP status classes at the boundary.

use thiserror::Error;
use vcp_cp::ChargePointError;
use vcp_session::SessionError;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("no charger with id {0}")]
    NotFound(String),

    #[error("charger {0} already exists")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("charger {0} is not connected")]
    NotConnected(String),

    #[error(transparent)]
    ChargePoint(#[from] ChargePointError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type FleetResult<T> = Result<T, FleetError>;
