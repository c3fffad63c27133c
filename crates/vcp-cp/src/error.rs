//! Charge point state errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChargePointError {
    #[error("connector {0} does not exist")]
    NoSuchConnector(u32),

    #[error("connector {0} already has an active transaction")]
    TransactionActive(u32),

    #[error("connector {0} has no active transaction")]
    NoTransaction(u32),

    #[error("no car profile with id {0}")]
    NoSuchProfile(String),

    #[error("no car plugged into connector {0}")]
    NoCar(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
