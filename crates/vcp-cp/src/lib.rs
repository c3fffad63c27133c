//! # VCP Charge Point
//!
//! The stateful heart of one virtual charge point: per-connector status and
//! energy accounting, the car battery simulator that turns offered current
//! into physically plausible draw, the per-tick meter-value builder, and
//! the transaction manager with its built-in sampling timer.

pub mod car;
pub mod connector;
pub mod error;
pub mod meter;
pub mod transaction;

pub use car::{CarProfile, CarSimulator, CarTick, TaperCurve};
pub use connector::{CarStatus, ConnectorSnapshot, ConnectorState, MIN_OFFERED_CURRENT_A};
pub use error::ChargePointError;
pub use meter::{build_meter_value, electrical_tick, MeterTick, METER_INTERVAL_SECS};
pub use transaction::{MeterSink, TransactionManager, TransactionState};
