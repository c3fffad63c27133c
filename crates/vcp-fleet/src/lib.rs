//! # VCP Fleet
//!
//! Bulk orchestration of virtual charge points against a real CSMS: the
//! roster, per-charger sessions with their CSMS-initiated handlers, the
//! 15 s meter loop, and the admin command surface the external HTTP layer
//! consumes.

pub mod admin;
pub mod error;
pub mod fleet;
pub mod handlers;
pub mod ocpp_config;
pub mod roster;

pub use admin::{BulkOutcome, ChargerSummary};
pub use error::{FleetError, FleetResult};
pub use fleet::{ws_url_from_env, FleetManager, DEFAULT_WS_URL};
pub use ocpp_config::ConfigTable;
