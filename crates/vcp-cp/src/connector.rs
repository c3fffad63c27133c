//! Per-connector state.
//!
//! A connector tracks its OCPP status, the current it offers, the energy it
//! has metered, the active transaction binding, and (optionally) the car
//! simulator plugged into it. Status transitions are driven from outside
//! (admin commands, CSMS requests, car events); this module only keeps the
//! books straight.

use crate::car::CarSimulator;
use serde::Serialize;
use tracing::warn;
use vcp_types::v16::{ChargePointErrorCode, ChargePointStatus};

/// Lowest current a control pilot can signal (IEC 61851).
pub const MIN_OFFERED_CURRENT_A: f64 = 6.0;

#[derive(Debug)]
pub struct ConnectorState {
    pub id: u32,
    pub status: ChargePointStatus,
    pub error_code: ChargePointErrorCode,
    pub offered_current_a: f64,
    pub reported_power_w: f64,
    energy_imported_wh: f64,
    pub transaction_id: Option<i32>,
    pub car: Option<CarSimulator>,
}

impl ConnectorState {
    pub fn new(id: u32) -> Self {
        ConnectorState {
            id,
            status: ChargePointStatus::Available,
            error_code: ChargePointErrorCode::NoError,
            offered_current_a: 0.0,
            reported_power_w: 0.0,
            energy_imported_wh: 0.0,
            transaction_id: None,
            car: None,
        }
    }

    /// Commit a status change, returning the previous status. Transitions
    /// outside the OCPP 1.6 graph are allowed (the admin surface can force
    /// any status) but logged.
    ///
    /// A connector in `Charging` must offer current. Reaching this
    /// transition with a zero offer is a bug upstream: asserts in debug,
    /// logs and clamps the offer to the pilot minimum in release.
    pub fn set_status(&mut self, status: ChargePointStatus) -> ChargePointStatus {
        if status == ChargePointStatus::Charging && self.offered_current_a <= 0.0 {
            debug_assert!(
                false,
                "connector {} entering Charging with no offered current",
                self.id
            );
            warn!(
                connector = self.id,
                "entering Charging with no offered current, clamping offer to {} A",
                MIN_OFFERED_CURRENT_A
            );
            self.offered_current_a = MIN_OFFERED_CURRENT_A;
            if let Some(car) = self.car.as_mut() {
                car.set_offered_current(MIN_OFFERED_CURRENT_A);
            }
        }
        let previous = self.status;
        if previous != status && !valid_transition(previous, status) {
            warn!(
                connector = self.id,
                "unusual status transition {previous} -> {status}"
            );
        }
        self.status = status;
        previous
    }

    pub fn energy_imported_wh(&self) -> f64 {
        self.energy_imported_wh
    }

    /// Accumulate metered energy. Within a transaction the register only
    /// counts up; a negative increment is a simulation bug.
    pub fn add_energy(&mut self, increment_wh: f64) {
        debug_assert!(increment_wh >= 0.0, "negative energy increment");
        self.energy_imported_wh += increment_wh.max(0.0);
    }

    pub fn reset_energy(&mut self) {
        self.energy_imported_wh = 0.0;
    }

    pub fn is_charging(&self) -> bool {
        self.status == ChargePointStatus::Charging
    }

    pub fn snapshot(&self) -> ConnectorSnapshot {
        ConnectorSnapshot {
            connector_id: self.id,
            status: self.status,
            error_code: self.error_code,
            offered_current_a: self.offered_current_a,
            reported_power_w: self.reported_power_w,
            energy_imported_wh: self.energy_imported_wh,
            transaction_id: self.transaction_id,
            car: self.car.as_ref().map(CarStatus::of),
        }
    }
}

/// OCPP 1.6 figure 7 status graph, plus the admin-only Reserved and
/// Unavailable edges. Used only to flag odd transitions in the log.
fn valid_transition(from: ChargePointStatus, to: ChargePointStatus) -> bool {
    use ChargePointStatus::*;
    if from == to {
        return true;
    }
    // Faults can happen anywhere, and clearing one lands wherever the
    // physical state says.
    if to == Faulted || from == Faulted {
        return true;
    }
    // Admin-driven overrides.
    if matches!(to, Unavailable | Reserved | Available) {
        return true;
    }
    matches!(
        (from, to),
        (Available, Preparing)
            | (Reserved, Preparing)
            | (Preparing, SuspendedEV)
            | (Preparing, Charging)
            | (SuspendedEV, Charging)
            | (SuspendedEVSE, Charging)
            | (Charging, SuspendedEV)
            | (Charging, SuspendedEVSE)
            | (Charging, Finishing)
            | (SuspendedEV, Finishing)
            | (SuspendedEVSE, Finishing)
            | (Preparing, Finishing)
            | (Finishing, Preparing)
            | (Unavailable, Preparing)
    )
}

/// Read-only view of a connector for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorSnapshot {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    pub status: ChargePointStatus,
    #[serde(rename = "errorCode")]
    pub error_code: ChargePointErrorCode,
    #[serde(rename = "offeredCurrentA")]
    pub offered_current_a: f64,
    #[serde(rename = "reportedPowerW")]
    pub reported_power_w: f64,
    #[serde(rename = "energyImportedWh")]
    pub energy_imported_wh: f64,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car: Option<CarStatus>,
}

/// Read-only view of a plugged-in car.
#[derive(Debug, Clone, Serialize)]
pub struct CarStatus {
    #[serde(rename = "profileId")]
    pub profile_id: String,
    pub soc: f64,
    #[serde(rename = "actualCurrentA")]
    pub actual_current_a: f64,
    #[serde(rename = "energyDeliveredWh")]
    pub energy_delivered_wh: f64,
    #[serde(rename = "effectivePhases")]
    pub effective_phases: u8,
}

impl CarStatus {
    pub fn of(sim: &CarSimulator) -> Self {
        CarStatus {
            profile_id: sim.profile().id.clone(),
            soc: sim.soc(),
            actual_current_a: sim.actual_current_a(),
            energy_delivered_wh: sim.energy_delivered_wh(),
            effective_phases: sim.effective_phases(),
        }
    }
}
