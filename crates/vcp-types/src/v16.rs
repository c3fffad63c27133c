//! OCPP 1.6 enums and compound types shared across message payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connector (or charge point) status as reported via StatusNotification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChargePointStatus::Available => "Available",
            ChargePointStatus::Preparing => "Preparing",
            ChargePointStatus::Charging => "Charging",
            ChargePointStatus::SuspendedEV => "SuspendedEV",
            ChargePointStatus::SuspendedEVSE => "SuspendedEVSE",
            ChargePointStatus::Finishing => "Finishing",
            ChargePointStatus::Reserved => "Reserved",
            ChargePointStatus::Unavailable => "Unavailable",
            ChargePointStatus::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// Error code carried in StatusNotification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

/// One meter sample batch: a timestamp plus the values read at that instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sampledValue")]
    pub sampled_value: Vec<SampledValue>,
}

/// A single measured quantity inside a [`MeterValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

impl SampledValue {
    /// A periodic sample with the measurand/unit pair filled in; everything
    /// else defaults to absent.
    pub fn periodic(value: String, measurand: Measurand, unit: UnitOfMeasure) -> Self {
        SampledValue {
            value,
            context: Some(ReadingContext::SamplePeriodic),
            format: None,
            measurand: Some(measurand),
            phase: None,
            location: None,
            unit: Some(unit),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn on_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingContext {
    #[serde(rename = "Interruption.Begin")]
    InterruptionBegin,
    #[serde(rename = "Interruption.End")]
    InterruptionEnd,
    #[serde(rename = "Sample.Clock")]
    SampleClock,
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
    Trigger,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ValueFormat {
    Raw,
    SignedData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Energy.Active.Export.Register")]
    EnergyActiveExportRegister,
    #[serde(rename = "Energy.Reactive.Import.Register")]
    EnergyReactiveImportRegister,
    #[serde(rename = "Energy.Reactive.Export.Register")]
    EnergyReactiveExportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Power.Active.Export")]
    PowerActiveExport,
    #[serde(rename = "Power.Offered")]
    PowerOffered,
    #[serde(rename = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Current.Export")]
    CurrentExport,
    #[serde(rename = "Current.Offered")]
    CurrentOffered,
    Voltage,
    Frequency,
    Temperature,
    SoC,
}

/// Electrical phase a sampled value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    L1,
    L2,
    L3,
    N,
    #[serde(rename = "L1-N")]
    L1N,
    #[serde(rename = "L2-N")]
    L2N,
    #[serde(rename = "L3-N")]
    L3N,
    #[serde(rename = "L1-L2")]
    L1L2,
    #[serde(rename = "L2-L3")]
    L2L3,
    #[serde(rename = "L3-L1")]
    L3L1,
}

impl Phase {
    /// Phase `k` (1-based) of a polyphase measurement.
    pub fn line(k: u8) -> Option<Phase> {
        match k {
            1 => Some(Phase::L1),
            2 => Some(Phase::L2),
            3 => Some(Phase::L3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Location {
    Body,
    Cable,
    EV,
    Inlet,
    Outlet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    KWh,
    #[serde(rename = "varh")]
    Varh,
    #[serde(rename = "kvarh")]
    Kvarh,
    W,
    #[serde(rename = "kW")]
    KW,
    VA,
    #[serde(rename = "kVA")]
    KVA,
    #[serde(rename = "var")]
    Var,
    #[serde(rename = "kvar")]
    Kvar,
    A,
    V,
    Celsius,
    Fahrenheit,
    K,
    Percent,
}

/// Configuration key entry returned by GetConfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Authorization outcome attached to Authorize / StartTransaction /
/// StopTransaction responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    #[serde(rename = "expiryDate", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Reason a transaction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Reason {
    DeAuthorized,
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityType {
    Inoperative,
    Operative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityStatus {
    Accepted,
    Rejected,
    Scheduled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(
            serde_json::to_string(&ChargePointStatus::SuspendedEV).unwrap(),
            "\"SuspendedEV\""
        );
        assert_eq!(
            serde_json::to_string(&ChargePointStatus::SuspendedEVSE).unwrap(),
            "\"SuspendedEVSE\""
        );
    }

    #[test]
    fn test_measurand_dotted_names() {
        assert_eq!(
            serde_json::to_string(&Measurand::EnergyActiveImportRegister).unwrap(),
            "\"Energy.Active.Import.Register\""
        );
        assert_eq!(
            serde_json::to_string(&Measurand::CurrentOffered).unwrap(),
            "\"Current.Offered\""
        );
    }

    #[test]
    fn test_reading_context_wire_strings() {
        assert_eq!(
            serde_json::to_string(&ReadingContext::SamplePeriodic).unwrap(),
            "\"Sample.Periodic\""
        );
    }

    #[test]
    fn test_phase_line() {
        assert_eq!(Phase::line(1), Some(Phase::L1));
        assert_eq!(Phase::line(3), Some(Phase::L3));
        assert_eq!(Phase::line(4), None);
    }

    #[test]
    fn test_sampled_value_omits_absent_fields() {
        let sample = SampledValue::periodic(
            "16.0".to_string(),
            Measurand::CurrentImport,
            UnitOfMeasure::A,
        )
        .at(Location::Outlet)
        .on_phase(Phase::L1);

        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"phase\":\"L1\""));
        assert!(!json.contains("format"));
    }

    #[test]
    fn test_meter_value_round_trip() {
        let mv = MeterValue {
            timestamp: DateTime::from_timestamp(1700000000, 0).unwrap(),
            sampled_value: vec![SampledValue::periodic(
                "1.234".to_string(),
                Measurand::EnergyActiveImportRegister,
                UnitOfMeasure::KWh,
            )],
        };
        let json = serde_json::to_string(&mv).unwrap();
        assert!(json.contains("sampledValue"));
        let back: MeterValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mv);
    }
}
