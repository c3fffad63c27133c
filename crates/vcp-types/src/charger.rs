//! Charger identity and capabilities.

use serde::{Deserialize, Serialize};

/// Identity and electrical capabilities of one virtual charger.
///
/// This is the unit persisted in the fleet roster file; everything else
/// (connector state, sessions, car simulators) is runtime-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerConfig {
    /// Charge point identifier, appended to the CSMS endpoint path.
    #[serde(rename = "cpId")]
    pub cp_id: String,
    pub vendor: String,
    pub model: String,
    #[serde(rename = "serialNumber", skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(rename = "firmwareVersion", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(rename = "numConnectors")]
    pub num_connectors: u32,
    /// Grid phases wired to this charger, 1 or 3.
    pub phases: u8,
    #[serde(rename = "meterType", skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(rename = "meterSerialNumber", skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
}

impl ChargerConfig {
    /// A single-connector single-phase charger with the given id.
    pub fn new(cp_id: impl Into<String>) -> Self {
        ChargerConfig {
            cp_id: cp_id.into(),
            vendor: "PlugDev".to_string(),
            model: "VCP-1".to_string(),
            serial_number: None,
            firmware_version: Some("1.0.0".to_string()),
            num_connectors: 1,
            phases: 1,
            meter_type: None,
            meter_serial_number: None,
            iccid: None,
            imsi: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cp_id.is_empty() {
            return Err("cpId cannot be empty".to_string());
        }
        if !(1..=99).contains(&self.num_connectors) {
            return Err(format!(
                "numConnectors must be in 1..=99, got {}",
                self.num_connectors
            ));
        }
        if self.phases != 1 && self.phases != 3 {
            return Err(format!("phases must be 1 or 3, got {}", self.phases));
        }
        Ok(())
    }
}
