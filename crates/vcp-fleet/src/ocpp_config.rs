//! The OCPP configuration-key table served by GetConfiguration.
//!
//! All values are string-encoded on the wire. Read-write keys can be
//! updated by ChangeConfiguration; read-only keys reject the change; keys
//! outside the table are NotSupported.

use vcp_messages::v16::ConfigurationStatus;
use vcp_types::v16::KeyValue;
use vcp_types::ChargerConfig;

#[derive(Debug, Clone)]
struct ConfigEntry {
    key: String,
    value: String,
    readonly: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigTable {
    entries: Vec<ConfigEntry>,
}

impl ConfigTable {
    /// Build the table for one charger. Identity keys come from the charger
    /// config; protocol keys carry their defaults.
    pub fn for_charger(config: &ChargerConfig) -> Self {
        let n = config.num_connectors;
        let phase_rotation = (0..=n)
            .map(|i| format!("{i}.RST"))
            .collect::<Vec<_>>()
            .join(",");

        let mut entries = Vec::new();
        let mut ro = |key: &str, value: String| {
            entries.push(ConfigEntry {
                key: key.to_string(),
                value,
                readonly: true,
            })
        };

        ro(
            "SupportedFeatureProfiles",
            "Core,FirmwareManagement,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger"
                .to_string(),
        );
        ro("NumberOfConnectors", n.to_string());
        ro("GetConfigurationMaxKeys", "99".to_string());
        ro("ChargeProfileMaxStackLevel", "99".to_string());
        ro(
            "ChargingScheduleAllowedChargingRateUnit",
            "Current,Power".to_string(),
        );
        ro("ChargingScheduleMaxPeriods", "24".to_string());
        ro("MaxChargingProfilesInstalled", "10".to_string());
        ro("LocalAuthListMaxLength", "100".to_string());
        ro("SendLocalListMaxLength", "100".to_string());
        ro("ReserveConnectorZeroSupported", "true".to_string());
        ro("ConnectorPhaseRotationMaxLength", (n + 1).to_string());
        ro("ChargePointVendor", config.vendor.clone());
        ro("ChargePointModel", config.model.clone());
        if let Some(serial) = &config.serial_number {
            ro("ChargePointSerialNumber", serial.clone());
        }
        if let Some(firmware) = &config.firmware_version {
            ro("FirmwareVersion", firmware.clone());
        }
        if let Some(meter_type) = &config.meter_type {
            ro("MeterType", meter_type.clone());
        }
        if let Some(meter_serial) = &config.meter_serial_number {
            ro("MeterSerialNumber", meter_serial.clone());
        }

        let mut rw = |key: &str, value: &str| {
            entries.push(ConfigEntry {
                key: key.to_string(),
                value: value.to_string(),
                readonly: false,
            })
        };

        rw("HeartbeatInterval", "300");
        rw("ConnectionTimeOut", "60");
        rw("MeterValueSampleInterval", "15");
        rw(
            "MeterValuesSampledData",
            "Energy.Active.Import.Register,Power.Active.Import,Current.Import,Voltage",
        );
        rw("MeterValuesAlignedData", "Energy.Active.Import.Register");
        rw("ClockAlignedDataInterval", "0");
        rw("AuthorizeRemoteTxRequests", "false");
        rw("LocalAuthorizeOffline", "true");
        rw("LocalPreAuthorize", "false");
        rw("AuthorizationCacheEnabled", "true");
        rw("StopTransactionOnEVSideDisconnect", "true");
        rw("StopTransactionOnInvalidId", "true");
        rw("UnlockConnectorOnEVSideDisconnect", "true");
        rw("LocalAuthListEnabled", "true");
        rw("ConnectorPhaseRotation", &phase_rotation);

        ConfigTable { entries }
    }

    /// Resolve a GetConfiguration request: known keys in table order, with
    /// requested-but-unknown keys echoed separately. `None` returns the
    /// whole table.
    pub fn get(&self, keys: Option<&[String]>) -> (Vec<KeyValue>, Vec<String>) {
        match keys {
            None => (
                self.entries.iter().map(ConfigEntry::to_key_value).collect(),
                Vec::new(),
            ),
            Some(requested) => {
                let mut found = Vec::new();
                let mut unknown = Vec::new();
                for key in requested {
                    match self.entries.iter().find(|e| &e.key == key) {
                        Some(entry) => found.push(entry.to_key_value()),
                        None => unknown.push(key.clone()),
                    }
                }
                (found, unknown)
            }
        }
    }

    /// Apply a ChangeConfiguration request.
    pub fn change(&mut self, key: &str, value: &str) -> ConfigurationStatus {
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) if entry.readonly => ConfigurationStatus::Rejected,
            Some(entry) => {
                entry.value = value.to_string();
                ConfigurationStatus::Accepted
            }
            None => ConfigurationStatus::NotSupported,
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

impl ConfigEntry {
    fn to_key_value(&self) -> KeyValue {
        KeyValue {
            key: self.key.clone(),
            readonly: self.readonly,
            value: Some(self.value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ConfigTable {
        let mut config = ChargerConfig::new("CP-A");
        config.num_connectors = 2;
        config.serial_number = Some("SN-1".to_string());
        ConfigTable::for_charger(&config)
    }

    #[test]
    fn test_full_table_lookup() {
        let (keys, unknown) = table().get(None);
        assert!(unknown.is_empty());
        assert!(keys.iter().any(|k| k.key == "HeartbeatInterval"));
        assert!(keys.iter().any(|k| k.key == "NumberOfConnectors"));
        assert!(keys.iter().any(|k| k.key == "ChargePointSerialNumber"));
    }

    #[test]
    fn test_filtered_lookup_echoes_unknown_keys() {
        let (keys, unknown) = table().get(Some(&[
            "HeartbeatInterval".to_string(),
            "NoSuchKey".to_string(),
        ]));
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, "HeartbeatInterval");
        assert_eq!(keys[0].value.as_deref(), Some("300"));
        assert_eq!(keys[0].readonly, false);
        assert_eq!(unknown, vec!["NoSuchKey".to_string()]);
    }

    #[test]
    fn test_change_rw_key() {
        let mut t = table();
        assert_eq!(
            t.change("MeterValueSampleInterval", "30"),
            ConfigurationStatus::Accepted
        );
        assert_eq!(t.value("MeterValueSampleInterval"), Some("30"));
    }

    #[test]
    fn test_change_ro_key_rejected() {
        let mut t = table();
        assert_eq!(
            t.change("NumberOfConnectors", "4"),
            ConfigurationStatus::Rejected
        );
        assert_eq!(t.value("NumberOfConnectors"), Some("2"));
    }

    #[test]
    fn test_change_unknown_key_not_supported() {
        let mut t = table();
        assert_eq!(
            t.change("NoSuchKey", "1"),
            ConfigurationStatus::NotSupported
        );
    }

    #[test]
    fn test_phase_rotation_covers_connector_zero() {
        let t = table();
        assert_eq!(t.value("ConnectorPhaseRotation"), Some("0.RST,1.RST,2.RST"));
        assert_eq!(t.value("ConnectorPhaseRotationMaxLength"), Some("3"));
    }
}
