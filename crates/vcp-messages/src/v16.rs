//! OCPP 1.6J message payloads.
//!
//! Charge-point-initiated actions first, then central-system-initiated ones,
//! then the smart-charging compound types both directions share.

use crate::validation::{max_len, max_len_opt, ValidationError};
use crate::{OcppPayload, OcppRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vcp_types::v16::{
    AvailabilityStatus, AvailabilityType, ChargePointErrorCode, ChargePointStatus, IdTagInfo,
    KeyValue, MeterValue, Reason,
};

// =============================================================================
// Charge point -> central system
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(rename = "idTag")]
    pub id_tag: String,
}

impl OcppPayload for AuthorizeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("idTag", &self.id_tag, 20)
    }
}

impl OcppRequest for AuthorizeRequest {
    const ACTION: &'static str = "Authorize";
    type Response = AuthorizeResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
}

impl OcppPayload for AuthorizeResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationRequest {
    #[serde(rename = "chargePointVendor")]
    pub charge_point_vendor: String,
    #[serde(rename = "chargePointModel")]
    pub charge_point_model: String,
    #[serde(
        rename = "chargePointSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_point_serial_number: Option<String>,
    #[serde(
        rename = "chargeBoxSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_box_serial_number: Option<String>,
    #[serde(rename = "firmwareVersion", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(rename = "meterType", skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(rename = "meterSerialNumber", skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl OcppPayload for BootNotificationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("chargePointVendor", &self.charge_point_vendor, 20)?;
        max_len("chargePointModel", &self.charge_point_model, 20)?;
        max_len_opt(
            "chargePointSerialNumber",
            &self.charge_point_serial_number,
            25,
        )?;
        max_len_opt("chargeBoxSerialNumber", &self.charge_box_serial_number, 25)?;
        max_len_opt("firmwareVersion", &self.firmware_version, 50)?;
        max_len_opt("iccid", &self.iccid, 20)?;
        max_len_opt("imsi", &self.imsi, 20)?;
        max_len_opt("meterType", &self.meter_type, 25)?;
        max_len_opt("meterSerialNumber", &self.meter_serial_number, 25)
    }
}

impl OcppRequest for BootNotificationRequest {
    const ACTION: &'static str = "BootNotification";
    type Response = BootNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds granted by the CSMS.
    pub interval: i32,
    pub status: RegistrationStatus,
}

impl OcppPayload for BootNotificationResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferRequest {
    #[serde(rename = "vendorId")]
    pub vendor_id: String,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl OcppPayload for DataTransferRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("vendorId", &self.vendor_id, 255)?;
        max_len_opt("messageId", &self.message_id, 50)
    }
}

impl OcppRequest for DataTransferRequest {
    const ACTION: &'static str = "DataTransfer";
    type Response = DataTransferResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl OcppPayload for DataTransferResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationRequest {
    pub status: DiagnosticsStatus,
}

impl OcppPayload for DiagnosticsStatusNotificationRequest {}

impl OcppRequest for DiagnosticsStatusNotificationRequest {
    const ACTION: &'static str = "DiagnosticsStatusNotification";
    type Response = DiagnosticsStatusNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationResponse {}

impl OcppPayload for DiagnosticsStatusNotificationResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DiagnosticsStatus {
    Idle,
    Uploaded,
    UploadFailed,
    Uploading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationRequest {
    pub status: FirmwareStatus,
}

impl OcppPayload for FirmwareStatusNotificationRequest {}

impl OcppRequest for FirmwareStatusNotificationRequest {
    const ACTION: &'static str = "FirmwareStatusNotification";
    type Response = FirmwareStatusNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationResponse {}

impl OcppPayload for FirmwareStatusNotificationResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

impl OcppPayload for HeartbeatRequest {}

impl OcppRequest for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    type Response = HeartbeatResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
}

impl OcppPayload for HeartbeatResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(rename = "meterValue")]
    pub meter_value: Vec<MeterValue>,
}

impl OcppPayload for MeterValuesRequest {}

impl OcppRequest for MeterValuesRequest {
    const ACTION: &'static str = "MeterValues";
    type Response = MeterValuesResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

impl OcppPayload for MeterValuesResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "idTag")]
    pub id_tag: String,
    /// Energy register at transaction start, in Wh.
    #[serde(rename = "meterStart")]
    pub meter_start: i32,
    #[serde(rename = "reservationId", skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl OcppPayload for StartTransactionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("idTag", &self.id_tag, 20)
    }
}

impl OcppRequest for StartTransactionRequest {
    const ACTION: &'static str = "StartTransaction";
    type Response = StartTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

impl OcppPayload for StartTransactionResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "errorCode")]
    pub error_code: ChargePointErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "vendorId", skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(rename = "vendorErrorCode", skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

impl OcppPayload for StatusNotificationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len_opt("info", &self.info, 50)?;
        max_len_opt("vendorId", &self.vendor_id, 255)?;
        max_len_opt("vendorErrorCode", &self.vendor_error_code, 50)
    }
}

impl OcppRequest for StatusNotificationRequest {
    const ACTION: &'static str = "StatusNotification";
    type Response = StatusNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

impl OcppPayload for StatusNotificationResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionRequest {
    #[serde(rename = "idTag", skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    /// Energy register at transaction stop, in Wh.
    #[serde(rename = "meterStop")]
    pub meter_stop: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(rename = "transactionData", skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<Vec<MeterValue>>,
}

impl OcppPayload for StopTransactionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len_opt("idTag", &self.id_tag, 20)
    }
}

impl OcppRequest for StopTransactionRequest {
    const ACTION: &'static str = "StopTransaction";
    type Response = StopTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionResponse {
    #[serde(rename = "idTagInfo", skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

impl OcppPayload for StopTransactionResponse {}

// =============================================================================
// Central system -> charge point
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservationRequest {
    #[serde(rename = "reservationId")]
    pub reservation_id: i32,
}

impl OcppPayload for CancelReservationRequest {}

impl OcppRequest for CancelReservationRequest {
    const ACTION: &'static str = "CancelReservation";
    type Response = CancelReservationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservationResponse {
    pub status: CancelReservationStatus,
}

impl OcppPayload for CancelReservationResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CancelReservationStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "type")]
    pub availability_type: AvailabilityType,
}

impl OcppPayload for ChangeAvailabilityRequest {}

impl OcppRequest for ChangeAvailabilityRequest {
    const ACTION: &'static str = "ChangeAvailability";
    type Response = ChangeAvailabilityResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityResponse {
    pub status: AvailabilityStatus,
}

impl OcppPayload for ChangeAvailabilityResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

impl OcppPayload for ChangeConfigurationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("key", &self.key, 50)?;
        max_len("value", &self.value, 500)
    }
}

impl OcppRequest for ChangeConfigurationRequest {
    const ACTION: &'static str = "ChangeConfiguration";
    type Response = ChangeConfigurationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationResponse {
    pub status: ConfigurationStatus,
}

impl OcppPayload for ChangeConfigurationResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConfigurationStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearCacheRequest {}

impl OcppPayload for ClearCacheRequest {}

impl OcppRequest for ClearCacheRequest {
    const ACTION: &'static str = "ClearCache";
    type Response = ClearCacheResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub status: ClearCacheStatus,
}

impl OcppPayload for ClearCacheResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClearCacheStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearChargingProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(
        rename = "chargingProfilePurpose",
        skip_serializing_if = "Option::is_none"
    )]
    pub charging_profile_purpose: Option<ChargingProfilePurposeType>,
    #[serde(rename = "stackLevel", skip_serializing_if = "Option::is_none")]
    pub stack_level: Option<i32>,
}

impl OcppPayload for ClearChargingProfileRequest {}

impl OcppRequest for ClearChargingProfileRequest {
    const ACTION: &'static str = "ClearChargingProfile";
    type Response = ClearChargingProfileResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearChargingProfileResponse {
    pub status: ClearChargingProfileStatus,
}

impl OcppPayload for ClearChargingProfileResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClearChargingProfileStatus {
    Accepted,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCompositeScheduleRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    /// Window length in seconds.
    pub duration: i32,
    #[serde(rename = "chargingRateUnit", skip_serializing_if = "Option::is_none")]
    pub charging_rate_unit: Option<ChargingRateUnitType>,
}

impl OcppPayload for GetCompositeScheduleRequest {}

impl OcppRequest for GetCompositeScheduleRequest {
    const ACTION: &'static str = "GetCompositeSchedule";
    type Response = GetCompositeScheduleResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCompositeScheduleResponse {
    pub status: GetCompositeScheduleStatus,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(rename = "scheduleStart", skip_serializing_if = "Option::is_none")]
    pub schedule_start: Option<DateTime<Utc>>,
    #[serde(rename = "chargingSchedule", skip_serializing_if = "Option::is_none")]
    pub charging_schedule: Option<ChargingSchedule>,
}

impl OcppPayload for GetCompositeScheduleResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GetCompositeScheduleStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
}

impl OcppPayload for GetConfigurationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        for k in self.key.iter().flatten() {
            max_len("key", k, 50)?;
        }
        Ok(())
    }
}

impl OcppRequest for GetConfigurationRequest {
    const ACTION: &'static str = "GetConfiguration";
    type Response = GetConfigurationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationResponse {
    #[serde(rename = "configurationKey", skip_serializing_if = "Option::is_none")]
    pub configuration_key: Option<Vec<KeyValue>>,
    #[serde(rename = "unknownKey", skip_serializing_if = "Option::is_none")]
    pub unknown_key: Option<Vec<String>>,
}

impl OcppPayload for GetConfigurationResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLocalListVersionRequest {}

impl OcppPayload for GetLocalListVersionRequest {}

impl OcppRequest for GetLocalListVersionRequest {
    const ACTION: &'static str = "GetLocalListVersion";
    type Response = GetLocalListVersionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLocalListVersionResponse {
    #[serde(rename = "listVersion")]
    pub list_version: i32,
}

impl OcppPayload for GetLocalListVersionResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionRequest {
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(rename = "idTag")]
    pub id_tag: String,
    #[serde(rename = "chargingProfile", skip_serializing_if = "Option::is_none")]
    pub charging_profile: Option<ChargingProfile>,
}

impl OcppPayload for RemoteStartTransactionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("idTag", &self.id_tag, 20)
    }
}

impl OcppRequest for RemoteStartTransactionRequest {
    const ACTION: &'static str = "RemoteStartTransaction";
    type Response = RemoteStartTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionResponse {
    pub status: RemoteStartStopStatus,
}

impl OcppPayload for RemoteStartTransactionResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RemoteStartStopStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

impl OcppPayload for RemoteStopTransactionRequest {}

impl OcppRequest for RemoteStopTransactionRequest {
    const ACTION: &'static str = "RemoteStopTransaction";
    type Response = RemoteStopTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionResponse {
    pub status: RemoteStartStopStatus,
}

impl OcppPayload for RemoteStopTransactionResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveNowRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "expiryDate")]
    pub expiry_date: DateTime<Utc>,
    #[serde(rename = "idTag")]
    pub id_tag: String,
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    #[serde(rename = "reservationId")]
    pub reservation_id: i32,
}

impl OcppPayload for ReserveNowRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        max_len("idTag", &self.id_tag, 20)?;
        max_len_opt("parentIdTag", &self.parent_id_tag, 20)
    }
}

impl OcppRequest for ReserveNowRequest {
    const ACTION: &'static str = "ReserveNow";
    type Response = ReserveNowResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveNowResponse {
    pub status: ReservationStatus,
}

impl OcppPayload for ReserveNowResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReservationStatus {
    Accepted,
    Faulted,
    Occupied,
    Rejected,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

impl OcppPayload for ResetRequest {}

impl OcppRequest for ResetRequest {
    const ACTION: &'static str = "Reset";
    type Response = ResetResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

impl OcppPayload for ResetResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetType {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendLocalListRequest {
    #[serde(rename = "listVersion")]
    pub list_version: i32,
    #[serde(
        rename = "localAuthorizationList",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_authorization_list: Option<Vec<AuthorizationData>>,
    #[serde(rename = "updateType")]
    pub update_type: UpdateType,
}

impl OcppPayload for SendLocalListRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        for entry in self.local_authorization_list.iter().flatten() {
            max_len("idTag", &entry.id_tag, 20)?;
        }
        Ok(())
    }
}

impl OcppRequest for SendLocalListRequest {
    const ACTION: &'static str = "SendLocalList";
    type Response = SendLocalListResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendLocalListResponse {
    pub status: UpdateStatus,
}

impl OcppPayload for SendLocalListResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationData {
    #[serde(rename = "idTag")]
    pub id_tag: String,
    #[serde(rename = "idTagInfo", skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UpdateType {
    Differential,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UpdateStatus {
    Accepted,
    Failed,
    NotSupported,
    VersionMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetChargingProfileRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "csChargingProfiles")]
    pub cs_charging_profiles: ChargingProfile,
}

impl OcppPayload for SetChargingProfileRequest {}

impl OcppRequest for SetChargingProfileRequest {
    const ACTION: &'static str = "SetChargingProfile";
    type Response = SetChargingProfileResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetChargingProfileResponse {
    pub status: ChargingProfileStatus,
}

impl OcppPayload for SetChargingProfileResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfileStatus {
    Accepted,
    Rejected,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageRequest {
    #[serde(rename = "requestedMessage")]
    pub requested_message: MessageTrigger,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

impl OcppPayload for TriggerMessageRequest {}

impl OcppRequest for TriggerMessageRequest {
    const ACTION: &'static str = "TriggerMessage";
    type Response = TriggerMessageResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
}

impl OcppPayload for TriggerMessageResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MessageTrigger {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TriggerMessageStatus {
    Accepted,
    Rejected,
    NotImplemented,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
}

impl OcppPayload for UnlockConnectorRequest {}

impl OcppRequest for UnlockConnectorRequest {
    const ACTION: &'static str = "UnlockConnector";
    type Response = UnlockConnectorResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorResponse {
    pub status: UnlockStatus,
}

impl OcppPayload for UnlockConnectorResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UnlockStatus {
    Unlocked,
    UnlockFailed,
    NotSupported,
}

// =============================================================================
// Smart charging compound types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingProfile {
    #[serde(rename = "chargingProfileId")]
    pub charging_profile_id: i32,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(rename = "stackLevel")]
    pub stack_level: i32,
    #[serde(rename = "chargingProfilePurpose")]
    pub charging_profile_purpose: ChargingProfilePurposeType,
    #[serde(rename = "chargingProfileKind")]
    pub charging_profile_kind: ChargingProfileKindType,
    #[serde(rename = "recurrencyKind", skip_serializing_if = "Option::is_none")]
    pub recurrency_kind: Option<RecurrencyKindType>,
    #[serde(rename = "validFrom", skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(rename = "validTo", skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(rename = "chargingSchedule")]
    pub charging_schedule: ChargingSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfilePurposeType {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfileKindType {
    Absolute,
    Recurring,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RecurrencyKindType {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(rename = "startSchedule", skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    #[serde(rename = "chargingRateUnit")]
    pub charging_rate_unit: ChargingRateUnitType,
    #[serde(rename = "chargingSchedulePeriod")]
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    #[serde(rename = "minChargingRate", skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSchedulePeriod {
    #[serde(rename = "startPeriod")]
    pub start_period: i32,
    pub limit: f64,
    #[serde(rename = "numberPhases", skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingRateUnitType {
    A,
    W,
}
