//! CSMS-initiated message handlers and response hooks for one charger.
//!
//! Every connected charger gets its own dispatcher wired to the fleet
//! through its charge point id; handlers never hold references to the
//! charger itself, so a removed charger simply makes them no-ops.

use crate::fleet::{boot_request, notify_status, FleetManager};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use vcp_cp::{MeterSink, TransactionState};
use vcp_messages::v16::*;
use vcp_session::{Dispatcher, VcpSession};
use vcp_types::v16::{
    AvailabilityType, ChargePointStatus, Location, Measurand, MeterValue, SampledValue,
    UnitOfMeasure,
};

/// Delay between answering a request and emitting any message the request
/// asked for, so the CallResult is on the wire first.
const FOLLOW_UP_DELAY: Duration = Duration::from_millis(100);

fn spawn_after<F>(delay: Duration, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        sleep(delay).await;
        task.await;
    });
}

/// Build the dispatcher for one charger.
pub fn build_dispatcher(fleet: FleetManager, cp_id: String) -> Dispatcher {
    let mut builder = Dispatcher::builder();

    // Reset: acknowledge, then drop the session as if rebooting.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(move |_session: VcpSession, request: ResetRequest| {
            let fleet = fleet.clone();
            let cp_id = cp_id.clone();
            async move {
                info!(%cp_id, reset = ?request.reset_type, "reset requested");
                spawn_after(Duration::from_millis(500), async move {
                    if let Err(e) = fleet.disconnect(&cp_id).await {
                        warn!(%cp_id, "reset disconnect failed: {e}");
                    }
                });
                Ok(ResetResponse {
                    status: ResetStatus::Accepted,
                })
            }
        });
    }

    // TriggerMessage: accept the triggers we can honour and emit the
    // requested message right after the acknowledgement.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(move |session: VcpSession, request: TriggerMessageRequest| {
            let fleet = fleet.clone();
            let cp_id = cp_id.clone();
            async move {
                let status = match request.requested_message {
                    MessageTrigger::Heartbeat => {
                        spawn_after(FOLLOW_UP_DELAY, async move {
                            let _ = session.send(&HeartbeatRequest {}).await;
                        });
                        TriggerMessageStatus::Accepted
                    }
                    MessageTrigger::BootNotification => {
                        spawn_after(FOLLOW_UP_DELAY, async move {
                            let _ = session.send(&boot_request(session.config())).await;
                        });
                        TriggerMessageStatus::Accepted
                    }
                    MessageTrigger::StatusNotification => {
                        spawn_after(FOLLOW_UP_DELAY, async move {
                            send_status_notifications(&fleet, &cp_id, &session, request.connector_id)
                                .await;
                        });
                        TriggerMessageStatus::Accepted
                    }
                    MessageTrigger::MeterValues
                    | MessageTrigger::DiagnosticsStatusNotification
                    | MessageTrigger::FirmwareStatusNotification => {
                        TriggerMessageStatus::NotImplemented
                    }
                };
                Ok(TriggerMessageResponse { status })
            }
        });
    }

    // Configuration.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(
            move |_session: VcpSession, request: ChangeConfigurationRequest| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    let status = match fleet.charger(&cp_id).await {
                        Ok(charger) => charger
                            .ocpp_config
                            .lock()
                            .await
                            .change(&request.key, &request.value),
                        Err(_) => ConfigurationStatus::Rejected,
                    };
                    Ok(ChangeConfigurationResponse { status })
                }
            },
        );
    }
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(
            move |_session: VcpSession, request: GetConfigurationRequest| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    let (keys, unknown) = match fleet.charger(&cp_id).await {
                        Ok(charger) => charger
                            .ocpp_config
                            .lock()
                            .await
                            .get(request.key.as_deref()),
                        Err(_) => (Vec::new(), request.key.clone().unwrap_or_default()),
                    };
                    Ok(GetConfigurationResponse {
                        configuration_key: Some(keys),
                        unknown_key: if unknown.is_empty() {
                            None
                        } else {
                            Some(unknown)
                        },
                    })
                }
            },
        );
    }

    // Availability: connector 0 addresses every connector.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(
            move |_session: VcpSession, request: ChangeAvailabilityRequest| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    let status = match request.availability_type {
                        AvailabilityType::Operative => ChargePointStatus::Available,
                        AvailabilityType::Inoperative => ChargePointStatus::Unavailable,
                    };
                    let targets: Vec<u32> = if request.connector_id == 0 {
                        match fleet.get(&cp_id).await {
                            Ok(summary) => {
                                summary.connectors.iter().map(|c| c.connector_id).collect()
                            }
                            Err(_) => Vec::new(),
                        }
                    } else {
                        vec![request.connector_id]
                    };
                    for connector_id in targets {
                        if let Err(e) = fleet
                            .set_connector_status(&cp_id, connector_id, status, None)
                            .await
                        {
                            warn!(%cp_id, connector_id, "availability change failed: {e}");
                        }
                    }
                    Ok(ChangeAvailabilityResponse {
                        status: vcp_types::v16::AvailabilityStatus::Accepted,
                    })
                }
            },
        );
    }

    // Remote transaction control: acknowledge, then run the local flow.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(
            move |_session: VcpSession, request: RemoteStartTransactionRequest| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    let connector_id = request.connector_id.unwrap_or(1);
                    spawn_after(FOLLOW_UP_DELAY, async move {
                        if let Err(e) = fleet
                            .start_transaction(&cp_id, connector_id, Some(request.id_tag))
                            .await
                        {
                            warn!(%cp_id, connector_id, "remote start failed: {e}");
                        }
                    });
                    Ok(RemoteStartTransactionResponse {
                        status: RemoteStartStopStatus::Accepted,
                    })
                }
            },
        );
    }
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_request(
            move |_session: VcpSession, request: RemoteStopTransactionRequest| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    spawn_after(FOLLOW_UP_DELAY, async move {
                        let connector = match fleet.get(&cp_id).await {
                            Ok(summary) => summary
                                .connectors
                                .iter()
                                .find(|c| c.transaction_id == Some(request.transaction_id))
                                .map(|c| c.connector_id),
                            Err(_) => None,
                        };
                        match connector {
                            Some(connector_id) => {
                                if let Err(e) = fleet
                                    .stop_transaction(
                                        &cp_id,
                                        connector_id,
                                        Some(vcp_types::v16::Reason::Remote),
                                    )
                                    .await
                                {
                                    warn!(%cp_id, connector_id, "remote stop failed: {e}");
                                }
                            }
                            None => warn!(
                                %cp_id,
                                transaction_id = request.transaction_id,
                                "remote stop for unknown transaction"
                            ),
                        }
                    });
                    Ok(RemoteStopTransactionResponse {
                        status: RemoteStartStopStatus::Accepted,
                    })
                }
            },
        );
    }

    // The static acknowledgements.
    builder = builder
        .on_request(|_session: VcpSession, _request: UnlockConnectorRequest| async {
            Ok(UnlockConnectorResponse {
                status: UnlockStatus::Unlocked,
            })
        })
        .on_request(|_session: VcpSession, _request: DataTransferRequest| async {
            Ok(DataTransferResponse {
                status: DataTransferStatus::Accepted,
                data: None,
            })
        })
        .on_request(|_session: VcpSession, _request: ReserveNowRequest| async {
            Ok(ReserveNowResponse {
                status: ReservationStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: CancelReservationRequest| async {
            Ok(CancelReservationResponse {
                status: CancelReservationStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: ClearCacheRequest| async {
            Ok(ClearCacheResponse {
                status: ClearCacheStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: SetChargingProfileRequest| async {
            Ok(SetChargingProfileResponse {
                status: ChargingProfileStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: ClearChargingProfileRequest| async {
            Ok(ClearChargingProfileResponse {
                status: ClearChargingProfileStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: GetCompositeScheduleRequest| async {
            Ok(GetCompositeScheduleResponse {
                status: GetCompositeScheduleStatus::Accepted,
                connector_id: None,
                schedule_start: None,
                charging_schedule: None,
            })
        })
        .on_request(|_session: VcpSession, _request: SendLocalListRequest| async {
            Ok(SendLocalListResponse {
                status: UpdateStatus::Accepted,
            })
        })
        .on_request(|_session: VcpSession, _request: GetLocalListVersionRequest| async {
            Ok(GetLocalListVersionResponse { list_version: 0 })
        });

    // StartTransaction response: the CSMS assigned the transaction id; bind
    // it in the transaction manager with the session-owned sampling timer.
    {
        let fleet = fleet.clone();
        let cp_id = cp_id.clone();
        builder = builder.on_response(
            move |session: VcpSession,
                  request: StartTransactionRequest,
                  response: StartTransactionResponse| {
                let fleet = fleet.clone();
                let cp_id = cp_id.clone();
                async move {
                    use vcp_types::v16::AuthorizationStatus;
                    if response.id_tag_info.status != AuthorizationStatus::Accepted {
                        warn!(
                            %cp_id,
                            status = ?response.id_tag_info.status,
                            "start transaction authorized with non-accepted status"
                        );
                    }
                    let Ok(charger) = fleet.charger(&cp_id).await else {
                        return;
                    };
                    let state = TransactionState {
                        transaction_id: response.transaction_id,
                        id_tag: request.id_tag,
                        connector_id: request.connector_id,
                        started_at: Utc::now(),
                    };
                    let sink = Arc::new(SessionMeterSink {
                        fleet,
                        cp_id,
                        session,
                    });
                    charger.transactions.start_transaction(state, sink).await;
                }
            },
        );
    }

    // BootNotification response: nothing to act on beyond the log; the
    // heartbeat cadence is driven by the CSMS through TriggerMessage.
    builder = builder.on_response(
        |_session: VcpSession,
         _request: BootNotificationRequest,
         response: BootNotificationResponse| async move {
            info!(
                status = ?response.status,
                interval = response.interval,
                "boot acknowledged"
            );
        },
    );

    builder.build()
}

async fn send_status_notifications(
    fleet: &FleetManager,
    cp_id: &str,
    session: &VcpSession,
    connector_id: Option<u32>,
) {
    let Ok(summary) = fleet.get(cp_id).await else {
        return;
    };
    match connector_id {
        Some(0) | None => {
            notify_status(
                session,
                0,
                ChargePointStatus::Available,
                vcp_types::v16::ChargePointErrorCode::NoError,
            )
            .await;
            for connector in &summary.connectors {
                notify_status(
                    session,
                    connector.connector_id,
                    connector.status,
                    connector.error_code,
                )
                .await;
            }
        }
        Some(id) => {
            if let Some(connector) = summary.connectors.iter().find(|c| c.connector_id == id) {
                notify_status(session, id, connector.status, connector.error_code).await;
            }
        }
    }
}

/// Session-owned meter sampling, used between StartTransaction and the
/// moment the fleet loop takes over. A deliberately simple single-phase
/// model: nominal voltage, offered current, no sag.
struct SessionMeterSink {
    fleet: FleetManager,
    cp_id: String,
    session: VcpSession,
}

#[async_trait]
impl MeterSink for SessionMeterSink {
    async fn emit_meter_values(&self, transaction: &TransactionState) {
        let Ok(charger) = self.fleet.charger(&self.cp_id).await else {
            return;
        };
        let (energy_wh, offered, power_w) = {
            let mut state = charger.state.lock().await;
            let Ok(connector) = state.connector_mut(transaction.connector_id) else {
                return;
            };
            let power_w = 230.0 * connector.offered_current_a;
            connector.add_energy(power_w * 60.0 / 3600.0);
            connector.reported_power_w = power_w;
            (
                connector.energy_imported_wh(),
                connector.offered_current_a,
                power_w,
            )
        };

        let meter_value = MeterValue {
            timestamp: Utc::now(),
            sampled_value: vec![
                SampledValue::periodic(
                    format!("{:.3}", energy_wh / 1000.0),
                    Measurand::EnergyActiveImportRegister,
                    UnitOfMeasure::KWh,
                )
                .at(Location::Outlet),
                SampledValue::periodic(
                    format!("{offered:.1}"),
                    Measurand::CurrentImport,
                    UnitOfMeasure::A,
                )
                .at(Location::Outlet),
                SampledValue::periodic(
                    format!("{power_w:.1}"),
                    Measurand::PowerActiveImport,
                    UnitOfMeasure::W,
                )
                .at(Location::Outlet),
            ],
        };
        let request = MeterValuesRequest {
            connector_id: transaction.connector_id,
            transaction_id: Some(transaction.transaction_id),
            meter_value: vec![meter_value],
        };
        if let Err(e) = self.session.send(&request).await {
            warn!(cp_id = %self.cp_id, "transaction meter values not sent: {e}");
        }
    }
}
