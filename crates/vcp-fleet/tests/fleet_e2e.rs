//! End-to-end fleet scenarios against a scripted CSMS.
//!
//! The mock CSMS accepts any number of charge point connections, records
//! every inbound frame per charge point, auto-answers the charge-point
//! initiated actions, and lets a test inject CSMS-initiated calls.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use vcp_fleet::FleetManager;
use vcp_types::v16::ChargePointStatus;
use vcp_types::ChargerConfig;

#[derive(Clone)]
struct MockCsms {
    url: String,
    received: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    injectors: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl MockCsms {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let csms = MockCsms {
            url: format!("ws://{addr}/ocpp"),
            received: Arc::new(Mutex::new(HashMap::new())),
            injectors: Arc::new(Mutex::new(HashMap::new())),
        };

        let server = csms.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let per_conn = server.clone();
                tokio::spawn(async move {
                    per_conn.serve_connection(stream).await;
                });
            }
        });
        csms
    }

    async fn serve_connection(self, stream: tokio::net::TcpStream) {
        let cp_id = Arc::new(std::sync::Mutex::new(String::new()));
        let cp_id_cb = Arc::clone(&cp_id);
        let callback = move |req: &Request, mut res: Response| {
            let path = req.uri().path().to_string();
            *cp_id_cb.lock().unwrap() = path.rsplit('/').next().unwrap_or("").to_string();
            if let Some(proto) = req.headers().get("Sec-WebSocket-Protocol") {
                res.headers_mut()
                    .insert("Sec-WebSocket-Protocol", proto.clone());
            }
            Ok(res)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let cp_id = cp_id.lock().unwrap().clone();

        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();
        self.injectors.lock().await.insert(cp_id.clone(), inject_tx);

        loop {
            tokio::select! {
                inbound = ws.next() => {
                    let Some(Ok(message)) = inbound else { break };
                    let Message::Text(text) = message else { continue };
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    self.received
                        .lock()
                        .await
                        .entry(cp_id.clone())
                        .or_default()
                        .push(frame.clone());

                    if frame[0] == 2 {
                        let reply = auto_reply(&frame);
                        ws.send(Message::Text(reply.to_string())).await.ok();
                    }
                }
                outbound = inject_rx.recv() => {
                    let Some(text) = outbound else { break };
                    ws.send(Message::Text(text)).await.ok();
                }
            }
        }
    }

    async fn frames(&self, cp_id: &str) -> Vec<Value> {
        self.received
            .lock()
            .await
            .get(cp_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Frames of a given OCPP action, in arrival order.
    async fn calls(&self, cp_id: &str, action: &str) -> Vec<Value> {
        self.frames(cp_id)
            .await
            .into_iter()
            .filter(|f| f[0] == 2 && f[2] == action)
            .collect()
    }

    async fn inject(&self, cp_id: &str, frame: Value) {
        self.injectors
            .lock()
            .await
            .get(cp_id)
            .expect("charge point not connected")
            .send(frame.to_string())
            .unwrap();
    }

    /// Wait until `predicate` holds over the recorded frames.
    async fn wait_until<F>(&self, cp_id: &str, timeout: Duration, predicate: F)
    where
        F: Fn(&[Value]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.frames(cp_id).await) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "condition not met within {timeout:?}; frames: {:#?}",
                    self.frames(cp_id).await
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn auto_reply(frame: &Value) -> Value {
    let id = frame[1].clone();
    match frame[2].as_str().unwrap() {
        "BootNotification" => json!([3, id, {
            "currentTime": "2024-05-01T12:00:00.000Z",
            "interval": 300,
            "status": "Accepted"
        }]),
        "Authorize" => json!([3, id, {"idTagInfo": {"status": "Accepted"}}]),
        "StartTransaction" => json!([3, id, {
            "idTagInfo": {"status": "Accepted"},
            "transactionId": 42
        }]),
        "StopTransaction" => json!([3, id, {"idTagInfo": {"status": "Accepted"}}]),
        "Heartbeat" => json!([3, id, {"currentTime": "2024-05-01T12:00:00.000Z"}]),
        _ => json!([3, id, {}]),
    }
}

fn one_phase_charger(cp_id: &str) -> ChargerConfig {
    ChargerConfig::new(cp_id)
}

#[tokio::test]
async fn test_boot_sequence_frame_order() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();

    fleet.connect("CP-A").await.unwrap();

    csms.wait_until("CP-A", Duration::from_secs(2), |frames| frames.len() >= 3)
        .await;
    let frames = csms.frames("CP-A").await;

    assert_eq!(frames[0][2], "BootNotification");
    assert_eq!(frames[0][3]["chargePointVendor"], "PlugDev");

    assert_eq!(frames[1][2], "StatusNotification");
    assert_eq!(frames[1][3]["connectorId"], 0);
    assert_eq!(frames[1][3]["status"], "Available");

    assert_eq!(frames[2][2], "StatusNotification");
    assert_eq!(frames[2][3]["connectorId"], 1);
    assert_eq!(frames[2][3]["status"], "Available");

    let summary = fleet.get("CP-A").await.unwrap();
    assert!(summary.connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_transaction_flow() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();
    fleet.connect("CP-A").await.unwrap();

    fleet
        .plug_in_car("CP-A", 1, "generic-medium", 0.5)
        .await
        .unwrap();
    let summary = fleet.get("CP-A").await.unwrap();
    assert_eq!(summary.connectors[0].status, ChargePointStatus::Preparing);

    // Authorize, then StartTransaction, then the SuspendedEV -> Charging
    // ramp; returns once the CSMS-assigned id is bound.
    let assigned = fleet
        .start_transaction("CP-A", 1, Some("TAG1".to_string()))
        .await
        .unwrap();
    assert_eq!(assigned, Some(42));

    let authorizes = csms.calls("CP-A", "Authorize").await;
    assert_eq!(authorizes.len(), 1);
    assert_eq!(authorizes[0][3]["idTag"], "TAG1");

    let starts = csms.calls("CP-A", "StartTransaction").await;
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0][3]["connectorId"], 1);
    assert_eq!(starts[0][3]["idTag"], "TAG1");
    assert_eq!(starts[0][3]["meterStart"], 0);

    // Authorize hit the wire before StartTransaction.
    let frames = csms.frames("CP-A").await;
    let auth_pos = frames.iter().position(|f| f[2] == "Authorize").unwrap();
    let start_pos = frames
        .iter()
        .position(|f| f[2] == "StartTransaction")
        .unwrap();
    assert!(auth_pos < start_pos);

    let summary = fleet.get("CP-A").await.unwrap();
    assert_eq!(summary.connectors[0].status, ChargePointStatus::Charging);
    assert_eq!(summary.connectors[0].transaction_id, Some(42));
    // Entering Charging with nothing offered falls back to the pilot
    // minimum, so the connector never charges at 0 A.
    assert!(summary.connectors[0].offered_current_a > 0.0);

    // With current offered, the 15 s loop emits MeterValues bound to the
    // transaction, single phase.
    fleet.set_charging_current("CP-A", 1, 16.0).await.unwrap();
    csms.wait_until("CP-A", Duration::from_secs(20), |frames| {
        frames.iter().any(|f| f[2] == "MeterValues")
    })
    .await;

    let meter_values = csms.calls("CP-A", "MeterValues").await;
    let mv = &meter_values[0][3];
    assert_eq!(mv["connectorId"], 1);
    assert_eq!(mv["transactionId"], 42);
    let samples = mv["meterValue"][0]["sampledValue"].as_array().unwrap();
    let voltages: Vec<&Value> = samples
        .iter()
        .filter(|s| s["measurand"] == "Voltage")
        .collect();
    assert_eq!(voltages.len(), 1, "one phase of voltage expected");
    assert_eq!(voltages[0]["phase"], "L1");

    let power: f64 = samples
        .iter()
        .find(|s| s["measurand"] == "Power.Active.Import")
        .and_then(|s| s["value"].as_str())
        .unwrap()
        .parse()
        .unwrap();
    // 230 V x (16 A minus margin and jitter), single phase.
    assert!(power > 2800.0 && power < 3700.0, "power was {power}");

    fleet.stop_transaction("CP-A", 1, None).await.unwrap();
    let stops = csms.calls("CP-A", "StopTransaction").await;
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0][3]["transactionId"], 42);
    let summary = fleet.get("CP-A").await.unwrap();
    assert_eq!(summary.connectors[0].transaction_id, None);
    // Car still plugged, so the connector returns to Preparing.
    assert_eq!(summary.connectors[0].status, ChargePointStatus::Preparing);
}

#[tokio::test]
async fn test_trigger_message_heartbeat_ordering() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();
    fleet.connect("CP-A").await.unwrap();

    csms.inject(
        "CP-A",
        json!([2, "trig-1", "TriggerMessage", {"requestedMessage": "Heartbeat"}]),
    )
    .await;

    csms.wait_until("CP-A", Duration::from_secs(2), |frames| {
        frames.iter().any(|f| f[0] == 2 && f[2] == "Heartbeat")
    })
    .await;

    let frames = csms.frames("CP-A").await;
    let accept_pos = frames
        .iter()
        .position(|f| f[0] == 3 && f[1] == "trig-1")
        .expect("CallResult for TriggerMessage missing");
    assert_eq!(frames[accept_pos][2]["status"], "Accepted");

    let heartbeat_pos = frames
        .iter()
        .position(|f| f[0] == 2 && f[2] == "Heartbeat")
        .unwrap();
    assert!(
        accept_pos < heartbeat_pos,
        "Accepted must precede the triggered Heartbeat"
    );
}

#[tokio::test]
async fn test_get_configuration_filter() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();
    fleet.connect("CP-A").await.unwrap();

    csms.inject(
        "CP-A",
        json!([2, "cfg-1", "GetConfiguration", {"key": ["HeartbeatInterval", "NoSuchKey"]}]),
    )
    .await;

    csms.wait_until("CP-A", Duration::from_secs(2), |frames| {
        frames.iter().any(|f| f[0] == 3 && f[1] == "cfg-1")
    })
    .await;

    let frames = csms.frames("CP-A").await;
    let reply = frames
        .iter()
        .find(|f| f[0] == 3 && f[1] == "cfg-1")
        .unwrap();
    let keys = reply[2]["configurationKey"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["key"], "HeartbeatInterval");
    assert_eq!(keys[0]["value"], "300");
    assert_eq!(keys[0]["readonly"], false);
    assert_eq!(reply[2]["unknownKey"], json!(["NoSuchKey"]));
}

#[tokio::test]
async fn test_change_configuration_unknown_key_not_supported() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();
    fleet.connect("CP-A").await.unwrap();

    csms.inject(
        "CP-A",
        json!([2, "chg-1", "ChangeConfiguration", {"key": "Bogus", "value": "1"}]),
    )
    .await;
    csms.wait_until("CP-A", Duration::from_secs(2), |frames| {
        frames.iter().any(|f| f[0] == 3 && f[1] == "chg-1")
    })
    .await;

    let frames = csms.frames("CP-A").await;
    let reply = frames
        .iter()
        .find(|f| f[0] == 3 && f[1] == "chg-1")
        .unwrap();
    assert_eq!(reply[2]["status"], "NotSupported");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_rollout() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());

    let mut base = ChargerConfig::new("unused");
    base.phases = 3;
    base.num_connectors = 1;
    fleet.generate_chargers("LOAD", 3, &base).await.unwrap();

    let outcome = fleet.connect_all().await;
    assert_eq!(outcome.success, 3);
    assert_eq!(outcome.failed, 0);

    for cp_id in ["LOAD-001", "LOAD-002", "LOAD-003"] {
        csms.wait_until(cp_id, Duration::from_secs(2), |frames| frames.len() >= 3)
            .await;
        let frames = csms.frames(cp_id).await;
        assert_eq!(frames[0][2], "BootNotification");
        assert_eq!(frames[1][2], "StatusNotification");
        assert_eq!(frames[1][3]["connectorId"], 0);
        assert_eq!(frames[2][3]["connectorId"], 1);
    }
}

#[tokio::test]
async fn test_idempotent_status_set_emits_each_time() {
    let csms = MockCsms::start().await;
    let fleet = FleetManager::new(csms.url.clone());
    fleet.add(one_phase_charger("CP-A")).await.unwrap();
    fleet.connect("CP-A").await.unwrap();

    fleet
        .set_connector_status("CP-A", 1, ChargePointStatus::Unavailable, None)
        .await
        .unwrap();
    fleet
        .set_connector_status("CP-A", 1, ChargePointStatus::Unavailable, None)
        .await
        .unwrap();

    csms.wait_until("CP-A", Duration::from_secs(2), |frames| {
        frames
            .iter()
            .filter(|f| f[0] == 2 && f[2] == "StatusNotification" && f[3]["status"] == "Unavailable")
            .count()
            >= 2
    })
    .await;

    let summary = fleet.get("CP-A").await.unwrap();
    assert_eq!(summary.connectors[0].status, ChargePointStatus::Unavailable);
}
