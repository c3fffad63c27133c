//! The fleet manager: lifecycle and bulk orchestration of many virtual
//! charge points.
//!
//! Each managed charger owns its session, connector states, transaction
//! manager, and configuration table. Charger state sits behind a mutex with
//! short critical sections; sends to the CSMS happen outside the lock so a
//! slow socket never blocks admin commands on other chargers.

use crate::admin::{BulkOutcome, ChargerSummary};
use crate::error::{FleetError, FleetResult};
use crate::handlers;
use crate::ocpp_config::ConfigTable;
use crate::roster;
use chrono::Utc;
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};
use vcp_cp::{
    build_meter_value, electrical_tick, CarProfile, CarSimulator, CarStatus, ChargePointError,
    ConnectorState, TransactionManager, METER_INTERVAL_SECS, MIN_OFFERED_CURRENT_A,
};
use vcp_messages::v16::{
    AuthorizeRequest, BootNotificationRequest, MeterValuesRequest, StartTransactionRequest,
    StatusNotificationRequest, StopTransactionRequest,
};
use vcp_session::{SessionOptions, VcpSession};
use vcp_types::v16::{ChargePointErrorCode, ChargePointStatus, Reason};
use vcp_types::ChargerConfig;

/// Fallback CSMS endpoint when neither the CLI flag nor `WS_URL` is set.
pub const DEFAULT_WS_URL: &str = "ws://localhost:9000/ocpp";

/// Resolve the CSMS endpoint from the environment.
pub fn ws_url_from_env() -> String {
    std::env::var("WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string())
}

/// Id tag used when the admin starts a transaction without one.
const DEFAULT_ID_TAG: &str = "VCP-TAG";

pub(crate) struct Charger {
    pub(crate) config: ChargerConfig,
    pub(crate) state: Mutex<ChargerState>,
    pub(crate) transactions: Arc<TransactionManager>,
    pub(crate) ocpp_config: Mutex<ConfigTable>,
}

pub(crate) struct ChargerState {
    pub(crate) session: Option<VcpSession>,
    pub(crate) connected: bool,
    pub(crate) connectors: Vec<ConnectorState>,
    pub(crate) meter_task: Option<JoinHandle<()>>,
}

impl ChargerState {
    pub(crate) fn connector(&self, id: u32) -> Result<&ConnectorState, ChargePointError> {
        self.connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or(ChargePointError::NoSuchConnector(id))
    }

    pub(crate) fn connector_mut(
        &mut self,
        id: u32,
    ) -> Result<&mut ConnectorState, ChargePointError> {
        self.connectors
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ChargePointError::NoSuchConnector(id))
    }

    fn connected_session(&self, cp_id: &str) -> FleetResult<VcpSession> {
        match (&self.session, self.connected) {
            (Some(session), true) => Ok(session.clone()),
            _ => Err(FleetError::NotConnected(cp_id.to_string())),
        }
    }
}

impl Charger {
    fn new(config: ChargerConfig) -> Arc<Self> {
        let connectors = (1..=config.num_connectors).map(ConnectorState::new).collect();
        Arc::new(Charger {
            ocpp_config: Mutex::new(ConfigTable::for_charger(&config)),
            config,
            state: Mutex::new(ChargerState {
                session: None,
                connected: false,
                connectors,
                meter_task: None,
            }),
            transactions: Arc::new(TransactionManager::new()),
        })
    }
}

struct FleetInner {
    chargers: RwLock<HashMap<String, Arc<Charger>>>,
    ws_url: RwLock<String>,
    roster_path: Option<PathBuf>,
    exit_on_close: AtomicBool,
}

/// Cheap cloneable handle over the whole fleet.
#[derive(Clone)]
pub struct FleetManager {
    inner: Arc<FleetInner>,
}

impl FleetManager {
    /// A fleet with no roster persistence (tests, embedded use).
    pub fn new(ws_url: impl Into<String>) -> Self {
        FleetManager {
            inner: Arc::new(FleetInner {
                chargers: RwLock::new(HashMap::new()),
                ws_url: RwLock::new(ws_url.into()),
                roster_path: None,
                exit_on_close: AtomicBool::new(false),
            }),
        }
    }

    /// A fleet backed by a roster file; loads whatever the file holds.
    pub async fn with_roster(ws_url: impl Into<String>, roster_path: PathBuf) -> Self {
        let loaded = roster::load(&roster_path);
        let fleet = FleetManager {
            inner: Arc::new(FleetInner {
                chargers: RwLock::new(HashMap::new()),
                ws_url: RwLock::new(ws_url.into()),
                roster_path: Some(roster_path),
                exit_on_close: AtomicBool::new(false),
            }),
        };
        for config in loaded.chargers {
            if let Err(e) = fleet.insert(config, false).await {
                warn!("skipping roster entry: {e}");
            }
        }
        fleet
    }

    pub async fn ws_url(&self) -> String {
        self.inner.ws_url.read().await.clone()
    }

    pub async fn set_ws_url(&self, url: impl Into<String>) {
        *self.inner.ws_url.write().await = url.into();
    }

    /// When set, a closing session takes the whole process down with it.
    /// Off by default; the CLI front-end is the only caller that opts in.
    pub fn set_exit_on_close(&self, enabled: bool) {
        self.inner.exit_on_close.store(enabled, Ordering::Relaxed);
    }

    pub fn exit_on_close(&self) -> bool {
        self.inner.exit_on_close.load(Ordering::Relaxed)
    }

    pub(crate) async fn charger(&self, cp_id: &str) -> FleetResult<Arc<Charger>> {
        self.inner
            .chargers
            .read()
            .await
            .get(cp_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(cp_id.to_string()))
    }

    async fn persist(&self) {
        let Some(path) = &self.inner.roster_path else {
            return;
        };
        let chargers = self.inner.chargers.read().await;
        let mut configs: Vec<ChargerConfig> =
            chargers.values().map(|c| c.config.clone()).collect();
        configs.sort_by(|a, b| a.cp_id.cmp(&b.cp_id));
        roster::save(path, &configs);
    }

    async fn insert(&self, config: ChargerConfig, persist: bool) -> FleetResult<()> {
        config.validate().map_err(FleetError::InvalidArgument)?;
        {
            let mut chargers = self.inner.chargers.write().await;
            if chargers.contains_key(&config.cp_id) {
                return Err(FleetError::Conflict(config.cp_id));
            }
            info!(cp_id = %config.cp_id, "charger added");
            chargers.insert(config.cp_id.clone(), Charger::new(config));
        }
        if persist {
            self.persist().await;
        }
        Ok(())
    }

    pub async fn add(&self, config: ChargerConfig) -> FleetResult<()> {
        self.insert(config, true).await
    }

    /// Drop a charger from the roster. Stops its meter loop and forgets the
    /// session without closing the socket; `disconnect` is the close path.
    pub async fn remove(&self, cp_id: &str) -> FleetResult<()> {
        let charger = {
            let mut chargers = self.inner.chargers.write().await;
            chargers
                .remove(cp_id)
                .ok_or_else(|| FleetError::NotFound(cp_id.to_string()))?
        };
        {
            let mut state = charger.state.lock().await;
            if let Some(task) = state.meter_task.take() {
                task.abort();
            }
            state.session = None;
            state.connected = false;
        }
        charger.transactions.stop_all().await;
        info!(cp_id, "charger removed");
        self.persist().await;
        Ok(())
    }

    /// Synthesize `count` chargers named `prefix-NNN` from a base config.
    pub async fn generate_chargers(
        &self,
        prefix: &str,
        count: u32,
        base: &ChargerConfig,
    ) -> FleetResult<Vec<String>> {
        let mut created = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let mut config = base.clone();
            config.cp_id = format!("{prefix}-{i:03}");
            let cp_id = config.cp_id.clone();
            self.add(config).await?;
            created.push(cp_id);
        }
        Ok(created)
    }

    pub async fn list(&self) -> Vec<ChargerSummary> {
        let chargers: Vec<Arc<Charger>> =
            self.inner.chargers.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(chargers.len());
        for charger in chargers {
            summaries.push(summarize(&charger).await);
        }
        summaries.sort_by(|a, b| a.cp_id.cmp(&b.cp_id));
        summaries
    }

    pub async fn get(&self, cp_id: &str) -> FleetResult<ChargerSummary> {
        let charger = self.charger(cp_id).await?;
        Ok(summarize(&charger).await)
    }

    pub fn list_car_profiles() -> Vec<CarProfile> {
        CarProfile::builtin()
    }

    /// Open the session, boot, announce connector statuses, and start the
    /// 15 s meter loop.
    pub async fn connect(&self, cp_id: &str) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        {
            let state = charger.state.lock().await;
            if state.connected {
                return Ok(());
            }
        }

        let endpoint = self.ws_url().await;
        let exit_on_close = self.exit_on_close();
        let mut options = SessionOptions::new(endpoint, charger.config.clone());
        options.exit_on_close = exit_on_close;
        let fleet = self.clone();
        let close_id = cp_id.to_string();
        options.on_close = Some(Arc::new(move |code, reason| {
            let fleet = fleet.clone();
            let cp_id = close_id.clone();
            tokio::spawn(async move {
                fleet.mark_disconnected(&cp_id, code, &reason).await;
                if exit_on_close {
                    info!(%cp_id, code, "session closed with exit_on_close set, terminating");
                    std::process::exit(i32::from(code != 1000));
                }
            });
        }));

        let dispatcher = handlers::build_dispatcher(self.clone(), cp_id.to_string());
        let session = VcpSession::new(options, dispatcher);
        session.connect().await?;
        {
            charger.state.lock().await.session = Some(session.clone());
        }

        // Let the server finish its own bookkeeping before the first call.
        sleep(Duration::from_millis(200)).await;

        let boot = boot_request(&charger.config);
        let granted = session.call(&boot).await?;
        info!(
            cp_id,
            status = ?granted.status,
            heartbeat_interval = granted.interval,
            "boot notification acknowledged"
        );

        {
            charger.state.lock().await.connected = true;
        }

        // Connector 0 speaks for the station, then one per connector.
        let statuses: Vec<(u32, ChargePointStatus, ChargePointErrorCode)> = {
            let state = charger.state.lock().await;
            std::iter::once((
                0,
                ChargePointStatus::Available,
                ChargePointErrorCode::NoError,
            ))
            .chain(state.connectors.iter().map(|c| (c.id, c.status, c.error_code)))
            .collect()
        };
        for (connector_id, status, error_code) in statuses {
            notify_status(&session, connector_id, status, error_code).await;
        }

        let meter_task = self.spawn_meter_loop(Arc::clone(&charger), session.clone());
        {
            charger.state.lock().await.meter_task = Some(meter_task);
        }
        Ok(())
    }

    /// Best-effort sequential connect over the whole roster.
    pub async fn connect_all(&self) -> BulkOutcome {
        let mut cp_ids: Vec<String> =
            self.inner.chargers.read().await.keys().cloned().collect();
        cp_ids.sort();

        let mut outcome = BulkOutcome::default();
        for cp_id in cp_ids {
            match self.connect(&cp_id).await {
                Ok(()) => outcome.record(true),
                Err(e) => {
                    warn!(%cp_id, "connect failed: {e}");
                    outcome.record(false);
                }
            }
        }
        outcome
    }

    pub async fn disconnect(&self, cp_id: &str) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let session = {
            let mut state = charger.state.lock().await;
            if let Some(task) = state.meter_task.take() {
                task.abort();
            }
            state.connected = false;
            state.session.take()
        };
        charger.transactions.stop_all().await;
        if let Some(session) = session {
            session.close().await;
        }
        Ok(())
    }

    /// Socket-close bookkeeping; runs from the session's close callback.
    pub(crate) async fn mark_disconnected(&self, cp_id: &str, code: u16, reason: &str) {
        let Ok(charger) = self.charger(cp_id).await else {
            return;
        };
        warn!(cp_id, code, reason, "session closed");
        {
            let mut state = charger.state.lock().await;
            if let Some(task) = state.meter_task.take() {
                task.abort();
            }
            state.connected = false;
            state.session = None;
        }
        charger.transactions.stop_all().await;
    }

    /// Force a connector status, emitting StatusNotification when connected.
    pub async fn set_connector_status(
        &self,
        cp_id: &str,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: Option<ChargePointErrorCode>,
    ) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let (session, committed_error) = {
            let mut state = charger.state.lock().await;
            let session = if state.connected {
                state.session.clone()
            } else {
                None
            };
            let connector = state.connector_mut(connector_id)?;
            if let Some(code) = error_code {
                connector.error_code = code;
            }
            connector.set_status(status);
            (session, connector.error_code)
        };
        if let Some(session) = session {
            notify_status(&session, connector_id, status, committed_error).await;
        }
        Ok(())
    }

    /// A connector about to enter Charging must offer current; raise a
    /// zero offer to the pilot minimum so the invariant holds before the
    /// status commits.
    async fn ensure_charging_offer(
        &self,
        charger: &Arc<Charger>,
        connector_id: u32,
    ) -> FleetResult<()> {
        let mut state = charger.state.lock().await;
        let connector = state.connector_mut(connector_id)?;
        if connector.offered_current_a <= 0.0 {
            info!(
                cp_id = %charger.config.cp_id,
                connector_id,
                "no current offered at charge start, defaulting to {} A",
                MIN_OFFERED_CURRENT_A
            );
            connector.offered_current_a = MIN_OFFERED_CURRENT_A;
            if let Some(car) = connector.car.as_mut() {
                car.set_offered_current(MIN_OFFERED_CURRENT_A);
            }
        }
        Ok(())
    }

    /// Update the offered current. The power estimate is provisional; the
    /// next meter tick overwrites it with the sagged-voltage value.
    pub async fn set_charging_current(
        &self,
        cp_id: &str,
        connector_id: u32,
        amps: f64,
    ) -> FleetResult<()> {
        if amps < 0.0 {
            return Err(FleetError::InvalidArgument(
                "current must be non-negative".to_string(),
            ));
        }
        let charger = self.charger(cp_id).await?;
        let mut state = charger.state.lock().await;
        let phases = charger.config.phases;
        let connector = state.connector_mut(connector_id)?;
        connector.offered_current_a = amps;
        connector.reported_power_w = 230.0 * amps * phases as f64;
        if let Some(car) = connector.car.as_mut() {
            car.set_offered_current(amps);
        }
        Ok(())
    }

    /// Admin override of the connector's transaction binding.
    pub async fn set_transaction_id(
        &self,
        cp_id: &str,
        connector_id: u32,
        transaction_id: Option<i32>,
    ) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let mut state = charger.state.lock().await;
        state.connector_mut(connector_id)?.transaction_id = transaction_id;
        Ok(())
    }

    pub async fn reset_energy(&self, cp_id: &str, connector_id: u32) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let mut state = charger.state.lock().await;
        state.connector_mut(connector_id)?.reset_energy();
        Ok(())
    }

    /// Run the full start-transaction flow: Authorize, a beat later
    /// StartTransaction, then poll for the CSMS-assigned id and hand the
    /// meter sampling over to the fleet loop.
    pub async fn start_transaction(
        &self,
        cp_id: &str,
        connector_id: u32,
        id_tag: Option<String>,
    ) -> FleetResult<Option<i32>> {
        let charger = self.charger(cp_id).await?;
        let id_tag = id_tag.unwrap_or_else(|| DEFAULT_ID_TAG.to_string());

        let (session, meter_start, car_present) = {
            let state = charger.state.lock().await;
            let session = state.connected_session(cp_id)?;
            let connector = state.connector(connector_id)?;
            if connector.transaction_id.is_some() {
                return Err(ChargePointError::TransactionActive(connector_id).into());
            }
            (
                session,
                connector.energy_imported_wh().round() as i32,
                connector.car.is_some(),
            )
        };

        session
            .send(&AuthorizeRequest {
                id_tag: id_tag.clone(),
            })
            .await?;
        sleep(Duration::from_millis(500)).await;
        session
            .send(&StartTransactionRequest {
                connector_id,
                id_tag,
                meter_start,
                reservation_id: None,
                timestamp: Utc::now(),
            })
            .await?;

        self.set_connector_status(cp_id, connector_id, ChargePointStatus::Preparing, None)
            .await?;

        // The StartTransaction response handler registers the id with the
        // transaction manager; poll until it shows up.
        let mut assigned = None;
        for _ in 0..50 {
            sleep(Duration::from_millis(200)).await;
            if let Some(tx) = charger.transactions.find_by_connector(connector_id).await {
                assigned = Some(tx.transaction_id);
                break;
            }
        }

        let Some(transaction_id) = assigned else {
            // Accept-and-log: a late response still lands in the transaction
            // manager, it just won't be bound to the connector.
            warn!(
                cp_id,
                connector_id, "no transaction id within 10 s, connector left unbound"
            );
            return Ok(None);
        };

        {
            let mut state = charger.state.lock().await;
            state.connector_mut(connector_id)?.transaction_id = Some(transaction_id);
        }
        // The fleet's 15 s loop samples from here on.
        charger.transactions.disable_timer(transaction_id).await;

        if car_present {
            self.set_connector_status(cp_id, connector_id, ChargePointStatus::SuspendedEV, None)
                .await?;
            let delay_ms = thread_rng().gen_range(2000..3000);
            sleep(Duration::from_millis(delay_ms)).await;
            self.ensure_charging_offer(&charger, connector_id).await?;
            self.set_connector_status(cp_id, connector_id, ChargePointStatus::Charging, None)
                .await?;
        }

        Ok(Some(transaction_id))
    }

    pub async fn stop_transaction(
        &self,
        cp_id: &str,
        connector_id: u32,
        reason: Option<Reason>,
    ) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let (session, transaction_id, meter_stop, car_present) = {
            let mut state = charger.state.lock().await;
            let session = state.connected_session(cp_id)?;
            let connector = state.connector_mut(connector_id)?;
            let transaction_id = connector
                .transaction_id
                .take()
                .ok_or(ChargePointError::NoTransaction(connector_id))?;
            (
                session,
                transaction_id,
                connector.energy_imported_wh().round() as i32,
                connector.car.is_some(),
            )
        };

        session
            .send(&StopTransactionRequest {
                id_tag: None,
                meter_stop,
                timestamp: Utc::now(),
                transaction_id,
                reason,
                transaction_data: None,
            })
            .await?;
        charger.transactions.stop_transaction(transaction_id).await;

        let next = if car_present {
            ChargePointStatus::Preparing
        } else {
            ChargePointStatus::Available
        };
        self.set_connector_status(cp_id, connector_id, next, None).await
    }

    /// Attach a car simulator. SoC persists until unplug.
    pub async fn plug_in_car(
        &self,
        cp_id: &str,
        connector_id: u32,
        profile_id: &str,
        initial_soc: f64,
    ) -> FleetResult<()> {
        let profile = CarProfile::find(profile_id)
            .ok_or_else(|| ChargePointError::NoSuchProfile(profile_id.to_string()))?;
        if !(0.0..=1.0).contains(&initial_soc) {
            return Err(FleetError::InvalidArgument(format!(
                "initial soc {initial_soc} outside [0, 1]"
            )));
        }

        let charger = self.charger(cp_id).await?;
        let mid_transaction = {
            let mut state = charger.state.lock().await;
            let phases = charger.config.phases;
            let connector = state.connector_mut(connector_id)?;
            let mut car = CarSimulator::new(profile, phases, initial_soc);
            car.set_offered_current(connector.offered_current_a);
            connector.car = Some(car);
            connector.transaction_id.is_some()
                && connector.status == ChargePointStatus::Preparing
        };

        if mid_transaction {
            // The transaction was waiting for an EV: ramp through
            // SuspendedEV into Charging like a real onboard charger.
            self.set_connector_status(cp_id, connector_id, ChargePointStatus::SuspendedEV, None)
                .await?;
            let delay_ms = thread_rng().gen_range(2000..3000);
            sleep(Duration::from_millis(delay_ms)).await;
            self.ensure_charging_offer(&charger, connector_id).await?;
            self.set_connector_status(cp_id, connector_id, ChargePointStatus::Charging, None)
                .await
        } else {
            self.set_connector_status(cp_id, connector_id, ChargePointStatus::Preparing, None)
                .await
        }
    }

    pub async fn unplug_car(&self, cp_id: &str, connector_id: u32) -> FleetResult<()> {
        let charger = self.charger(cp_id).await?;
        let in_transaction = {
            let mut state = charger.state.lock().await;
            let connector = state.connector_mut(connector_id)?;
            if connector.car.take().is_none() {
                return Err(ChargePointError::NoCar(connector_id).into());
            }
            connector.transaction_id.is_some()
        };
        let next = if in_transaction {
            ChargePointStatus::Preparing
        } else {
            ChargePointStatus::Available
        };
        self.set_connector_status(cp_id, connector_id, next, None).await
    }

    pub async fn get_car_status(&self, cp_id: &str, connector_id: u32) -> FleetResult<CarStatus> {
        let charger = self.charger(cp_id).await?;
        let state = charger.state.lock().await;
        let connector = state.connector(connector_id)?;
        connector
            .car
            .as_ref()
            .map(CarStatus::of)
            .ok_or_else(|| ChargePointError::NoCar(connector_id).into())
    }

    pub async fn bulk_set_connector_status(
        &self,
        cp_ids: &[String],
        connector_id: u32,
        status: ChargePointStatus,
        error_code: Option<ChargePointErrorCode>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for cp_id in cp_ids {
            let ok = self
                .set_connector_status(cp_id, connector_id, status, error_code)
                .await
                .is_ok();
            outcome.record(ok);
        }
        outcome
    }

    pub async fn bulk_set_charging_current(
        &self,
        cp_ids: &[String],
        connector_id: u32,
        amps: f64,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for cp_id in cp_ids {
            let ok = self
                .set_charging_current(cp_id, connector_id, amps)
                .await
                .is_ok();
            outcome.record(ok);
        }
        outcome
    }

    /// Apply a configuration change to each charger's table, with the same
    /// semantics the ChangeConfiguration handler uses.
    pub async fn bulk_change_configuration(
        &self,
        cp_ids: &[String],
        key: &str,
        value: &str,
    ) -> BulkOutcome {
        use vcp_messages::v16::ConfigurationStatus;

        let mut outcome = BulkOutcome::default();
        for cp_id in cp_ids {
            let ok = match self.charger(cp_id).await {
                Ok(charger) => {
                    let status = charger.ocpp_config.lock().await.change(key, value);
                    status == ConfigurationStatus::Accepted
                }
                Err(_) => false,
            };
            outcome.record(ok);
        }
        outcome
    }

    fn spawn_meter_loop(&self, charger: Arc<Charger>, session: VcpSession) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs_f64(METER_INTERVAL_SECS)).await;
                meter_tick(&charger, &session).await;
            }
        })
    }
}

/// One pass of the fleet meter loop over a charger's connectors.
async fn meter_tick(charger: &Arc<Charger>, session: &VcpSession) {
    let phases = charger.config.phases;
    let mut requests = Vec::new();
    let mut suspended = Vec::new();
    {
        let mut state = charger.state.lock().await;
        for connector in state.connectors.iter_mut() {
            if connector.status != ChargePointStatus::Charging
                || connector.offered_current_a <= 0.0
            {
                continue;
            }
            let tick = electrical_tick(connector, phases, METER_INTERVAL_SECS);
            let meter_value = build_meter_value(Utc::now(), &tick, connector);
            requests.push(MeterValuesRequest {
                connector_id: connector.id,
                transaction_id: connector.transaction_id,
                meter_value: vec![meter_value],
            });
            if tick.car_reached_full {
                connector.set_status(ChargePointStatus::SuspendedEV);
                suspended.push((connector.id, connector.error_code));
            }
        }
    }

    for request in requests {
        if let Err(e) = session.send(&request).await {
            warn!(cp_id = %session.cp_id(), "meter values not sent: {e}");
        }
    }
    for (connector_id, error_code) in suspended {
        notify_status(session, connector_id, ChargePointStatus::SuspendedEV, error_code).await;
    }
}

pub(crate) fn boot_request(config: &ChargerConfig) -> BootNotificationRequest {
    BootNotificationRequest {
        charge_point_vendor: config.vendor.clone(),
        charge_point_model: config.model.clone(),
        charge_point_serial_number: config.serial_number.clone(),
        charge_box_serial_number: None,
        firmware_version: config.firmware_version.clone(),
        iccid: config.iccid.clone(),
        imsi: config.imsi.clone(),
        meter_type: config.meter_type.clone(),
        meter_serial_number: config.meter_serial_number.clone(),
    }
}

pub(crate) async fn notify_status(
    session: &VcpSession,
    connector_id: u32,
    status: ChargePointStatus,
    error_code: ChargePointErrorCode,
) {
    let request = StatusNotificationRequest {
        connector_id,
        error_code,
        info: None,
        status,
        timestamp: Some(Utc::now()),
        vendor_id: None,
        vendor_error_code: None,
    };
    if let Err(e) = session.send(&request).await {
        warn!(cp_id = %session.cp_id(), connector_id, "status notification not sent: {e}");
    }
}

async fn summarize(charger: &Arc<Charger>) -> ChargerSummary {
    let state = charger.state.lock().await;
    let (sent, received) = state
        .session
        .as_ref()
        .map(|s| (s.messages_sent(), s.messages_received()))
        .unwrap_or((0, 0));
    ChargerSummary {
        cp_id: charger.config.cp_id.clone(),
        config: charger.config.clone(),
        connected: state.connected,
        connectors: state.connectors.iter().map(|c| c.snapshot()).collect(),
        messages_sent: sent,
        messages_received: received,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cp_id: &str) -> ChargerConfig {
        ChargerConfig::new(cp_id)
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();
        let err = fleet.add(config("CP-A")).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_exit_on_close_defaults_off() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        assert!(!fleet.exit_on_close());
        fleet.set_exit_on_close(true);
        assert!(fleet.exit_on_close());
        fleet.set_exit_on_close(false);
        assert!(!fleet.exit_on_close());
    }

    #[tokio::test]
    async fn test_remove_unknown_charger() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        let err = fleet.remove("CP-X").await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_generate_chargers_zero_pads_ids() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        let mut base = config("unused");
        base.phases = 3;
        let ids = fleet.generate_chargers("LOAD", 3, &base).await.unwrap();
        assert_eq!(ids, vec!["LOAD-001", "LOAD-002", "LOAD-003"]);

        let listed = fleet.list().await;
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].cp_id, "LOAD-001");
        assert_eq!(listed[0].config.phases, 3);
        assert!(!listed[0].connected);
    }

    #[tokio::test]
    async fn test_set_charging_current_updates_estimate_and_car() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        let mut c = config("CP-A");
        c.phases = 3;
        fleet.add(c).await.unwrap();

        fleet.set_charging_current("CP-A", 1, 16.0).await.unwrap();
        let summary = fleet.get("CP-A").await.unwrap();
        assert_eq!(summary.connectors[0].offered_current_a, 16.0);
        assert!((summary.connectors[0].reported_power_w - 230.0 * 16.0 * 3.0).abs() < 1e-9);

        let err = fleet.set_charging_current("CP-A", 1, -4.0).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidArgument(_)));

        let err = fleet.set_charging_current("CP-A", 9, 16.0).await.unwrap_err();
        assert!(matches!(err, FleetError::ChargePoint(_)));
    }

    #[tokio::test]
    async fn test_plug_in_and_unplug_drive_status() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();

        fleet
            .plug_in_car("CP-A", 1, "generic-medium", 0.5)
            .await
            .unwrap();
        let summary = fleet.get("CP-A").await.unwrap();
        assert_eq!(summary.connectors[0].status, ChargePointStatus::Preparing);
        let car = summary.connectors[0].car.as_ref().unwrap();
        assert_eq!(car.profile_id, "generic-medium");
        // Single-phase charger caps the car's three phases.
        assert_eq!(car.effective_phases, 1);
        assert_eq!(car.soc, 0.5);

        fleet.unplug_car("CP-A", 1).await.unwrap();
        let summary = fleet.get("CP-A").await.unwrap();
        assert_eq!(summary.connectors[0].status, ChargePointStatus::Available);
        assert!(summary.connectors[0].car.is_none());

        let err = fleet.unplug_car("CP-A", 1).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::ChargePoint(ChargePointError::NoCar(1))
        ));
    }

    #[tokio::test]
    async fn test_plug_in_rejects_unknown_profile_and_bad_soc() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();

        let err = fleet.plug_in_car("CP-A", 1, "no-such-car", 0.5).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::ChargePoint(ChargePointError::NoSuchProfile(_))
        ));

        let err = fleet
            .plug_in_car("CP-A", 1, "generic-medium", 1.5)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_start_transaction_requires_connection() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();
        let err = fleet.start_transaction("CP-A", 1, None).await.unwrap_err();
        assert!(matches!(err, FleetError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_bulk_outcomes_count_failures() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();

        let ids = vec!["CP-A".to_string(), "CP-B".to_string()];
        let outcome = fleet.bulk_set_charging_current(&ids, 1, 10.0).await;
        assert_eq!(outcome, BulkOutcome { success: 1, failed: 1 });

        let outcome = fleet
            .bulk_set_connector_status(&ids, 1, ChargePointStatus::Unavailable, None)
            .await;
        assert_eq!(outcome.success, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn test_bulk_change_configuration_semantics() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();
        let ids = vec!["CP-A".to_string()];

        let ok = fleet
            .bulk_change_configuration(&ids, "HeartbeatInterval", "60")
            .await;
        assert_eq!(ok.success, 1);

        let readonly = fleet
            .bulk_change_configuration(&ids, "NumberOfConnectors", "4")
            .await;
        assert_eq!(readonly.failed, 1);
    }

    #[tokio::test]
    async fn test_roster_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chargers.json");

        let fleet = FleetManager::with_roster(DEFAULT_WS_URL, path.clone()).await;
        fleet.add(config("CP-A")).await.unwrap();
        fleet.add(config("CP-B")).await.unwrap();
        fleet.remove("CP-B").await.unwrap();

        let reloaded = FleetManager::with_roster(DEFAULT_WS_URL, path).await;
        let listed = reloaded.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cp_id, "CP-A");
    }

    #[tokio::test]
    async fn test_reset_energy_and_transaction_override() {
        let fleet = FleetManager::new(DEFAULT_WS_URL);
        fleet.add(config("CP-A")).await.unwrap();

        fleet.set_transaction_id("CP-A", 1, Some(7)).await.unwrap();
        let summary = fleet.get("CP-A").await.unwrap();
        assert_eq!(summary.connectors[0].transaction_id, Some(7));

        fleet.set_transaction_id("CP-A", 1, None).await.unwrap();
        fleet.reset_energy("CP-A", 1).await.unwrap();
        let summary = fleet.get("CP-A").await.unwrap();
        assert_eq!(summary.connectors[0].transaction_id, None);
        assert_eq!(summary.connectors[0].energy_imported_wh, 0.0);
    }
}
