// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The station orchestrator.
//!
//! One long-lived task per station: power-sequence the FNDH, discover
//! which SMARTbox sits on which PDoC port by boot-time correlation, then
//! run the steady-state loop - poll hardware, push telemetry, and
//! reconcile the polled state against the desired state held in the
//! external store.
//!
//! # Startup sequence
//!
//! 1. `configure_all_off()` takes the FNDH out of UNINITIALISED with every
//!    PDoC port held off; settle.
//! 2. Ports 1..28 power up one at a time, a fixed interval apart, each
//!    power-on timestamped.
//! 3. Every possible SMARTbox address is probed for its uptime; a reply
//!    dates the box's boot.
//! 4. Each port binds to the address whose boot follows the port's
//!    power-on most closely (within the discovery window). Bindings are
//!    injective both ways.
//! 5. `configure_final()` applies the persisted desired state.
//!
//! # Failure policy
//!
//! A SMARTbox that does not answer is skipped for the cycle (and the FNCC
//! consulted for bus trouble). Only losing the FNDH aborts the inner
//! loop; [`Station::run`] then waits out the reconnect delay, reopens the
//! transport and starts over. The station never exits on its own: only
//! the cooperative exit flag ends [`Station::run`].

pub mod slave;

pub use slave::{NullServiceLog, ServiceLog};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::StationConfig;
use crate::device::fndh::{Fndh, PdocConfig};
use crate::device::port::{Tristate, WriteIntent};
use crate::device::smartbox::{PortConfig, SmartBox};
use crate::device::status::StatusCode;
use crate::device::{DeviceError, Fncc};
use crate::metrics::{MetricPath, MetricPoint, MetricsSink};
use crate::store::{
    FndhPortRow, FndhStateRow, PortDesire, SmartboxPortDesire, SmartboxPortRow, SmartboxStateRow,
    StationStore, StoreError,
};
use crate::transport::Connection;

/// Result alias for station operations.
pub type StationResult<T> = Result<T, StationError>;

/// Errors that unwind the station's inner loop.
#[derive(Debug)]
pub enum StationError {
    /// The FNDH stopped answering; the outer loop reconnects.
    FndhUnreachable(DeviceError),
    /// The store failed during construction (later store failures are
    /// logged and retried, never fatal).
    Store(StoreError),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FndhUnreachable(e) => write!(f, "FNDH unreachable: {e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StationError {}

impl From<StoreError> for StationError {
    fn from(e: StoreError) -> Self {
        StationError::Store(e)
    }
}

/// One PaSD station: the FNDH, its SMARTboxes, and the loop driving them.
pub struct Station {
    pub(crate) conn: Arc<Connection>,
    /// Station configuration, fixed at construction.
    pub config: StationConfig,
    /// The FNDH controller.
    pub fndh: Fndh,
    /// The communications watchdog inside the FNDH.
    pub fncc: Fncc,
    /// Known SMARTboxes keyed by modbus address.
    pub smartboxes: BTreeMap<u8, SmartBox>,
    /// Antenna number -> (SMARTbox address, port number).
    pub antennae: BTreeMap<u16, (u8, u8)>,
    /// All SMARTboxes reachable and configured.
    pub active: bool,
    /// Station status string written to the store.
    pub status: String,
    wants_exit: Arc<AtomicBool>,
    store: Box<dyn StationStore>,
    metrics: Box<dyn MetricsSink>,
    last_startup_attempt: Option<Instant>,
    last_shutdown_attempt: Option<Instant>,
    pub(crate) slave: slave::SlaveState,
}

impl Station {
    /// Build a station: ensure the store rows exist, load the antenna map,
    /// and set up (but do not contact) the devices.
    pub fn new(
        conn: Arc<Connection>,
        config: StationConfig,
        mut store: Box<dyn StationStore>,
        metrics: Box<dyn MetricsSink>,
    ) -> StationResult<Self> {
        store.initialise(config.station_id)?;

        let fndh = Fndh::new(Arc::clone(&conn), config.fndh_address);
        let fncc = Fncc::new(Arc::clone(&conn), config.fncc_address);

        let mut station = Station {
            fndh,
            fncc,
            smartboxes: BTreeMap::new(),
            antennae: BTreeMap::new(),
            active: false,
            status: StatusCode::Unknown.to_string(),
            wants_exit: Arc::new(AtomicBool::new(false)),
            store,
            metrics,
            last_startup_attempt: None,
            last_shutdown_attempt: None,
            slave: slave::SlaveState::default(),
            config,
            conn,
        };
        station.load_antenna_map()?;
        Ok(station)
    }

    /// The cooperative exit flag; set it from another thread to stop
    /// [`Station::run`] at the next check point.
    #[must_use]
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.wants_exit)
    }

    fn exiting(&self) -> bool {
        self.wants_exit.load(Ordering::Relaxed)
    }

    /// Populate SMARTbox instances and the antenna lookup from the store.
    fn load_antenna_map(&mut self) -> StationResult<()> {
        let map = self.store.antenna_map(self.config.station_id)?;
        for (address, ports) in map {
            let smartbox = self
                .smartboxes
                .entry(address)
                .or_insert_with(|| SmartBox::new(Arc::clone(&self.conn), address));
            for (port_number, antenna) in ports {
                smartbox.port_mut(port_number).antenna_number = antenna;
                if let Some(antenna) = antenna {
                    self.antennae.insert(antenna, (address, port_number));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Run the full startup sequence. Returns true when the station came
    /// up mapped and configured.
    pub fn startup(&mut self) -> bool {
        self.last_startup_attempt = Some(Instant::now());

        if let Err(e) = self.fndh.configure_all_off() {
            log::error!("could not configure FNDH, aborting station startup: {e}");
            return false;
        }
        self.sleep_interruptibly(self.config.post_configure_delay());

        // Power the PDoC ports one at a time, noting when each turned on.
        let mut port_on_times: [Option<Instant>; 28] = [None; 28];
        for pdoc in 1..=28u8 {
            if self.exiting() {
                return false;
            }
            self.fndh.port_mut(pdoc).desire_enabled_online = Tristate::True;
            if let Err(e) = self.fndh.write_portconfig() {
                log::error!("could not write FNDH port configuration turning on port {pdoc}: {e}");
                return false;
            }
            port_on_times[(pdoc - 1) as usize] = Some(Instant::now());
            self.sleep_interruptibly(self.config.port_on_interval());
        }

        // Date every answering SMARTbox's boot from its uptime. The boot
        // time is anchored at the probe instant: silent addresses cost a
        // full reply timeout each, so one shared "now" would skew every
        // later probe.
        let mut boot_times: BTreeMap<u8, Instant> = BTreeMap::new();
        for address in 1..=self.config.max_smartbox {
            if self.exiting() {
                return false;
            }
            let smartbox = self
                .smartboxes
                .entry(address)
                .or_insert_with(|| SmartBox::new(Arc::clone(&self.conn), address));
            match smartbox.read_uptime() {
                Ok(uptime) => {
                    // A boot older than the monotonic clock can represent
                    // predates every port-on time and could never bind.
                    let age = Duration::from_secs(u64::from(uptime));
                    if let Some(boot) = Instant::now().checked_sub(age) {
                        boot_times.insert(address, boot);
                    }
                }
                Err(e) if e.is_unreachable() => {
                    log::debug!("no SMARTbox at address {address}");
                }
                Err(e) => log::warn!("SMARTbox {address} uptime read failed: {e}"),
            }
        }

        // Bind each port to the address that booted soonest after it
        // powered, within the discovery window.
        self.fndh.smartbox_on_port = [None; 28];
        for smartbox in self.smartboxes.values_mut() {
            smartbox.pdoc_number = None;
        }
        let window = Duration::from_secs_f64(self.config.discovery_window_secs);
        let bindings = correlate_bindings(&port_on_times, &mut boot_times, window);
        for (i, binding) in bindings.iter().enumerate() {
            let Some(address) = *binding else { continue };
            let pdoc = i as u8 + 1;
            self.fndh.smartbox_on_port[i] = Some(address);
            if let Some(smartbox) = self.smartboxes.get_mut(&address) {
                smartbox.pdoc_number = Some(pdoc);
            }
            log::info!("PDoC port {pdoc} feeds SMARTbox {address}");
        }

        // Apply the persisted desired state now that the mapping is known.
        let desired = match self.store.port_desires(self.config.station_id) {
            Ok((fndh_desires, _)) => Some(pdoc_config_from(&fndh_desires)),
            Err(e) => {
                log::error!("could not read desired port configuration: {e}");
                None
            }
        };
        if let Err(e) = self.fndh.configure_final(desired) {
            log::error!("could not do final configuration of FNDH during startup: {e}");
            return false;
        }

        self.active = true;
        self.status = StatusCode::Ok.to_string();
        true
    }

    /// Turn every PDoC port off and mark the station inactive.
    pub fn shutdown(&mut self) {
        self.last_shutdown_attempt = Some(Instant::now());
        for pdoc in 1..=28u8 {
            let port = self.fndh.port_mut(pdoc);
            port.desire_enabled_online = Tristate::False;
            port.desire_enabled_offline = Tristate::False;
        }
        if let Err(e) = self.fndh.write_portconfig() {
            log::error!("could not turn PDoC ports off during shutdown: {e}");
            return;
        }
        self.active = false;
        self.status = "SHUTDOWN".to_string();
        log::info!("station {} shut down", self.config.station_id);
    }

    // ------------------------------------------------------------------
    // Steady state
    // ------------------------------------------------------------------

    /// Run inner loop iterations until the exit flag is set (Ok) or the
    /// FNDH becomes unreachable (Err).
    pub fn main_loop(&mut self) -> StationResult<()> {
        while !self.exiting() {
            let tick = Instant::now();
            self.poll_once()?;
            let spent = tick.elapsed();
            if let Some(pad) = self.config.poll_interval().checked_sub(spent) {
                self.sleep_interruptibly(pad);
            }
        }
        Ok(())
    }

    /// Keep the station alive forever: reconnect and retry whenever the
    /// FNDH is lost, stop only on the exit flag.
    pub fn run(&mut self) {
        while !self.exiting() {
            match self.main_loop() {
                Ok(()) => break,
                Err(e) => {
                    log::error!("{e}; trying again in {:?}", self.config.reconnect_delay());
                    self.sleep_interruptibly(self.config.reconnect_delay());
                    self.conn.reopen();
                }
            }
        }
    }

    /// One pass of the steady-state loop: poll, telemetry, store rows,
    /// reconcile, activity gates. [`Station::main_loop`] calls this on the
    /// configured cadence.
    pub fn poll_once(&mut self) -> StationResult<()> {
        // Poll the FNDH first; losing it is fatal to the inner loop.
        if let Err(e) = self.fndh.poll_data() {
            if e.is_unreachable() {
                self.consult_fncc();
                return Err(StationError::FndhUnreachable(e));
            }
            log::error!("FNDH poll failed: {e}");
        } else {
            if self.fndh.status.is_abnormal() {
                log::warn!("FNDH has status {}", self.fndh.status);
            }
            if self.fndh.status == StatusCode::Uninitialised {
                // Power blip: the FNDH forgot its configuration, so the
                // port mapping has to be rebuilt too.
                if self.startup() {
                    log::info!("FNDH configured, it is now online with all PDoC ports mapped");
                } else {
                    log::error!("error starting up FNDH");
                }
            }
        }

        let desires = match self.store.port_desires(self.config.station_id) {
            Ok(d) => Some(d),
            Err(e) => {
                log::error!("could not read desired port configuration: {e}");
                None
            }
        };

        // Poll every known SMARTbox, ascending address order. One FNCC
        // consult per cycle is enough to characterise the bus.
        let mut fncc_consulted = false;
        let addresses: Vec<u8> = self.smartboxes.keys().copied().collect();
        for address in addresses {
            if self.exiting() {
                return Ok(());
            }
            let Some(smartbox) = self.smartboxes.get_mut(&address) else { continue };
            match smartbox.poll_data() {
                Ok(()) => {
                    if smartbox.status.is_abnormal() {
                        log::warn!("SMARTbox {address} has status {}", smartbox.status);
                    }
                    if smartbox.status == StatusCode::Uninitialised {
                        let portconfig = desires
                            .as_ref()
                            .and_then(|(_, sb)| sb.get(&address))
                            .map(|d| smartbox_config_from(d));
                        let cutoff = self.config.filter_cutoff_hz;
                        match smartbox.configure(None, portconfig, cutoff) {
                            Ok(()) => log::info!("SMARTbox {address} configured, it is now online"),
                            Err(e) => log::error!("error configuring SMARTbox {address}: {e}"),
                        }
                    }
                }
                Err(e) if e.is_unreachable() => {
                    log::warn!("SMARTbox {address} unreachable this cycle: {e}");
                    if !fncc_consulted {
                        self.consult_fncc();
                        fncc_consulted = true;
                    }
                }
                Err(e) => log::error!("SMARTbox {address} poll failed: {e}"),
            }
        }

        self.emit_metrics();

        if let Err(e) = self.update_store() {
            log::error!("store update failed, will retry next cycle: {e}");
        }

        if let Some((fndh_desires, smartbox_desires)) = desires {
            self.reconcile(&fndh_desires, &smartbox_desires);
        }

        match self.store.update_station_state(self.config.station_id, self.active, &self.status) {
            Ok(desired_active) => self.apply_activity_gates(desired_active),
            Err(e) => log::error!("station state update failed: {e}"),
        }

        Ok(())
    }

    /// Startup/shutdown retry gates from the store's `desired_active`.
    fn apply_activity_gates(&mut self, desired_active: bool) {
        let startup_gate = Duration::from_secs_f64(self.config.startup_retry_secs);
        let shutdown_gate = Duration::from_secs_f64(self.config.shutdown_retry_secs);
        if desired_active && !self.active {
            let waited_out =
                self.last_startup_attempt.map_or(true, |t| t.elapsed() > startup_gate);
            if waited_out {
                log::info!("station wants to be active, attempting startup");
                self.startup();
            }
        } else if !desired_active && self.active {
            let waited_out =
                self.last_shutdown_attempt.map_or(true, |t| t.elapsed() > shutdown_gate);
            if waited_out {
                log::info!("station no longer wants to be active, shutting down");
                self.shutdown();
            }
        }
    }

    /// Queue port-state writes for every device whose polled desires
    /// differ from the stored ones; one write per changed device.
    fn reconcile(
        &mut self,
        fndh_desires: &[PortDesire],
        smartbox_desires: &BTreeMap<u8, Vec<SmartboxPortDesire>>,
    ) {
        // FNDH ports.
        let mut intents = [WriteIntent::default(); 28];
        let mut needs_write = false;
        for (i, desire) in fndh_desires.iter().enumerate().take(28) {
            let port = &mut self.fndh.ports[i];
            if port.desire_enabled_online.as_option() != Some(desire.online)
                || port.desire_enabled_offline.as_option() != Some(desire.offline)
            {
                port.desire_enabled_online = Tristate::from_bool(desire.online);
                port.desire_enabled_offline = Tristate::from_bool(desire.offline);
                intents[i].state = true;
                needs_write = true;
            }
        }
        if needs_write {
            if let Err(e) = self.fndh.write_port_states(&intents) {
                log::error!("FNDH port reconciliation write failed: {e}");
            }
            // Give a SMARTbox time to boot if one was just powered on.
            self.sleep_interruptibly(self.config.fndh_port_settle());
        }

        // SMARTbox ports, with per-port one-shot breaker resets.
        let mut acked_resets: Vec<(u8, u8)> = Vec::new();
        for (&address, smartbox) in &mut self.smartboxes {
            let Some(desires) = smartbox_desires.get(&address) else { continue };
            let mut intents = [WriteIntent::default(); 12];
            let mut needs_write = false;
            for (i, desire) in desires.iter().enumerate().take(12) {
                let port = &mut smartbox.ports[i];
                if port.desire_enabled_online.as_option() != Some(desire.online)
                    || port.desire_enabled_offline.as_option() != Some(desire.offline)
                {
                    port.desire_enabled_online = Tristate::from_bool(desire.online);
                    port.desire_enabled_offline = Tristate::from_bool(desire.offline);
                    intents[i].state = true;
                    needs_write = true;
                }
                if desire.reset_breaker {
                    intents[i].breaker = true;
                    needs_write = true;
                    acked_resets.push((address, i as u8 + 1));
                }
            }
            if needs_write {
                if let Err(e) = smartbox.write_port_states(&intents) {
                    log::error!("SMARTbox {address} port reconciliation write failed: {e}");
                }
            }
        }
        if !acked_resets.is_empty() {
            if let Err(e) = self.store.ack_breaker_resets(self.config.station_id, &acked_resets) {
                log::error!("could not acknowledge breaker resets: {e}");
            }
        }
    }

    /// Poll the FNCC and log what it thinks of the bus; called when field
    /// devices stop answering.
    fn consult_fncc(&mut self) {
        match self.fncc.poll_data() {
            Ok(()) => log::warn!("FNCC reports {}", self.fncc.status),
            Err(e) => log::debug!("FNCC not answering either: {e}"),
        }
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Emit one flat metric batch for everything polled this cycle.
    fn emit_metrics(&mut self) {
        let path = MetricPath::new(&self.config.metrics_domain);
        let mut batch: Vec<MetricPoint> = Vec::new();

        if let Some(ts) = self.fndh.sys.readtime {
            let f = &self.fndh;
            let mut push = |name: &str, value: f64| {
                batch.push(MetricPoint::new(path.fndh(name), ts, value));
            };
            push("psu48v1_voltage", f.psu48v1_voltage);
            push("psu48v2_voltage", f.psu48v2_voltage);
            push("psu48v_current", f.psu48v_current);
            push("psu48v1_temp", f.psu48v1_temp);
            push("psu48v2_temp", f.psu48v2_temp);
            push("panel_temp", f.panel_temp);
            push("fncb_temp", f.fncb_temp);
            push("fncb_humidity", f.fncb_humidity);
            push("statuscode", f64::from(f.status.as_i8()));
            push("indicator_code", f64::from(f.lights.indicator.as_i8()));
            for port in &self.fndh.ports {
                batch.push(MetricPoint::new(
                    path.fndh_port(port.port_number, "power_state"),
                    ts,
                    f64::from(u8::from(port.power_state)),
                ));
                batch.push(MetricPoint::new(
                    path.fndh_port(port.port_number, "power_sense"),
                    ts,
                    f64::from(u8::from(port.power_sense())),
                ));
            }
        }

        for (&address, smartbox) in &self.smartboxes {
            let Some(ts) = smartbox.sys.readtime else { continue };
            let mut push = |name: &str, value: f64| {
                batch.push(MetricPoint::new(path.smartbox(address, name), ts, value));
            };
            push("incoming_voltage", smartbox.incoming_voltage);
            push("psu_voltage", smartbox.psu_voltage);
            push("psu_temp", smartbox.psu_temp);
            push("pcb_temp", smartbox.pcb_temp);
            push("outside_temp", smartbox.outside_temp);
            push("statuscode", f64::from(smartbox.status.as_i8()));
            push("indicator_code", f64::from(smartbox.lights.indicator.as_i8()));
            for port in &smartbox.ports {
                let n = port.port_number;
                batch.push(MetricPoint::new(path.smartbox_port(address, n, "current"), ts, port.current));
                batch.push(MetricPoint::new(
                    path.smartbox_port(address, n, "breaker_tripped"),
                    ts,
                    f64::from(u8::from(port.breaker_tripped)),
                ));
                batch.push(MetricPoint::new(
                    path.smartbox_port(address, n, "power_state"),
                    ts,
                    f64::from(u8::from(port.power_state)),
                ));
            }
            for (&sensor, &temp) in &smartbox.sensor_temps {
                batch.push(MetricPoint::new(path.smartbox_sensor(address, sensor, "temp"), ts, temp));
            }
        }

        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.metrics.send(&batch) {
            log::error!("dropping {} metric samples: {e}", batch.len());
        }
    }

    // ------------------------------------------------------------------
    // Store rows
    // ------------------------------------------------------------------

    /// Upsert the FNDH, SMARTbox and port state rows.
    fn update_store(&mut self) -> Result<(), StoreError> {
        let station_id = self.config.station_id;

        let f = &self.fndh;
        let fndh_state = FndhStateRow {
            station_id,
            mbrv: f.sys.mbrv,
            pcbrv: f.sys.pcbrv,
            cpuid: f.sys.cpuid_hex(),
            chipid: f.sys.chipid_hex(),
            firmware_version: f.sys.firmware_version,
            uptime: f.sys.uptime,
            psu48v1_voltage: f.psu48v1_voltage,
            psu48v2_voltage: f.psu48v2_voltage,
            psu48v_current: f.psu48v_current,
            psu48v1_temp: f.psu48v1_temp,
            psu48v2_temp: f.psu48v2_temp,
            panel_temp: f.panel_temp,
            fncb_temp: f.fncb_temp,
            fncb_humidity: f.fncb_humidity,
            status: f.status.to_string(),
            indicator: f.lights.indicator.to_string(),
            service_led: f.lights.service_led,
            readtime: f.sys.readtime,
        };
        let fndh_ports: Vec<FndhPortRow> = f
            .ports
            .iter()
            .map(|port| FndhPortRow {
                station_id,
                pdoc_number: port.port_number,
                smartbox_number: f.smartbox_on_port[(port.port_number - 1) as usize],
                system_online: port.status_timestamp.map(|_| port.system_online),
                locally_forced_on: port.locally_forced_on(),
                locally_forced_off: port.locally_forced_off(),
                power_state: port.status_timestamp.map(|_| port.power_state),
                power_sense: port.status_timestamp.map(|_| port.power_sense()),
                status_timestamp: port.status_timestamp,
            })
            .collect();
        self.store.upsert_fndh(&fndh_state, &fndh_ports)?;

        let mut states: Vec<SmartboxStateRow> = Vec::with_capacity(self.smartboxes.len());
        let mut ports: Vec<SmartboxPortRow> = Vec::with_capacity(self.smartboxes.len() * 12);
        for (&address, smartbox) in &self.smartboxes {
            states.push(SmartboxStateRow {
                station_id,
                smartbox_number: address,
                mbrv: smartbox.sys.mbrv,
                pcbrv: smartbox.sys.pcbrv,
                cpuid: smartbox.sys.cpuid_hex(),
                chipid: smartbox.sys.chipid_hex(),
                firmware_version: smartbox.sys.firmware_version,
                uptime: smartbox.sys.uptime,
                incoming_voltage: smartbox.incoming_voltage,
                psu_voltage: smartbox.psu_voltage,
                psu_temp: smartbox.psu_temp,
                pcb_temp: smartbox.pcb_temp,
                outside_temp: smartbox.outside_temp,
                status: smartbox.status.to_string(),
                indicator: smartbox.lights.indicator.to_string(),
                service_led: smartbox.lights.service_led,
                pdoc_number: smartbox.pdoc_number,
                readtime: smartbox.sys.readtime,
            });
            for port in &smartbox.ports {
                ports.push(SmartboxPortRow {
                    station_id,
                    smartbox_number: address,
                    port_number: port.port_number,
                    system_online: port.status_timestamp.map(|_| port.system_online),
                    current_draw: port.current_timestamp.map(|_| port.current),
                    current_draw_timestamp: port.current_timestamp,
                    locally_forced_on: port.locally_forced_on(),
                    locally_forced_off: port.locally_forced_off(),
                    breaker_tripped: port.status_timestamp.map(|_| port.breaker_tripped),
                    power_state: port.status_timestamp.map(|_| port.power_state),
                    status_timestamp: port.status_timestamp,
                });
            }
        }
        self.store.upsert_smartboxes(&states, &ports)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    /// Sleep in small slices so the exit flag stays responsive.
    fn sleep_interruptibly(&self, total: Duration) {
        let slice = Duration::from_millis(20);
        let deadline = Instant::now() + total;
        while !self.exiting() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}

/// Bind PDoC ports to SMARTbox addresses: a port takes the address whose
/// boot follows its power-on most closely, provided the lag is inside the
/// discovery window. A bound address is removed from the candidate pool,
/// so no two ports can claim the same SMARTbox and no SMARTbox two ports.
fn correlate_bindings(
    port_on_times: &[Option<Instant>; 28],
    boot_times: &mut BTreeMap<u8, Instant>,
    window: Duration,
) -> [Option<u8>; 28] {
    let mut bindings: [Option<u8>; 28] = [None; 28];
    for (i, on_time) in port_on_times.iter().enumerate() {
        let Some(on_time) = *on_time else { continue };
        let candidate = boot_times
            .iter()
            .filter(|(_, &boot)| boot > on_time)
            .min_by_key(|(_, &boot)| boot - on_time)
            .map(|(&address, &boot)| (address, boot - on_time));
        if let Some((address, delta)) = candidate {
            if delta < window {
                boot_times.remove(&address);
                bindings[i] = Some(address);
            }
        }
    }
    bindings
}

fn pdoc_config_from(desires: &[PortDesire]) -> PdocConfig {
    let mut config: PdocConfig = [(false, false); 28];
    for (slot, desire) in config.iter_mut().zip(desires.iter()) {
        *slot = (desire.online, desire.offline);
    }
    config
}

fn smartbox_config_from(desires: &[SmartboxPortDesire]) -> PortConfig {
    let mut config: PortConfig = [(false, false); 12];
    for (slot, desire) in config.iter_mut().zip(desires.iter()) {
        *slot = (desire.online, desire.offline);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(base: Instant, port_interval: Duration) -> [Option<Instant>; 28] {
        let mut on_times = [None; 28];
        for (i, slot) in on_times.iter_mut().enumerate() {
            *slot = Some(base + port_interval * i as u32);
        }
        on_times
    }

    #[test]
    fn discovery_binds_boxes_to_their_ports() {
        // Boxes at addresses 1, 2 and 5 boot ~3 s after PDoC ports 1, 2
        // and 5 power up; everything else stays silent.
        let base = Instant::now();
        let interval = Duration::from_secs(10);
        let on_times = times(base, interval);
        let mut boots = BTreeMap::new();
        for address in [1u8, 2, 5] {
            boots.insert(address, base + interval * u32::from(address - 1) + Duration::from_secs(3));
        }

        let bindings =
            correlate_bindings(&on_times, &mut boots.clone(), Duration::from_secs(10));
        assert_eq!(bindings[0], Some(1));
        assert_eq!(bindings[1], Some(2));
        assert_eq!(bindings[4], Some(5));
        assert_eq!(bindings.iter().flatten().count(), 3);
    }

    #[test]
    fn discovery_is_injective_both_ways() {
        // A box whose boot lag exceeds the window binds nowhere, and a box
        // that could plausibly match two ports binds to exactly one.
        let base = Instant::now();
        let on_times = times(base, Duration::from_secs(10));
        let mut boots = BTreeMap::new();
        boots.insert(7u8, base + Duration::from_secs(13)); // 3 s after port 2
        boots.insert(9u8, base + Duration::from_secs(95)); // 85 s after port 2

        let bindings = correlate_bindings(&on_times, &mut boots, Duration::from_secs(10));
        let bound: Vec<u8> = bindings.iter().flatten().copied().collect();
        assert_eq!(bound, vec![7]);
        assert_eq!(bindings[1], Some(7));
        // No address appears twice.
        let mut seen = std::collections::BTreeSet::new();
        assert!(bindings.iter().flatten().all(|a| seen.insert(*a)));
    }

    #[test]
    fn discovery_skips_boots_before_power_on() {
        // A box that was already up before its port powered cannot have
        // been powered by that port.
        let boot = Instant::now();
        let on_times = times(boot + Duration::from_secs(100), Duration::from_secs(10));
        let mut boots = BTreeMap::new();
        boots.insert(3u8, boot);

        let bindings = correlate_bindings(&on_times, &mut boots, Duration::from_secs(10));
        assert!(bindings.iter().all(Option::is_none));
    }
}
