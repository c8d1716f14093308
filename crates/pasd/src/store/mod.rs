// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contract with the persistent station store.
//!
//! The store itself (a database in production) is an external
//! collaborator; this module pins down only what the orchestrator reads
//! and writes:
//!
//! - state rows for the FNDH, its 28 ports, the 24 SMARTboxes and their
//!   288 ports, upserted once per poll cycle
//! - the time-bounded antenna map (antenna number -> SMARTbox/port)
//! - desired per-port configuration, read every cycle and reconciled
//!   against the polled hardware state
//! - the station row's `active`/`desired_active` pair, which gates
//!   startup and shutdown
//!
//! [`MemoryStore`] is a complete in-memory implementation used by the
//! test suite and as a stand-in while commissioning.

use std::collections::BTreeMap;
use std::fmt;

use crate::device::unix_now;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A failed store operation. Write failures are logged and retried on the
/// next cycle; they never abort the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// What the backend reported.
    pub message: String,
}

impl StoreError {
    /// Wrap a backend error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        StoreError { message: message.into() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store: {}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// FNDH state row, one per station.
#[derive(Debug, Clone, Default)]
pub struct FndhStateRow {
    pub station_id: u16,
    pub mbrv: u16,
    pub pcbrv: u16,
    pub cpuid: String,
    pub chipid: String,
    pub firmware_version: u16,
    pub uptime: u32,
    pub psu48v1_voltage: f64,
    pub psu48v2_voltage: f64,
    pub psu48v_current: f64,
    pub psu48v1_temp: f64,
    pub psu48v2_temp: f64,
    pub panel_temp: f64,
    pub fncb_temp: f64,
    pub fncb_humidity: f64,
    pub status: String,
    pub indicator: String,
    pub service_led: bool,
    pub readtime: Option<f64>,
}

/// FNDH port row, 28 per station.
#[derive(Debug, Clone, Default)]
pub struct FndhPortRow {
    pub station_id: u16,
    pub pdoc_number: u8,
    pub smartbox_number: Option<u8>,
    pub system_online: Option<bool>,
    pub locally_forced_on: Option<bool>,
    pub locally_forced_off: Option<bool>,
    pub power_state: Option<bool>,
    pub power_sense: Option<bool>,
    pub status_timestamp: Option<f64>,
}

/// SMARTbox state row, 24 per station.
#[derive(Debug, Clone, Default)]
pub struct SmartboxStateRow {
    pub station_id: u16,
    pub smartbox_number: u8,
    pub mbrv: u16,
    pub pcbrv: u16,
    pub cpuid: String,
    pub chipid: String,
    pub firmware_version: u16,
    pub uptime: u32,
    pub incoming_voltage: f64,
    pub psu_voltage: f64,
    pub psu_temp: f64,
    pub pcb_temp: f64,
    pub outside_temp: f64,
    pub status: String,
    pub indicator: String,
    pub service_led: bool,
    pub pdoc_number: Option<u8>,
    pub readtime: Option<f64>,
}

/// SMARTbox port row, 288 per station.
#[derive(Debug, Clone, Default)]
pub struct SmartboxPortRow {
    pub station_id: u16,
    pub smartbox_number: u8,
    pub port_number: u8,
    pub system_online: Option<bool>,
    pub current_draw: Option<f64>,
    pub current_draw_timestamp: Option<f64>,
    pub locally_forced_on: Option<bool>,
    pub locally_forced_off: Option<bool>,
    pub breaker_tripped: Option<bool>,
    pub power_state: Option<bool>,
    pub status_timestamp: Option<f64>,
}

/// Desired configuration for one FNDH port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortDesire {
    /// Port on while the device is online.
    pub online: bool,
    /// Port on while the device is offline.
    pub offline: bool,
}

/// Desired configuration for one SMARTbox port, including the one-shot
/// breaker reset request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmartboxPortDesire {
    /// Port on while the device is online.
    pub online: bool,
    /// Port on while the device is offline.
    pub offline: bool,
    /// Reset the port breaker on the next write (cleared by the
    /// orchestrator once issued).
    pub reset_breaker: bool,
}

/// Antenna map: SMARTbox address -> port number -> antenna number.
/// All `max_smartbox * 12` ports are present; unmapped ports hold `None`.
pub type AntennaMap = BTreeMap<u8, BTreeMap<u8, Option<u16>>>;

/// Read/write contract with the persistent store.
pub trait StationStore: Send {
    /// Guarantee exactly one row per expected entity (station, FNDH, 28
    /// FNDH ports, 24 SMARTboxes, 288 SMARTbox ports): delete duplicates,
    /// insert what is missing.
    fn initialise(&mut self, station_id: u16) -> StoreResult<()>;

    /// The currently valid antenna map.
    fn antenna_map(&mut self, station_id: u16) -> StoreResult<AntennaMap>;

    /// Desired port configuration for the FNDH (index 0 = PDoC 1) and for
    /// every SMARTbox.
    #[allow(clippy::type_complexity)]
    fn port_desires(
        &mut self,
        station_id: u16,
    ) -> StoreResult<(Vec<PortDesire>, BTreeMap<u8, Vec<SmartboxPortDesire>>)>;

    /// Clear one-shot breaker-reset flags that have been written to
    /// hardware.
    fn ack_breaker_resets(&mut self, station_id: u16, ports: &[(u8, u8)]) -> StoreResult<()>;

    /// Upsert the FNDH state and port rows.
    fn upsert_fndh(&mut self, state: &FndhStateRow, ports: &[FndhPortRow]) -> StoreResult<()>;

    /// Upsert all SMARTbox state and port rows.
    fn upsert_smartboxes(
        &mut self,
        states: &[SmartboxStateRow],
        ports: &[SmartboxPortRow],
    ) -> StoreResult<()>;

    /// Write the station's `active`/`status` pair and read back
    /// `desired_active`.
    fn update_station_state(
        &mut self,
        station_id: u16,
        active: bool,
        status: &str,
    ) -> StoreResult<bool>;
}

/// A shared store handle: lets a test (or a second task) keep a handle to
/// the same store the station writes through.
impl<S: StationStore> StationStore for std::sync::Arc<parking_lot::Mutex<S>> {
    fn initialise(&mut self, station_id: u16) -> StoreResult<()> {
        self.lock().initialise(station_id)
    }

    fn antenna_map(&mut self, station_id: u16) -> StoreResult<AntennaMap> {
        self.lock().antenna_map(station_id)
    }

    fn port_desires(
        &mut self,
        station_id: u16,
    ) -> StoreResult<(Vec<PortDesire>, BTreeMap<u8, Vec<SmartboxPortDesire>>)> {
        self.lock().port_desires(station_id)
    }

    fn ack_breaker_resets(&mut self, station_id: u16, ports: &[(u8, u8)]) -> StoreResult<()> {
        self.lock().ack_breaker_resets(station_id, ports)
    }

    fn upsert_fndh(&mut self, state: &FndhStateRow, ports: &[FndhPortRow]) -> StoreResult<()> {
        self.lock().upsert_fndh(state, ports)
    }

    fn upsert_smartboxes(
        &mut self,
        states: &[SmartboxStateRow],
        ports: &[SmartboxPortRow],
    ) -> StoreResult<()> {
        self.lock().upsert_smartboxes(states, ports)
    }

    fn update_station_state(
        &mut self,
        station_id: u16,
        active: bool,
        status: &str,
    ) -> StoreResult<bool> {
        self.lock().update_station_state(station_id, active, status)
    }
}

/// In-memory [`StationStore`] used by tests and commissioning runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Antenna assignments: `(smartbox, port) -> antenna`.
    assignments: BTreeMap<(u8, u8), u16>,
    /// Desired FNDH port configuration, index 0 = PDoC 1.
    pub fndh_desires: Vec<PortDesire>,
    /// Desired SMARTbox port configuration.
    pub smartbox_desires: BTreeMap<u8, Vec<SmartboxPortDesire>>,
    /// Station desired-active flag, as an operator would set it.
    pub desired_active: bool,
    /// Last station state written back.
    pub last_station_state: Option<(bool, String, f64)>,
    /// Last FNDH rows written back.
    pub last_fndh: Option<(FndhStateRow, Vec<FndhPortRow>)>,
    /// Last SMARTbox rows written back.
    pub last_smartboxes: Option<(Vec<SmartboxStateRow>, Vec<SmartboxPortRow>)>,
    /// How many SMARTbox addresses the map covers.
    pub max_smartbox: u8,
    /// Set by [`StationStore::initialise`]; the row-existence guarantee is
    /// trivially true in memory.
    pub initialised: bool,
}

impl MemoryStore {
    /// An empty store for `max_smartbox` addresses, everything desired off.
    #[must_use]
    pub fn new(max_smartbox: u8) -> Self {
        MemoryStore {
            assignments: BTreeMap::new(),
            fndh_desires: vec![PortDesire::default(); 28],
            smartbox_desires: (1..=max_smartbox)
                .map(|a| (a, vec![SmartboxPortDesire::default(); 12]))
                .collect(),
            desired_active: true,
            last_station_state: None,
            last_fndh: None,
            last_smartboxes: None,
            max_smartbox,
            initialised: false,
        }
    }

    /// Assign an antenna number to a SMARTbox port.
    pub fn assign_antenna(&mut self, antenna: u16, smartbox: u8, port: u8) {
        self.assignments.insert((smartbox, port), antenna);
    }

    /// Set the desired state of one FNDH port (1-based).
    pub fn set_fndh_desire(&mut self, pdoc: u8, online: bool, offline: bool) {
        self.fndh_desires[(pdoc - 1) as usize] = PortDesire { online, offline };
    }

    /// Set the desired state of one SMARTbox port (1-based).
    pub fn set_smartbox_desire(&mut self, smartbox: u8, port: u8, online: bool, offline: bool) {
        if let Some(ports) = self.smartbox_desires.get_mut(&smartbox) {
            let d = &mut ports[(port - 1) as usize];
            d.online = online;
            d.offline = offline;
        }
    }

    /// Request a one-shot breaker reset on a SMARTbox port (1-based).
    pub fn request_breaker_reset(&mut self, smartbox: u8, port: u8) {
        if let Some(ports) = self.smartbox_desires.get_mut(&smartbox) {
            ports[(port - 1) as usize].reset_breaker = true;
        }
    }
}

impl StationStore for MemoryStore {
    fn initialise(&mut self, _station_id: u16) -> StoreResult<()> {
        self.initialised = true;
        Ok(())
    }

    fn antenna_map(&mut self, _station_id: u16) -> StoreResult<AntennaMap> {
        let mut map: AntennaMap = BTreeMap::new();
        for smartbox in 1..=self.max_smartbox {
            let ports: BTreeMap<u8, Option<u16>> = (1..=12)
                .map(|p| (p, self.assignments.get(&(smartbox, p)).copied()))
                .collect();
            map.insert(smartbox, ports);
        }
        Ok(map)
    }

    fn port_desires(
        &mut self,
        _station_id: u16,
    ) -> StoreResult<(Vec<PortDesire>, BTreeMap<u8, Vec<SmartboxPortDesire>>)> {
        Ok((self.fndh_desires.clone(), self.smartbox_desires.clone()))
    }

    fn ack_breaker_resets(&mut self, _station_id: u16, ports: &[(u8, u8)]) -> StoreResult<()> {
        for &(smartbox, port) in ports {
            if let Some(desires) = self.smartbox_desires.get_mut(&smartbox) {
                desires[(port - 1) as usize].reset_breaker = false;
            }
        }
        Ok(())
    }

    fn upsert_fndh(&mut self, state: &FndhStateRow, ports: &[FndhPortRow]) -> StoreResult<()> {
        self.last_fndh = Some((state.clone(), ports.to_vec()));
        Ok(())
    }

    fn upsert_smartboxes(
        &mut self,
        states: &[SmartboxStateRow],
        ports: &[SmartboxPortRow],
    ) -> StoreResult<()> {
        self.last_smartboxes = Some((states.to_vec(), ports.to_vec()));
        Ok(())
    }

    fn update_station_state(
        &mut self,
        _station_id: u16,
        active: bool,
        status: &str,
    ) -> StoreResult<bool> {
        self.last_station_state = Some((active, status.to_string(), unix_now()));
        Ok(self.desired_active)
    }
}
