// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The SMARTbox: a 12-port FEM power box in the field.
//!
//! Up to 24 SMARTboxes hang off one FNDH over the shared serial bus. Each
//! powers twelve antenna front-end modules, reports per-port current, and
//! trips per-port over-current breakers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{envelope, sampling};
use crate::transport::Connection;

use super::port::{PortStatus, Tristate, WriteIntent};
use super::registers::{self, Field, RegisterMap};
use super::scale::Scale;
use super::status::StatusCode;
use super::{decode_sys_field, unix_now, word_at, DeviceError, DeviceResult, Lights, SysBlock, Thresholds};

/// Desired port power configuration: `(enabled_online, enabled_offline)`
/// per FEM port.
pub type PortConfig = [(bool, bool); 12];

/// One SMARTbox on the station bus.
pub struct SmartBox {
    conn: Arc<Connection>,
    /// Modbus station address (1-30).
    pub modbus_address: u8,
    map: Option<&'static RegisterMap>,
    /// Common system block from the last poll.
    pub sys: SysBlock,
    /// Incoming 48 VDC voltage (Volts).
    pub incoming_voltage: f64,
    /// Internal 5 V PSU output voltage (Volts).
    pub psu_voltage: f64,
    /// 5 V PSU temperature (deg C).
    pub psu_temp: f64,
    /// PCB temperature (deg C).
    pub pcb_temp: f64,
    /// Outside temperature (deg C).
    pub outside_temp: f64,
    /// Generic sensor slots, keyed by sensor number (1-12).
    pub sensor_temps: BTreeMap<u8, f64>,
    /// System status from the last poll.
    pub status: StatusCode,
    /// Service LED and indicator state from the last poll.
    pub lights: Lights,
    /// The twelve FEM ports, index 0 = port 1.
    pub ports: [PortStatus; 12],
    /// PDoC port on the FNDH this box is plugged into; bound during
    /// station startup by uptime correlation.
    pub pdoc_number: Option<u8>,
    /// Analog thresholds written at configuration time.
    pub thresholds: Thresholds,
    /// Desired port power states written at configuration time.
    pub portconfig: PortConfig,
}

impl SmartBox {
    /// Set up an unpolled SMARTbox. No bus traffic happens here.
    #[must_use]
    pub fn new(conn: Arc<Connection>, modbus_address: u8) -> Self {
        SmartBox {
            conn,
            modbus_address,
            map: None,
            sys: SysBlock::default(),
            incoming_voltage: 0.0,
            psu_voltage: 0.0,
            psu_temp: 0.0,
            pcb_temp: 0.0,
            outside_temp: 0.0,
            sensor_temps: BTreeMap::new(),
            status: StatusCode::Unknown,
            lights: Lights::default(),
            ports: std::array::from_fn(|i| PortStatus::new(i as u8 + 1, modbus_address)),
            pdoc_number: None,
            thresholds: Thresholds::smartbox_defaults(),
            portconfig: [(false, false); 12],
        }
    }

    /// The register map pinned at first contact, if any.
    #[must_use]
    pub fn register_map(&self) -> Option<&'static RegisterMap> {
        self.map
    }

    /// Port status by 1-based port number.
    #[must_use]
    pub fn port(&self, port_number: u8) -> &PortStatus {
        &self.ports[(port_number - 1) as usize]
    }

    /// Mutable port status by 1-based port number.
    pub fn port_mut(&mut self, port_number: u8) -> &mut PortStatus {
        &mut self.ports[(port_number - 1) as usize]
    }

    /// Read the whole POLL block in one transaction and decode every field.
    ///
    /// The first successful poll latches the map revision; any later poll
    /// implying a different revision fails with
    /// [`DeviceError::MapUnknown`] and leaves the snapshot untouched.
    pub fn poll_data(&mut self) -> DeviceResult<()> {
        let poll = self.map.map_or(registers::SMARTBOX_POLL_1, |m| m.poll);
        let block = registers::poll_block_size(poll);
        let values = self.conn.read_registers(self.modbus_address, 1, block)?;
        let read_timestamp = unix_now();

        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                log::error!(
                    "SMARTbox {}: map revision changed from {} to {mbrv}",
                    self.modbus_address,
                    pinned.revision
                );
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::smartbox_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);

        self.sensor_temps.clear();
        for def in map.poll {
            if decode_sys_field(&mut self.sys, def, &values) {
                continue;
            }
            let raw = word_at(&values, def);
            match def.field {
                Field::Incoming48V => self.incoming_voltage = Scale::Volts.apply(raw),
                Field::Psu5V => self.psu_voltage = Scale::Volts.apply(raw),
                Field::PsuTemp => self.psu_temp = Scale::Temperature.apply(raw),
                Field::PcbTemp => self.pcb_temp = Scale::Temperature.apply(raw),
                Field::OutsideTemp => self.outside_temp = Scale::Temperature.apply(raw),
                Field::Status => self.status = StatusCode::from_raw(raw),
                Field::Lights => self.lights = Lights::from_raw(raw),
                Field::SenseTemp(n) => {
                    self.sensor_temps.insert(n, Scale::Temperature.apply(raw));
                }
                Field::PortState(n) => self.port_mut(n).set_status(raw, read_timestamp),
                Field::PortCurrent(n) => {
                    let scaled = Scale::MilliAmps.apply(raw);
                    self.port_mut(n).set_current(raw, scaled, read_timestamp);
                }
                _ => {}
            }
        }
        self.sys.readtime = Some(read_timestamp);
        Ok(())
    }

    /// Quick liveness check: read the first 16 registers and return the
    /// uptime in seconds. Pins the map revision like a full poll.
    pub fn read_uptime(&mut self) -> DeviceResult<u32> {
        let values = self.conn.read_registers(self.modbus_address, 1, 16)?;
        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::smartbox_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);
        self.sys.mbrv = mbrv;
        self.sys.pcbrv = values[1];
        // Uptime spans registers 14-15, high word first.
        self.sys.uptime = crate::transport::frame::words_to_u32(values[13], values[14]);
        Ok(self.sys.uptime)
    }

    /// Write the full threshold block from `self.thresholds`.
    pub fn write_thresholds(&mut self) -> DeviceResult<()> {
        let map = self.map.ok_or_else(no_map)?;
        let (start, block) = self.thresholds.to_block(map.conf)?;
        self.conn.write_multiple_registers(self.modbus_address, start, &block)?;
        log::info!("SMARTbox {}: wrote thresholds", self.modbus_address);
        Ok(())
    }

    /// Write all twelve port state words under the given per-port intents.
    pub fn write_port_states(&mut self, intents: &[WriteIntent; 12]) -> DeviceResult<()> {
        let map = self.map.ok_or_else(no_map)?;
        let first = registers::find_poll_field(map, Field::PortState(1))
            .ok_or_else(|| DeviceError::Config("map has no port state registers".into()))?;
        let words: Vec<u16> = self
            .ports
            .iter()
            .zip(intents.iter())
            .map(|(port, &intent)| port.to_write_word(intent))
            .collect();
        self.conn.write_multiple_registers(self.modbus_address, first.number, &words)?;
        log::info!("SMARTbox {}: wrote port configuration", self.modbus_address);
        Ok(())
    }

    /// Write the desired-state fields of every port (no overrides, no
    /// breaker resets).
    pub fn write_portconfig(&mut self) -> DeviceResult<()> {
        self.write_port_states(&[WriteIntent::state_only(); 12])
    }

    /// Apply a low-pass smoothing constant, derived from `cutoff_hz`, to
    /// every analog sensor register. A write to a sensor register sets its
    /// filter constant rather than the reading.
    pub fn set_smoothing(&mut self, cutoff_hz: f64) -> DeviceResult<()> {
        let constant = sampling::filter_constant(cutoff_hz);
        for &reg in registers::SMARTBOX_SMOOTHED_REGISTERS {
            self.conn.write_register(self.modbus_address, reg, constant)?;
        }
        Ok(())
    }

    /// Full configuration sequence: thresholds, sensor smoothing, port
    /// configuration, then `SYS_STATUS <- 1` to leave UNINITIALISED.
    ///
    /// Each step must succeed before the next is attempted. `None`
    /// arguments keep the values already held on the instance.
    pub fn configure(
        &mut self,
        thresholds: Option<Thresholds>,
        portconfig: Option<PortConfig>,
        filter_cutoff_hz: Option<f64>,
    ) -> DeviceResult<()> {
        if let Some(t) = thresholds {
            self.thresholds = t;
        }
        if let Some(p) = portconfig {
            self.portconfig = p;
        }
        let map = self.map.ok_or_else(no_map)?;

        self.write_thresholds()?;

        match filter_cutoff_hz {
            Some(freq) => {
                log::info!(
                    "SMARTbox {}: smoothing all sensors with a {freq:.1} Hz cutoff",
                    self.modbus_address
                );
                self.set_smoothing(freq)?;
            }
            None => log::info!("SMARTbox {}: sensor low-pass smoothing disabled", self.modbus_address),
        }

        for (port, &(online, offline)) in self.ports.iter_mut().zip(self.portconfig.iter()) {
            port.desire_enabled_online = Tristate::from_bool(online);
            port.desire_enabled_offline = Tristate::from_bool(offline);
        }
        self.write_portconfig()?;

        let status_reg = registers::find_poll_field(map, Field::Status)
            .ok_or_else(|| DeviceError::Config("map has no SYS_STATUS register".into()))?;
        self.conn.write_register(self.modbus_address, status_reg.number, 1)?;
        Ok(())
    }

    /// Reset the microcontroller through the command envelope.
    pub fn reset(&self) -> Result<(), crate::command::CommandError> {
        envelope::reset_microcontroller(&self.conn, self.modbus_address)
    }

    /// Rapid-sample `reglist` every `interval_ms` milliseconds until the
    /// on-device buffer fills, then read it back de-interleaved.
    pub fn get_sample(
        &self,
        interval_ms: u32,
        reglist: &[u16],
    ) -> Result<BTreeMap<u16, Vec<u16>>, crate::command::CommandError> {
        sampling::get_sample(&self.conn, self.modbus_address, interval_ms, reglist, Duration::from_millis(500))
    }

    /// Run [`SmartBox::get_sample`] and save the result as CSV, one column
    /// per sampled register, headed by the register names.
    pub fn save_sample(
        &self,
        interval_ms: u32,
        reglist: &[u16],
        path: &std::path::Path,
    ) -> Result<(), crate::command::CommandError> {
        let data = self.get_sample(interval_ms, reglist)?;
        let poll = self.map.map_or(registers::SMARTBOX_POLL_1, |m| m.poll);
        let name_of = |regnum: u16| {
            poll.iter()
                .find(|d| d.number == regnum)
                .map_or_else(|| format!("REG_{regnum}"), |d| d.name.to_string())
        };
        let mut out = String::new();
        let header: Vec<String> = reglist.iter().map(|&r| name_of(r)).collect();
        out.push_str(&header.join(", "));
        out.push('\n');
        let rows = data.get(&reglist[0]).map_or(0, Vec::len);
        for i in 0..rows {
            let row: Vec<String> = reglist
                .iter()
                .map(|r| data.get(r).and_then(|v| v.get(i)).map_or_else(String::new, u16::to_string))
                .collect();
            out.push_str(&row.join(", "));
            out.push('\n');
        }
        std::fs::write(path, out).map_err(crate::command::CommandError::from)
    }
}

fn no_map() -> DeviceError {
    DeviceError::Config("no register map, poll the device first".into())
}

impl fmt::Display for SmartBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = self.sys.readtime.map_or(f64::NAN, |t| unix_now() - t);
        writeln!(f, "SMARTbox at address: {} as of {age:.0}s ago:", self.modbus_address)?;
        writeln!(f, "    ModBUS register revision: {}", self.sys.mbrv)?;
        writeln!(f, "    PCB revision: {}", self.sys.pcbrv)?;
        writeln!(f, "    CPU ID: {}", self.sys.cpuid_hex())?;
        writeln!(f, "    CHIP ID: {}", self.sys.chipid_hex())?;
        writeln!(f, "    Firmware revision: {}", self.sys.firmware_version)?;
        writeln!(f, "    Uptime: {} seconds", self.sys.uptime)?;
        writeln!(f, "    48V In: {:4.2} V", self.incoming_voltage)?;
        writeln!(f, "    5V out: {:4.2} V", self.psu_voltage)?;
        writeln!(f, "    PSU Temp: {:4.2} deg C", self.psu_temp)?;
        writeln!(f, "    PCB Temp: {:4.2} deg C", self.pcb_temp)?;
        writeln!(f, "    Outside Temp: {:4.2} deg C", self.outside_temp)?;
        writeln!(f, "    Status: {} ({})", self.status.as_i8(), self.status)?;
        writeln!(f, "    Service LED: {}", self.lights.service_led)?;
        write!(f, "    Indicator: {} ({})", self.lights.indicator.as_i8(), self.lights.indicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimSmartBox};
    use crate::transport::loopback_pair;

    fn harness(address: u8) -> (Arc<Connection>, crate::sim::SimBusHandle) {
        let (master, slave) = loopback_pair();
        let mut bus = SimBus::new(Box::new(slave));
        bus.add_smartbox(SimSmartBox::new(address), None);
        let handle = bus.spawn();
        (Arc::new(Connection::new(Box::new(master))), handle)
    }

    #[test]
    fn poll_decodes_the_whole_block() {
        let (conn, mut handle) = harness(2);
        let mut smartbox = SmartBox::new(conn, 2);
        smartbox.poll_data().unwrap();

        assert_eq!(smartbox.sys.mbrv, 1);
        assert_eq!(smartbox.incoming_voltage, 47.9);
        assert_eq!(smartbox.psu_voltage, 5.1);
        assert_eq!(smartbox.psu_temp, 45.0);
        assert_eq!(smartbox.status, StatusCode::Uninitialised);
        assert_eq!(smartbox.sensor_temps.len(), 12);
        assert_eq!(smartbox.sensor_temps[&1], 15.01);
        // 16 chip id bytes rendered as ASCII hex.
        assert_eq!(smartbox.sys.chipid_hex().len(), 32);
        assert!(smartbox.sys.chipid_hex().starts_with("53424F582D53494D")); // "SBOX-SIM"
        assert!(smartbox.sys.readtime.is_some());
        handle.stop();
    }

    #[test]
    fn map_revision_is_pinned_at_first_poll() {
        let (conn, mut handle) = harness(3);
        let mut smartbox = SmartBox::new(conn, 3);
        smartbox.poll_data().unwrap();
        let first_read = smartbox.sys.readtime;

        // The device comes back claiming a different map revision; the
        // poll is rejected and the snapshot stays untouched.
        handle.boxes[0].lock().mbrv = 2;
        assert_eq!(smartbox.poll_data(), Err(DeviceError::MapUnknown(2)));
        assert_eq!(smartbox.sys.readtime, first_read);
        assert_eq!(smartbox.sys.mbrv, 1);
        handle.stop();
    }

    #[test]
    fn unknown_revision_on_first_contact_is_rejected() {
        let (conn, mut handle) = harness(4);
        handle.boxes[0].lock().mbrv = 9;
        let mut smartbox = SmartBox::new(conn, 4);
        assert_eq!(smartbox.poll_data(), Err(DeviceError::MapUnknown(9)));
        handle.stop();
    }

    #[test]
    fn configure_writes_thresholds_then_releases_the_device() {
        let (conn, mut handle) = harness(5);
        let mut smartbox = SmartBox::new(conn, 5);
        smartbox.poll_data().unwrap();

        let mut portconfig = [(false, false); 12];
        portconfig[6] = (true, false); // port 7 on while online
        smartbox.configure(None, Some(portconfig), Some(0.5)).unwrap();

        let sim = handle.boxes[0].lock();
        assert_eq!(sim.status, 0, "SYS_STATUS write should release UNINITIALISED");
        let thresholds = sim.accepted_thresholds.as_ref().unwrap();
        assert_eq!(thresholds.len(), 80);
        assert_eq!(thresholds[0], 5000); // 48 V alarm-high, hundredths
        assert!(sim.ports[6].desire_online);
        assert!(!sim.ports[0].desire_online);
        drop(sim);
        handle.stop();
    }

    #[test]
    fn read_uptime_is_a_short_read() {
        let (conn, mut handle) = harness(6);
        let mut smartbox = SmartBox::new(conn, 6);
        let uptime = smartbox.read_uptime().unwrap();
        assert!(uptime < 5);
        assert_eq!(smartbox.sys.mbrv, 1);
        handle.stop();
    }

    #[test]
    fn absent_device_reports_no_reply() {
        let (master, _slave) = loopback_pair();
        let conn = Arc::new(Connection::new(Box::new(master)));
        let mut smartbox = SmartBox::new(conn, 9);
        let err = smartbox.poll_data().unwrap_err();
        assert!(err.is_unreachable());
    }
}
