// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The FNDH: 48 V power and communications concentrator for one station.
//!
//! The FNDH carries two 48 V rails feeding 28 PDoC ports, one SMARTbox per
//! port. Its configuration runs in two phases: `configure_all_off()` puts
//! it online with every port held off (so PDoC discovery can power ports
//! one at a time), and `configure_final()` applies the persisted desired
//! state once discovery has bound ports to SMARTbox addresses.

use std::fmt;
use std::sync::Arc;

use crate::command::envelope;
use crate::transport::Connection;

use super::port::{PortStatus, Tristate, WriteIntent};
use super::registers::{self, Field, RegisterMap};
use super::scale::Scale;
use super::status::StatusCode;
use super::{decode_sys_field, unix_now, word_at, DeviceError, DeviceResult, Lights, SysBlock, Thresholds};

/// Desired port power configuration: `(enabled_online, enabled_offline)`
/// per PDoC port.
pub type PdocConfig = [(bool, bool); 28];

/// The FNDH controller on the station bus.
pub struct Fndh {
    conn: Arc<Connection>,
    /// Modbus station address (31 by convention).
    pub modbus_address: u8,
    map: Option<&'static RegisterMap>,
    /// Common system block from the last poll.
    pub sys: SysBlock,
    /// First 48 V rail voltage (Volts).
    pub psu48v1_voltage: f64,
    /// Second 48 V rail voltage (Volts).
    pub psu48v2_voltage: f64,
    /// Total 48 V bus current (Amps).
    pub psu48v_current: f64,
    /// First 48 V rail temperature (deg C).
    pub psu48v1_temp: f64,
    /// Second 48 V rail temperature (deg C).
    pub psu48v2_temp: f64,
    /// Panel temperature (deg C).
    pub panel_temp: f64,
    /// FNCB board temperature (deg C).
    pub fncb_temp: f64,
    /// FNCB relative humidity (percent).
    pub fncb_humidity: f64,
    /// System status from the last poll.
    pub status: StatusCode,
    /// Service LED and indicator state from the last poll.
    pub lights: Lights,
    /// The 28 PDoC ports, index 0 = port 1.
    pub ports: [PortStatus; 28],
    /// SMARTbox address bound to each PDoC port by startup discovery.
    pub smartbox_on_port: [Option<u8>; 28],
    /// Analog thresholds written at configuration time.
    pub thresholds: Thresholds,
    /// Desired port states applied by `configure_final()`.
    pub portconfig: PdocConfig,
}

impl Fndh {
    /// Set up an unpolled FNDH. No bus traffic happens here.
    #[must_use]
    pub fn new(conn: Arc<Connection>, modbus_address: u8) -> Self {
        Fndh {
            conn,
            modbus_address,
            map: None,
            sys: SysBlock::default(),
            psu48v1_voltage: 0.0,
            psu48v2_voltage: 0.0,
            psu48v_current: 0.0,
            psu48v1_temp: 0.0,
            psu48v2_temp: 0.0,
            panel_temp: 0.0,
            fncb_temp: 0.0,
            fncb_humidity: 0.0,
            status: StatusCode::Unknown,
            lights: Lights::default(),
            ports: std::array::from_fn(|i| PortStatus::new(i as u8 + 1, modbus_address)),
            smartbox_on_port: [None; 28],
            thresholds: Thresholds::fndh_defaults(),
            portconfig: [(false, false); 28],
        }
    }

    /// Port status by 1-based PDoC number.
    #[must_use]
    pub fn port(&self, pdoc_number: u8) -> &PortStatus {
        &self.ports[(pdoc_number - 1) as usize]
    }

    /// Mutable port status by 1-based PDoC number.
    pub fn port_mut(&mut self, pdoc_number: u8) -> &mut PortStatus {
        &mut self.ports[(pdoc_number - 1) as usize]
    }

    /// Read the whole POLL block in one transaction and decode every field.
    pub fn poll_data(&mut self) -> DeviceResult<()> {
        let poll = self.map.map_or(registers::FNDH_POLL_1, |m| m.poll);
        let block = registers::poll_block_size(poll);
        let values = self.conn.read_registers(self.modbus_address, 1, block)?;
        let read_timestamp = unix_now();

        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                log::error!(
                    "FNDH: map revision changed from {} to {mbrv}",
                    pinned.revision
                );
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::fndh_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);

        for def in map.poll {
            if decode_sys_field(&mut self.sys, def, &values) {
                continue;
            }
            let raw = word_at(&values, def);
            match def.field {
                Field::Psu48V1Voltage => self.psu48v1_voltage = Scale::Volts.apply(raw),
                Field::Psu48V2Voltage => self.psu48v2_voltage = Scale::Volts.apply(raw),
                Field::Psu48Current => self.psu48v_current = Scale::Amps.apply(raw),
                Field::Psu48V1Temp => self.psu48v1_temp = Scale::Temperature.apply(raw),
                Field::Psu48V2Temp => self.psu48v2_temp = Scale::Temperature.apply(raw),
                Field::PanelTemp => self.panel_temp = Scale::Temperature.apply(raw),
                Field::FncbTemp => self.fncb_temp = Scale::Temperature.apply(raw),
                Field::Humidity => self.fncb_humidity = Scale::None.apply(raw),
                Field::Status => self.status = StatusCode::from_raw(raw),
                Field::Lights => self.lights = Lights::from_raw(raw),
                Field::PortState(n) => self.port_mut(n).set_status(raw, read_timestamp),
                _ => {}
            }
        }
        self.sys.readtime = Some(read_timestamp);
        Ok(())
    }

    /// Write the full threshold block from `self.thresholds`.
    pub fn write_thresholds(&mut self) -> DeviceResult<()> {
        let map = self.map.ok_or_else(no_map)?;
        let (start, block) = self.thresholds.to_block(map.conf)?;
        self.conn.write_multiple_registers(self.modbus_address, start, &block)?;
        log::info!("FNDH: wrote thresholds");
        Ok(())
    }

    /// Write all 28 port state words under the given per-port intents.
    pub fn write_port_states(&mut self, intents: &[WriteIntent; 28]) -> DeviceResult<()> {
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
        log::info!("FNDH: wrote port configuration");
        Ok(())
    }

    /// Write the desired-state fields of every port.
    pub fn write_portconfig(&mut self) -> DeviceResult<()> {
        self.write_port_states(&[WriteIntent::state_only(); 28])
    }

    /// Phase-one configuration: thresholds, then every PDoC port desired
    /// off, then `SYS_STATUS <- 1`. Run before PDoC discovery so no box
    /// draws power unexpectedly.
    pub fn configure_all_off(&mut self) -> DeviceResult<()> {
        if self.map.is_none() {
            self.poll_data()?;
        }
        self.write_thresholds()?;
        for port in &mut self.ports {
            port.desire_enabled_online = Tristate::False;
            port.desire_enabled_offline = Tristate::False;
        }
        self.write_portconfig()?;
        self.leave_uninitialised()
    }

    /// Phase-two configuration: apply the persisted desired state after
    /// discovery has finished binding ports.
    pub fn configure_final(&mut self, portconfig: Option<PdocConfig>) -> DeviceResult<()> {
        if let Some(p) = portconfig {
            self.portconfig = p;
        }
        for (port, &(online, offline)) in self.ports.iter_mut().zip(self.portconfig.iter()) {
            port.desire_enabled_online = Tristate::from_bool(online);
            port.desire_enabled_offline = Tristate::from_bool(offline);
        }
        self.write_portconfig()?;
        self.leave_uninitialised()
    }

    /// Write `SYS_STATUS <- 1` to transition out of UNINITIALISED.
    fn leave_uninitialised(&mut self) -> DeviceResult<()> {
        let map = self.map.ok_or_else(no_map)?;
        let status_reg = registers::find_poll_field(map, Field::Status)
            .ok_or_else(|| DeviceError::Config("map has no SYS_STATUS register".into()))?;
        self.conn.write_register(self.modbus_address, status_reg.number, 1)?;
        Ok(())
    }

    /// Reset the microcontroller through the command envelope.
    pub fn reset(&self) -> Result<(), crate::command::CommandError> {
        envelope::reset_microcontroller(&self.conn, self.modbus_address)
    }
}

fn no_map() -> DeviceError {
    DeviceError::Config("no register map, poll the device first".into())
}

impl fmt::Display for Fndh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = self.sys.readtime.map_or(f64::NAN, |t| unix_now() - t);
        writeln!(f, "FNDH at address: {} as of {age:.0}s ago:", self.modbus_address)?;
        writeln!(f, "    ModBUS register revision: {}", self.sys.mbrv)?;
        writeln!(f, "    CHIP ID: {}", self.sys.chipid_hex())?;
        writeln!(f, "    Uptime: {} seconds", self.sys.uptime)?;
        writeln!(f, "    48V rail 1: {:4.2} V", self.psu48v1_voltage)?;
        writeln!(f, "    48V rail 2: {:4.2} V", self.psu48v2_voltage)?;
        writeln!(f, "    48V bus current: {:4.2} A", self.psu48v_current)?;
        writeln!(f, "    Panel Temp: {:4.2} deg C", self.panel_temp)?;
        writeln!(f, "    FNCB Temp: {:4.2} deg C", self.fncb_temp)?;
        writeln!(f, "    FNCB Humidity: {:3.0} %", self.fncb_humidity)?;
        write!(f, "    Status: {} ({})", self.status.as_i8(), self.status)
    }
}
