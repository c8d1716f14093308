// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated FNDH.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::device::registers::{self, Field};
use crate::transport::RegisterView;

use super::{apply_desire_bits, SimDevice};

/// Simulated PDoC port state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimPort {
    /// Desired on while online.
    pub desire_online: bool,
    /// Desired on while offline.
    pub desire_offline: bool,
    /// Technician override: forced on.
    pub forced_on: bool,
    /// Technician override: forced off.
    pub forced_off: bool,
    /// Output currently switched on.
    pub power: bool,
}

/// A simulated FNDH serving register map revision 1.
pub struct SimFndh {
    /// Modbus station address.
    pub modbus_address: u8,
    /// System status code register value (starts UNINITIALISED).
    pub status: u16,
    /// SYS_LIGHTS register value.
    pub lights: u16,
    /// The 28 PDoC ports.
    pub ports: [SimPort; 28],
    /// Heard from the MCCS at all (drives the "online" view).
    pub online: bool,
    /// How many port-state block writes have landed.
    pub port_state_writes: u32,
    chipid: [u8; 16],
    started: Instant,
}

impl SimFndh {
    /// A powered, uninitialised FNDH.
    #[must_use]
    pub fn new(modbus_address: u8) -> Self {
        SimFndh {
            modbus_address,
            status: 4,
            lights: 0,
            ports: [SimPort::default(); 28],
            online: false,
            port_state_writes: 0,
            chipid: *b"FNDH-SIM-0000001",
            started: Instant::now(),
        }
    }

    /// Whether a PDoC port (1-based) currently delivers power.
    #[must_use]
    pub fn port_power(&self, pdoc: u8) -> bool {
        self.ports[(pdoc - 1) as usize].power
    }

    fn recompute_power(&mut self) {
        let healthy = self.status == 0 || self.status == 1;
        let online = self.online;
        for port in &mut self.ports {
            let wanted = (online && port.desire_online)
                || (!online && port.desire_offline)
                || port.forced_on;
            port.power = healthy && wanted && !port.forced_off;
        }
    }

    fn port_state_word(&self, port: &SimPort) -> u16 {
        let healthy = self.status == 0 || self.status == 1;
        let mut word = 0u16;
        if healthy {
            word |= 1 << 15; // system_level_enabled
        }
        if self.online {
            word |= 1 << 14;
        }
        word |= (0b10 | u16::from(port.desire_online)) << 12;
        word |= (0b10 | u16::from(port.desire_offline)) << 10;
        let override_bits: u16 = if port.forced_off {
            0b10
        } else if port.forced_on {
            0b11
        } else {
            0b01
        };
        word |= override_bits << 8;
        if port.power {
            word |= 1 << 7; // power sense follows the output
            word |= 1 << 6;
        }
        word
    }
}

impl SimDevice for SimFndh {
    fn address(&self) -> u8 {
        self.modbus_address
    }

    fn build_view(&mut self) -> RegisterView {
        self.recompute_power();
        let mut view = RegisterView::new();
        for def in registers::FNDH_POLL_1 {
            match def.field {
                Field::Mbrv => view.insert(def.number, 1),
                Field::PcbRev => view.insert(def.number, 1),
                Field::CpuId => view.insert_run(def.number, &[0x0001, 0x86A0]),
                Field::ChipId => {
                    let words: Vec<u16> = self
                        .chipid
                        .chunks_exact(2)
                        .map(|p| (u16::from(p[0]) << 8) | u16::from(p[1]))
                        .collect();
                    view.insert_run(def.number, &words);
                }
                Field::FirmwareVersion => view.insert(def.number, 1),
                Field::Uptime => {
                    let uptime = self.started.elapsed().as_secs() as u32;
                    view.insert_run(def.number, &[(uptime >> 16) as u16, (uptime & 0xFFFF) as u16]);
                }
                Field::AddressEcho => view.insert(def.number, u16::from(self.modbus_address)),
                Field::Psu48V1Voltage => view.insert(def.number, 4810),
                Field::Psu48V2Voltage => view.insert(def.number, 4820),
                Field::Psu48Current => view.insert(def.number, 1340),
                Field::Psu48V1Temp => view.insert(def.number, 5830),
                Field::Psu48V2Temp => view.insert(def.number, 5510),
                Field::PanelTemp => view.insert(def.number, 3800),
                Field::FncbTemp => view.insert(def.number, 3400),
                Field::Humidity => view.insert(def.number, 45),
                Field::Status => view.insert(def.number, self.status),
                Field::Lights => view.insert(def.number, self.lights),
                Field::PortState(n) => {
                    let word = self.port_state_word(&self.ports[(n - 1) as usize]);
                    view.insert(def.number, word);
                }
                _ => {}
            }
        }
        // Reserved registers in the 27..34 gap read back zero, and the
        // threshold registers accept writes.
        for regnum in 1..=62u16 {
            if !view.contains(regnum) {
                view.insert(regnum, 0);
            }
        }
        for regnum in 1001..=1032u16 {
            view.insert(regnum, 0);
        }
        view
    }

    fn apply(&mut self, view: &RegisterView, read: &BTreeSet<u16>, written: &BTreeSet<u16>) {
        if !read.is_empty() || !written.is_empty() {
            self.online = true;
        }

        let mut saw_port_write = false;
        for def in registers::FNDH_POLL_1 {
            if let Field::PortState(n) = def.field {
                if written.contains(&def.number) {
                    let Some(word) = view.get(def.number) else { continue };
                    saw_port_write = true;
                    let port = &mut self.ports[(n - 1) as usize];
                    apply_desire_bits(&mut port.desire_online, word, 12);
                    apply_desire_bits(&mut port.desire_offline, word, 10);
                    match (word >> 8) & 0b11 {
                        0b01 => {
                            port.forced_on = false;
                            port.forced_off = false;
                        }
                        0b10 => {
                            port.forced_on = false;
                            port.forced_off = true;
                        }
                        0b11 => {
                            port.forced_on = true;
                            port.forced_off = false;
                        }
                        _ => {}
                    }
                }
            } else if def.field == Field::Status && written.contains(&def.number) {
                // Any status write releases the UNINITIALISED state.
                self.status = 0;
            } else if def.field == Field::Lights && written.contains(&def.number) {
                self.lights = view.get(def.number).unwrap_or(0);
            }
        }
        if saw_port_write {
            self.port_state_writes += 1;
        }
        self.recompute_power();
    }
}
