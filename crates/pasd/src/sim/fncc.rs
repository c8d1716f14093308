// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated FNCC: the bus watchdog inside the FNDH.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::device::registers::{self, Field};
use crate::transport::RegisterView;

use super::SimDevice;

/// A simulated FNCC serving register map revision 1. Read-only apart from
/// the traffic itself; the test bench sets `status` to fake bus faults.
pub struct SimFncc {
    /// Modbus station address.
    pub modbus_address: u8,
    /// Bus health status register value.
    pub status: u16,
    /// Value dialled on the FNDH field-node switch.
    pub field_node_number: u16,
    chipid: [u8; 16],
    started: Instant,
}

impl SimFncc {
    /// A healthy FNCC.
    #[must_use]
    pub fn new(modbus_address: u8) -> Self {
        SimFncc {
            modbus_address,
            status: 0,
            field_node_number: 1,
            chipid: *b"FNCC-SIM-0000001",
            started: Instant::now(),
        }
    }
}

impl SimDevice for SimFncc {
    fn address(&self) -> u8 {
        self.modbus_address
    }

    fn build_view(&mut self) -> RegisterView {
        let mut view = RegisterView::new();
        for def in registers::FNCC_POLL_1 {
            match def.field {
                Field::Mbrv => view.insert(def.number, 1),
                Field::PcbRev => view.insert(def.number, 1),
                Field::CpuId => view.insert_run(def.number, &[0x0001, 0x86A2]),
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
                Field::FnccStatus => view.insert(def.number, self.status),
                Field::FieldNodeNumber => view.insert(def.number, self.field_node_number),
                _ => {}
            }
        }
        view
    }

    fn apply(&mut self, _view: &RegisterView, _read: &BTreeSet<u16>, _written: &BTreeSet<u16>) {}
}
