// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The FNCC: communications microcontroller inside the FNDH.
//!
//! The FNCC sits (virtually) on the same shared serial bus as the
//! SMARTboxes and watches it for trouble: framing errors, and the hardware
//! timer that trips when any box holds the shared receive line low too
//! long. It is read-only from the orchestrator's point of view and is
//! consulted when SMARTbox polls start failing.

use std::fmt;
use std::sync::Arc;

use crate::command::envelope;
use crate::transport::Connection;

use super::registers::{self, Field, RegisterMap};
use super::status::FnccStatus;
use super::{decode_sys_field, unix_now, word_at, DeviceError, DeviceResult, SysBlock};

/// The FNCC on the station bus.
pub struct Fncc {
    conn: Arc<Connection>,
    /// Modbus station address (32 by convention).
    pub modbus_address: u8,
    map: Option<&'static RegisterMap>,
    /// Common system block from the last poll.
    pub sys: SysBlock,
    /// Bus health status from the last poll.
    pub status: FnccStatus,
    /// Value dialled on the FNDH 4-digit field-node switch.
    pub field_node_number: u16,
}

impl Fncc {
    /// Set up an unpolled FNCC. No bus traffic happens here.
    #[must_use]
    pub fn new(conn: Arc<Connection>, modbus_address: u8) -> Self {
        Fncc {
            conn,
            modbus_address,
            map: None,
            sys: SysBlock::default(),
            status: FnccStatus::Unknown,
            field_node_number: 0,
        }
    }

    /// Read the whole POLL block in one transaction and decode every field.
    pub fn poll_data(&mut self) -> DeviceResult<()> {
        let poll = self.map.map_or(registers::FNCC_POLL_1, |m| m.poll);
        let block = registers::poll_block_size(poll);
        let values = self.conn.read_registers(self.modbus_address, 1, block)?;
        let read_timestamp = unix_now();

        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::fncc_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);

        for def in map.poll {
            if decode_sys_field(&mut self.sys, def, &values) {
                continue;
            }
            let raw = word_at(&values, def);
            match def.field {
                Field::FnccStatus => self.status = FnccStatus::from_raw(raw),
                Field::FieldNodeNumber => self.field_node_number = raw,
                _ => {}
            }
        }
        self.sys.readtime = Some(read_timestamp);
        Ok(())
    }

    /// Reset the microcontroller through the command envelope.
    pub fn reset(&self) -> Result<(), crate::command::CommandError> {
        envelope::reset_microcontroller(&self.conn, self.modbus_address)
    }
}

impl fmt::Display for Fncc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = self.sys.readtime.map_or(f64::NAN, |t| unix_now() - t);
        writeln!(f, "FNCC at address: {} as of {age:.0}s ago:", self.modbus_address)?;
        writeln!(f, "    Status: {}", self.status)?;
        writeln!(f, "    Field Node Number: {}", self.field_node_number)?;
        writeln!(f, "    CHIP ID: {}", self.sys.chipid_hex())?;
        write!(f, "    Uptime: {} seconds", self.sys.uptime)
    }
}
