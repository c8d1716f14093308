// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MCCS slave mode: answering a technician's hand-held SID.
//!
//! When a SID takes over as bus master, the station serves a synthetic
//! register view:
//!
//! ```text
//! 1..256      (smartbox_address << 8) | port_number per antenna, 0 unmapped
//! 1001        ANTNUM  - antenna number selecting service-log entries
//! 1002..1009  CHIPID  - chip id selecting service-log entries
//! 1010        LOGNUM  - log entry number, 0 = most recent
//! 1011..1133  log message text, two characters per register, null padded
//! 1134..1135  32-bit unix timestamp of the log entry
//! 1201..1228  SMARTbox address on each PDoC port, 0 unbound
//! ```
//!
//! Writes to the antenna map are validated: the non-zero values across
//! registers 1..256 must stay duplicate-free, otherwise the write is
//! answered with Illegal Data Value and the map left unchanged. Reading
//! the log text auto-advances LOGNUM; writing ANTNUM or CHIPID resets it.

use std::time::{Duration, Instant};

use crate::config::MCCS_SLAVE_ADDRESS;
use crate::device::unix_now;
use crate::transport::RegisterView;

use super::Station;

/// Antenna number register for service-log selection.
pub const ANTNUM: u16 = 1001;
/// First of the eight chip-id registers for service-log selection.
pub const CHIPID: u16 = 1002;
/// Log entry number register (0 = most recent).
pub const LOGNUM: u16 = 1010;
/// First register of the log message block.
pub const MESSAGE: u16 = 1011;
/// Registers in the log message block; the last two carry the timestamp.
pub const MESSAGE_LEN: u16 = 125;
/// First PDoC map register minus one (PDoC 1 lives at 1201).
pub const PDOC_BASE: u16 = 1200;

/// Longest log text the message block can carry (one register pair short
/// of the block for the timestamp, minus a null terminator).
pub const MAX_MESSAGE_CHARS: usize = (MESSAGE_LEN as usize - 2) * 2 - 1;

/// Source and sink for technician service-log entries.
pub trait ServiceLog: Send {
    /// Fetch the `lognum`-th most recent entry for the selected antenna
    /// and/or chip id. Returns the text and its unix timestamp.
    fn get_entry(
        &mut self,
        antenna: Option<u16>,
        chipid: Option<&[u16; 8]>,
        lognum: u16,
    ) -> (String, u32);

    /// Record an entry written by the technician.
    fn save_entry(
        &mut self,
        antenna: Option<u16>,
        chipid: Option<&[u16; 8]>,
        message: &str,
        timestamp: f64,
    );
}

/// Service log that stores nothing and serves a placeholder entry.
#[derive(Debug, Default)]
pub struct NullServiceLog;

impl ServiceLog for NullServiceLog {
    fn get_entry(&mut self, _: Option<u16>, _: Option<&[u16; 8]>, _: u16) -> (String, u32) {
        ("no service log backend attached".to_string(), 0)
    }

    fn save_entry(&mut self, antenna: Option<u16>, _: Option<&[u16; 8]>, message: &str, _: f64) {
        log::info!("service log entry for antenna {antenna:?} discarded: {message}");
    }
}

/// Per-station slave-mode cursor state.
#[derive(Debug, Default)]
pub(crate) struct SlaveState {
    /// Antenna selected by the SID (0 = none).
    pub desired_antenna: u16,
    /// Chip id selected by the SID (all-zero = none).
    pub desired_chipid: [u16; 8],
    /// Which log entry to serve next.
    pub desired_lognum: u16,
}

impl SlaveState {
    fn antenna(&self) -> Option<u16> {
        (self.desired_antenna != 0).then_some(self.desired_antenna)
    }

    fn chipid(&self) -> Option<&[u16; 8]> {
        (self.desired_chipid != [0; 8]).then_some(&self.desired_chipid)
    }
}

/// The antenna-map write rule: the non-zero values across registers
/// 1..256 must have no duplicates.
#[must_use]
pub fn validate_antenna_map(view: &RegisterView) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    for (regnum, value) in view.iter() {
        if (1..=256).contains(&regnum) && value != 0 && !seen.insert(value) {
            return false;
        }
    }
    true
}

impl Station {
    /// Serve SID packets for up to `max_time`, one packet per inner
    /// iteration so register side effects (log paging, remaps) apply
    /// between packets.
    pub fn listen(&mut self, log_book: &mut dyn ServiceLog, max_time: Duration) {
        let deadline = Instant::now() + max_time;
        while Instant::now() < deadline {
            let mut view = self.build_slave_view(log_book);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (read, written) = self.conn.listen_for_packet(
                MCCS_SLAVE_ADDRESS,
                &mut view,
                remaining,
                Some(&validate_antenna_map),
            );
            if read.is_empty() && written.is_empty() {
                continue;
            }
            self.apply_slave_outcome(log_book, &view, &read, &written);
        }
    }

    /// The synthetic register view served to the SID.
    pub(crate) fn build_slave_view(&mut self, log_book: &mut dyn ServiceLog) -> RegisterView {
        let mut view = RegisterView::new();

        // Antenna map.
        for regnum in 1..=256u16 {
            let value = self
                .antennae
                .get(&regnum)
                .map_or(0, |&(address, port)| (u16::from(address) << 8) | u16::from(port));
            view.insert(regnum, value);
        }

        // Service-log cursor registers.
        view.insert(ANTNUM, self.slave.desired_antenna);
        view.insert_run(CHIPID, &self.slave.desired_chipid);
        view.insert(LOGNUM, self.slave.desired_lognum);

        // Log message block: text, null padded, then the timestamp.
        let (text, timestamp) = log_book.get_entry(
            self.slave.antenna(),
            self.slave.chipid(),
            self.slave.desired_lognum,
        );
        let mut bytes: Vec<u8> = text.into_bytes();
        bytes.truncate(MAX_MESSAGE_CHARS);
        bytes.push(0);
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
        for i in 0..(MESSAGE_LEN - 2) {
            let word = bytes
                .get(i as usize * 2)
                .map_or(0u16, |&msb| (u16::from(msb) << 8) | u16::from(bytes.get(i as usize * 2 + 1).copied().unwrap_or(0)));
            view.insert(MESSAGE + i, word);
        }
        view.insert(MESSAGE + MESSAGE_LEN - 2, (timestamp >> 16) as u16);
        view.insert(MESSAGE + MESSAGE_LEN - 1, (timestamp & 0xFFFF) as u16);

        // PDoC -> SMARTbox map.
        for pdoc in 1..=28u16 {
            let address = self.fndh.smartbox_on_port[(pdoc - 1) as usize].map_or(0, u16::from);
            view.insert(PDOC_BASE + pdoc, address);
        }

        view
    }

    /// Fold one serviced packet's reads and writes back into station
    /// state.
    pub(crate) fn apply_slave_outcome(
        &mut self,
        log_book: &mut dyn ServiceLog,
        view: &RegisterView,
        read: &std::collections::BTreeSet<u16>,
        written: &std::collections::BTreeSet<u16>,
    ) {
        // Accepted antenna-map rewrites (the validator already passed).
        for &regnum in written.iter().filter(|&&r| (1..=256).contains(&r)) {
            let antenna = regnum;
            let Some(value) = view.get(regnum) else { continue };
            // Unhook the antenna from its old port.
            if let Some((old_address, old_port)) = self.antennae.remove(&antenna) {
                if let Some(smartbox) = self.smartboxes.get_mut(&old_address) {
                    smartbox.port_mut(old_port).antenna_number = None;
                }
            }
            if value == 0 {
                log::info!("antenna {antenna} unmapped by SID");
                continue;
            }
            let address = (value >> 8) as u8;
            let port = (value & 0xFF) as u8;
            if !(1..=12).contains(&port) || !self.smartboxes.contains_key(&address) {
                log::warn!("SID mapped antenna {antenna} to unknown SMARTbox {address} port {port}");
                continue;
            }
            if let Some(smartbox) = self.smartboxes.get_mut(&address) {
                smartbox.port_mut(port).antenna_number = Some(antenna);
            }
            self.antennae.insert(antenna, (address, port));
            log::info!("antenna {antenna} mapped to SMARTbox {address} port {port} by SID");
        }

        // Log cursor updates; a new selection restarts the paging.
        if written.contains(&ANTNUM) {
            if let Some(value) = view.get(ANTNUM) {
                if value != self.slave.desired_antenna {
                    self.slave.desired_antenna = value;
                    self.slave.desired_lognum = 0;
                }
            }
        }
        if (CHIPID..CHIPID + 8).any(|r| written.contains(&r)) {
            let mut chipid = [0u16; 8];
            for (i, slot) in chipid.iter_mut().enumerate() {
                *slot = view.get(CHIPID + i as u16).unwrap_or(0);
            }
            if chipid != self.slave.desired_chipid {
                self.slave.desired_chipid = chipid;
                self.slave.desired_lognum = 0;
            }
        }
        if written.contains(&LOGNUM) {
            if let Some(value) = view.get(LOGNUM) {
                self.slave.desired_lognum = value;
            }
        }

        if read.contains(&MESSAGE) {
            // The SID pulled a log entry; serve the next-older one next.
            self.slave.desired_lognum += 1;
        }

        if written.contains(&MESSAGE) {
            let mut bytes: Vec<u8> = Vec::with_capacity((MESSAGE_LEN as usize - 2) * 2);
            for i in 0..(MESSAGE_LEN - 2) {
                let word = view.get(MESSAGE + i).unwrap_or(0);
                bytes.push((word >> 8) as u8);
                bytes.push((word & 0xFF) as u8);
            }
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let message = String::from_utf8_lossy(&bytes[..end]).into_owned();
            log_book.save_entry(self.slave.antenna(), self.slave.chipid(), &message, unix_now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_accepts_unique_and_rejects_duplicates() {
        let mut view = RegisterView::new();
        for regnum in 1..=256u16 {
            view.insert(regnum, 0);
        }
        view.insert(1, 0x0102);
        view.insert(2, 0x0103);
        assert!(validate_antenna_map(&view));

        view.insert(9, 0x0102); // same box/port as antenna 1
        assert!(!validate_antenna_map(&view));
    }

    #[test]
    fn validator_ignores_registers_outside_the_map() {
        let mut view = RegisterView::new();
        view.insert(1, 0x0102);
        view.insert(1001, 0x0102); // ANTNUM may collide freely
        assert!(validate_antenna_map(&view));
    }

    #[test]
    fn zeros_never_collide() {
        let mut view = RegisterView::new();
        for regnum in 1..=256u16 {
            view.insert(regnum, 0);
        }
        assert!(validate_antenna_map(&view));
    }

    #[test]
    fn message_capacity() {
        // 123 text registers carry 245 characters plus the terminator.
        assert_eq!(MAX_MESSAGE_CHARS, 245);
    }
}
