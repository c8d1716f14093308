// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated SMARTbox, including the command envelope and the
//! rapid-sampling buffer.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use flate2::Crc;

use crate::command::envelope::{
    BUFFER_LEN, COMMAND_OFFSET, REG_COMMAND, REG_CRC_HIGH, REG_CRC_LOW, REG_RESULT,
    REG_SAMPLE_INFO,
};
use crate::device::registers::{self, Field};
use crate::transport::RegisterView;

use super::fndh::SimPort;
use super::{apply_desire_bits, SimDevice};

/// Commands that carry a CRC-protected payload buffer.
const PAYLOAD_COMMANDS: [u16; 6] = [1, 2, 3, 4, 5, 7];

struct SampleJob {
    reglist: Vec<u16>,
    data: Vec<u16>,
}

/// A simulated SMARTbox serving register map revision 1.
pub struct SimSmartBox {
    /// Modbus station address.
    pub modbus_address: u8,
    /// Map revision reported in register 1 (bench knob for pinning tests).
    pub mbrv: u16,
    /// System status code register value (starts UNINITIALISED).
    pub status: u16,
    /// SYS_LIGHTS register value.
    pub lights: u16,
    /// The twelve FEM ports.
    pub ports: [SimPort; 12],
    /// Heard from the MCCS at all.
    pub online: bool,
    /// Every envelope command executed, in order.
    pub commands: Vec<u16>,
    /// Chunk count carried by the last VERIFY.
    pub verify_chunk_count: Option<u32>,
    /// WRITE_SEGMENT commands accepted since the last ERASE.
    pub write_segment_count: u32,
    /// The raw threshold block most recently written (80 words).
    pub accepted_thresholds: Option<Vec<u16>>,
    /// Capacity of the simulated sample buffer, in words.
    pub sample_buffer_words: u16,
    /// How many port-state block writes have landed.
    pub port_state_writes: u32,
    /// The port words carried by the most recent port-state write.
    pub last_port_words: Option<Vec<u16>>,
    /// Ports (1-based) that received a breaker-reset bit, in write order.
    pub breaker_resets: Vec<u8>,
    chipid: [u8; 16],
    boot_delay: Duration,
    powered_at: Option<Instant>,
    cmd_regs: BTreeMap<u16, u16>,
    sample: Option<SampleJob>,
}

impl SimSmartBox {
    /// A powered, booted, uninitialised SMARTbox.
    #[must_use]
    pub fn new(modbus_address: u8) -> Self {
        let mut chipid = *b"SBOX-SIM-0000000";
        chipid[15] = b'0' + modbus_address % 10;
        SimSmartBox {
            modbus_address,
            mbrv: 1,
            status: 4,
            lights: 0,
            ports: [SimPort::default(); 12],
            online: false,
            commands: Vec::new(),
            verify_chunk_count: None,
            write_segment_count: 0,
            accepted_thresholds: None,
            sample_buffer_words: 200,
            port_state_writes: 0,
            last_port_words: None,
            breaker_resets: Vec::new(),
            chipid,
            boot_delay: Duration::ZERO,
            powered_at: Some(Instant::now()),
            cmd_regs: BTreeMap::new(),
            sample: None,
        }
    }

    /// Boot this long after power arrives before answering the bus.
    #[must_use]
    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Apply or remove power. Removing power cold-boots the box: next
    /// power-up it comes back UNINITIALISED after the boot delay.
    pub fn set_powered(&mut self, on: bool) {
        match (on, self.powered_at) {
            (true, None) => self.powered_at = Some(Instant::now()),
            (false, Some(_)) => {
                self.powered_at = None;
                self.status = 4;
                self.online = false;
            }
            _ => {}
        }
    }

    fn uptime(&self) -> u32 {
        self.powered_at
            .map(|t| t.elapsed().saturating_sub(self.boot_delay))
            .map_or(0, |d| d.as_secs() as u32)
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
            word |= 1 << 15;
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
            word |= 1 << 6;
        }
        word
    }

    // ------------------------------------------------------------------
    // Command envelope
    // ------------------------------------------------------------------

    /// Reassemble the 246-byte buffer image from the written registers.
    fn buffer_image(&self) -> [u8; BUFFER_LEN] {
        let mut buf = [0u8; BUFFER_LEN];
        for i in 0..(COMMAND_OFFSET / 2) {
            let word = self.cmd_regs.get(&(10003 + i as u16)).copied().unwrap_or(0);
            buf[i * 2] = (word & 0xFF) as u8;
            buf[i * 2 + 1] = (word >> 8) as u8;
        }
        buf[COMMAND_OFFSET] =
            (self.cmd_regs.get(&REG_COMMAND).copied().unwrap_or(0) & 0xFF) as u8;
        buf
    }

    fn buffer_crc_matches(&self) -> bool {
        let mut crc = Crc::new();
        crc.update(&self.buffer_image());
        let local = crc.sum();
        let low = self.cmd_regs.get(&REG_CRC_LOW).copied().unwrap_or(0);
        let high = self.cmd_regs.get(&REG_CRC_HIGH).copied().unwrap_or(0);
        local == (u32::from(high) << 16) | u32::from(low)
    }

    fn execute_command(&mut self, command: u16) {
        self.commands.push(command);
        let result = self.run_command(command);
        self.cmd_regs.insert(REG_RESULT, result);
        // The buffer is consumed by the command; a fresh one starts zeroed.
        if PAYLOAD_COMMANDS.contains(&command) {
            for reg in 10003..REG_COMMAND {
                self.cmd_regs.remove(&reg);
            }
        }
    }

    fn run_command(&mut self, command: u16) -> u16 {
        if PAYLOAD_COMMANDS.contains(&command) && !self.buffer_crc_matches() {
            return 2; // CRC_ERROR
        }
        let buf = self.buffer_image();
        match command {
            1 => {
                self.write_segment_count = 0;
                0
            }
            2 => {
                self.write_segment_count += 1;
                0
            }
            3 => {
                let expected = u32::from(buf[4])
                    | (u32::from(buf[5]) << 8)
                    | (u32::from(buf[6]) << 16)
                    | (u32::from(buf[7]) << 24);
                self.verify_chunk_count = Some(expected);
                u16::from(expected != self.write_segment_count)
            }
            4 => 0,
            5 => {
                self.status = 4;
                0
            }
            7 => {
                let count = usize::from(buf[4]) | (usize::from(buf[5]) << 8);
                let reglist: Vec<u16> = (0..count)
                    .map(|i| u16::from(buf[6 + i * 2]) | (u16::from(buf[7 + i * 2]) << 8))
                    .collect();
                if reglist.is_empty() {
                    return 1;
                }
                let sets = self.sample_buffer_words as usize / reglist.len();
                let mut data = Vec::with_capacity(sets * reglist.len());
                for set in 0..sets {
                    for (i, &regnum) in reglist.iter().enumerate() {
                        data.push(regnum.wrapping_mul(7).wrapping_add((set * 3 + i) as u16));
                    }
                }
                self.sample = Some(SampleJob { reglist, data });
                0
            }
            8 => 0,
            9 => {
                let state = u16::from(self.sample.is_some());
                self.cmd_regs.insert(REG_SAMPLE_INFO, state);
                0
            }
            10 => {
                self.cmd_regs.insert(REG_SAMPLE_INFO, self.sample_buffer_words);
                0
            }
            11 => self.serve_sample_read(),
            12 => {
                let sets = self
                    .sample
                    .as_ref()
                    .map_or(0, |job| job.data.len() / job.reglist.len());
                self.cmd_regs.insert(REG_SAMPLE_INFO, sets as u16);
                0
            }
            _ => 3, // UNKNOWN_COMMAND
        }
    }

    /// Stage a SAMPLE_READ reply block: echo words, data, then the CRC
    /// over the echo + data region.
    fn serve_sample_read(&mut self) -> u16 {
        let start = self.cmd_regs.get(&(REG_COMMAND - 2)).copied().unwrap_or(0) as usize;
        let count = self.cmd_regs.get(&(REG_COMMAND - 1)).copied().unwrap_or(0) as usize;
        let Some(job) = &self.sample else { return 1 };
        if start + count > job.data.len() || count > 100 {
            return 1;
        }
        let data: Vec<u16> = job.data[start..start + count].to_vec();

        self.cmd_regs.insert(10003, start as u16);
        self.cmd_regs.insert(10004, count as u16);
        let mut bytes = Vec::with_capacity((2 + count) * 2);
        for word in [start as u16, count as u16].iter().chain(data.iter()) {
            bytes.push((word & 0xFF) as u8);
            bytes.push((word >> 8) as u8);
        }
        for (i, &word) in data.iter().enumerate() {
            self.cmd_regs.insert(10005 + i as u16, word);
        }
        let mut crc = Crc::new();
        crc.update(&bytes);
        let sum = crc.sum();
        self.cmd_regs.insert(REG_CRC_LOW, (sum & 0xFFFF) as u16);
        self.cmd_regs.insert(REG_CRC_HIGH, (sum >> 16) as u16);
        0
    }
}

impl SimDevice for SimSmartBox {
    fn address(&self) -> u8 {
        self.modbus_address
    }

    fn responds(&self) -> bool {
        self.powered_at.is_some_and(|t| t.elapsed() >= self.boot_delay)
    }

    fn build_view(&mut self) -> RegisterView {
        self.recompute_power();
        let mut view = RegisterView::new();
        for def in registers::SMARTBOX_POLL_1 {
            match def.field {
                Field::Mbrv => view.insert(def.number, self.mbrv),
                Field::PcbRev => view.insert(def.number, 1),
                Field::CpuId => view.insert_run(def.number, &[0x0001, 0x86A1]),
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
                    let uptime = self.uptime();
                    view.insert_run(def.number, &[(uptime >> 16) as u16, (uptime & 0xFFFF) as u16]);
                }
                Field::AddressEcho => view.insert(def.number, u16::from(self.modbus_address)),
                Field::Incoming48V => view.insert(def.number, 4790),
                Field::Psu5V => view.insert(def.number, 510),
                Field::PsuTemp => view.insert(def.number, 4500),
                Field::PcbTemp => view.insert(def.number, 3800),
                Field::OutsideTemp => view.insert(def.number, 3400),
                Field::Status => view.insert(def.number, self.status),
                Field::Lights => view.insert(def.number, self.lights),
                Field::SenseTemp(n) => view.insert(def.number, 1500 + u16::from(n)),
                Field::PortState(n) => {
                    let word = self.port_state_word(&self.ports[(n - 1) as usize]);
                    view.insert(def.number, word);
                }
                Field::PortCurrent(n) => {
                    let on = self.ports[(n - 1) as usize].power;
                    view.insert(def.number, if on { 50 } else { 0 });
                }
                _ => {}
            }
        }
        // Threshold registers accept writes and read back zero.
        for regnum in 1001..=1080u16 {
            view.insert(regnum, 0);
        }
        // Command envelope registers.
        for regnum in REG_CRC_LOW..=REG_SAMPLE_INFO {
            view.insert(regnum, self.cmd_regs.get(&regnum).copied().unwrap_or(0));
        }
        view
    }

    fn apply(&mut self, view: &RegisterView, read: &BTreeSet<u16>, written: &BTreeSet<u16>) {
        if !read.is_empty() || !written.is_empty() {
            self.online = true;
        }

        let mut port_words: Vec<u16> = Vec::new();
        for def in registers::SMARTBOX_POLL_1 {
            if let Field::PortState(n) = def.field {
                if written.contains(&def.number) {
                    let Some(word) = view.get(def.number) else { continue };
                    port_words.push(word);
                    if word & 0x0080 != 0 {
                        self.breaker_resets.push(n);
                    }
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
                self.status = 0;
            } else if def.field == Field::Lights && written.contains(&def.number) {
                self.lights = view.get(def.number).unwrap_or(0);
            }
        }

        if !port_words.is_empty() {
            self.port_state_writes += 1;
            self.last_port_words = Some(port_words);
        }

        if written.iter().any(|r| (1001..=1080).contains(r)) {
            let block: Vec<u16> = (1001..=1080u16).map(|r| view.get(r).unwrap_or(0)).collect();
            self.accepted_thresholds = Some(block);
        }

        for &regnum in written.iter().filter(|r| (REG_CRC_LOW..=REG_SAMPLE_INFO).contains(r)) {
            if let Some(value) = view.get(regnum) {
                self.cmd_regs.insert(regnum, value);
            }
        }
        if written.contains(&REG_COMMAND) {
            let command = view.get(REG_COMMAND).unwrap_or(0);
            self.execute_command(command);
        }

        self.recompute_power();
    }
}
