// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rapid sampling through the command envelope.
//!
//! START_SAMPLE hands the device a sampling interval and a register list;
//! the firmware then fills an internal word buffer with interleaved
//! readings. SAMPLE_COUNT polls progress, and SAMPLE_READ drains the
//! buffer in 100-word blocks through a 104-register reply window:
//!
//! ```text
//! 10001-10002  CRC32 over the echo + data region (little-endian halves)
//! 10003        start address echo
//! 10004        word count echo
//! 10005-10104  up to 100 data words
//! ```
//!
//! The CRC is recomputed locally over the 4 echo bytes plus the data bytes
//! (little-endian within each register); a mismatch aborts the readout.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use flate2::Crc;

use crate::transport::Connection;

use super::envelope::{
    execute, read_result, Command, CommandFrame, ResultCode, REG_COMMAND, REG_CRC_LOW,
    REG_SAMPLE_INFO,
};
use super::{CommandError, CommandResult};

/// Words fetched per SAMPLE_READ block.
pub const READ_CHUNK_WORDS: usize = 100;

/// Firmware ADC tick assumed when deriving smoothing constants.
const FILTER_TICK_SECONDS: f64 = 0.001;

/// Low-pass smoothing coefficient for a cutoff frequency, as the Q16 value
/// written to a sensor register: `round(65536 * exp(-2 pi f dt))` at the
/// firmware's 1 ms ADC tick, saturating at 0xFFFF.
#[must_use]
pub fn filter_constant(cutoff_hz: f64) -> u16 {
    let k = (-2.0 * std::f64::consts::PI * cutoff_hz * FILTER_TICK_SECONDS).exp();
    let q16 = (k * 65536.0).round();
    if q16 >= 65535.0 {
        0xFFFF
    } else if q16 <= 0.0 {
        0
    } else {
        q16 as u16
    }
}

/// Start sampling `reglist` every `interval_ms` milliseconds into the
/// on-device buffer.
pub fn start_sample(
    conn: &Connection,
    modbus_address: u8,
    interval_ms: u32,
    reglist: &[u16],
) -> CommandResult<()> {
    let mut frame = CommandFrame::new(Command::StartSample);
    // The "address" words carry the 32-bit sampling interval here.
    frame.set_address_words((interval_ms & 0xFFFF) as u16, (interval_ms >> 16) as u16);
    {
        let segment = frame.segment_mut();
        segment[0] = (reglist.len() & 0xFF) as u8;
        segment[1] = (reglist.len() >> 8) as u8;
        for (i, &regnum) in reglist.iter().enumerate() {
            segment[2 + i * 2] = (regnum & 0xFF) as u8;
            segment[3 + i * 2] = (regnum >> 8) as u8;
        }
    }
    // Address words, register count word, then one word per register.
    let payload_words = 3 + reglist.len();
    execute(conn, modbus_address, &frame, payload_words, "START_SAMPLE")?;
    log::info!(
        "station {modbus_address}: sampling {reglist:?} every {interval_ms} ms"
    );
    Ok(())
}

/// A query command carries no payload: bare command write, then the result
/// register.
fn bare_command(conn: &Connection, modbus_address: u8, command: Command, step: &'static str) -> CommandResult<()> {
    conn.write_register(modbus_address, REG_COMMAND, command.as_u16())?;
    match read_result(conn, modbus_address)? {
        ResultCode::Ok => Ok(()),
        code => Err(CommandError::Failed { step, code }),
    }
}

/// Read the scalar reply register that follows a query command.
fn sample_info(conn: &Connection, modbus_address: u8) -> CommandResult<u16> {
    Ok(conn.read_registers(modbus_address, REG_SAMPLE_INFO, 1)?[0])
}

/// Stop sampling immediately.
pub fn stop_sample(conn: &Connection, modbus_address: u8) -> CommandResult<()> {
    bare_command(conn, modbus_address, Command::StopSample, "STOP_SAMPLE")
}

/// Sampling state: 0 stopped, 1 sampling.
pub fn sample_state(conn: &Connection, modbus_address: u8) -> CommandResult<u16> {
    bare_command(conn, modbus_address, Command::SampleState, "SAMPLE_STATE")?;
    Ok(sample_info(conn, modbus_address)? & 0xFF)
}

/// Total words available in the sample buffer.
pub fn sample_size(conn: &Connection, modbus_address: u8) -> CommandResult<u16> {
    bare_command(conn, modbus_address, Command::SampleSize, "SAMPLE_SIZE")?;
    sample_info(conn, modbus_address)
}

/// Number of sample sets recorded so far.
pub fn sample_count(conn: &Connection, modbus_address: u8) -> CommandResult<u16> {
    bare_command(conn, modbus_address, Command::SampleCount, "SAMPLE_COUNT")?;
    sample_info(conn, modbus_address)
}

/// Read `total_words` of sampled data back in 100-word blocks and
/// de-interleave per register.
pub fn read_sample_data(
    conn: &Connection,
    modbus_address: u8,
    reglist: &[u16],
    sample_sets: u16,
) -> CommandResult<BTreeMap<u16, Vec<u16>>> {
    let total_words = sample_sets as usize * reglist.len();
    let mut raw: Vec<u16> = Vec::with_capacity(total_words);

    let mut start = 0usize;
    while start < total_words {
        let n = READ_CHUNK_WORDS.min(total_words - start);
        raw.extend(read_block(conn, modbus_address, start as u16, n as u16)?);
        start += n;
    }

    let mut out = BTreeMap::new();
    for (i, &regnum) in reglist.iter().enumerate() {
        let series: Vec<u16> = raw.iter().skip(i).step_by(reglist.len()).copied().collect();
        out.insert(regnum, series);
    }
    Ok(out)
}

/// Fetch one SAMPLE_READ block and verify its CRC and echo.
fn read_block(
    conn: &Connection,
    modbus_address: u8,
    start_address: u16,
    count: u16,
) -> CommandResult<Vec<u16>> {
    // Start address, word count and the read command land in 10123..10125;
    // the command register is the last of the three.
    conn.write_multiple_registers(
        modbus_address,
        REG_COMMAND - 2,
        &[start_address, count, Command::SampleRead.as_u16()],
    )?;
    match read_result(conn, modbus_address)? {
        ResultCode::Ok => {}
        code => return Err(CommandError::Failed { step: "SAMPLE_READ", code }),
    }

    // 2 CRC words + 2 echo words + the data words.
    let regs = conn.read_registers(modbus_address, REG_CRC_LOW, 4 + count)?;
    let crc_low = regs[0];
    let crc_high = regs[1];
    let echoed = (regs[2], regs[3]);
    if echoed != (start_address, count) {
        log::error!("sample read echoed {echoed:?}, requested ({start_address}, {count})");
        return Err(CommandError::ReadbackMismatch {
            requested: (start_address, count),
            echoed,
        });
    }

    // CRC runs over the echo and data registers, little-endian per word.
    let mut bytes = Vec::with_capacity((2 + count as usize) * 2);
    for &word in &regs[2..] {
        bytes.push((word & 0xFF) as u8);
        bytes.push((word >> 8) as u8);
    }
    let mut crc = Crc::new();
    crc.update(&bytes);
    let local = crc.sum();
    let device = (u32::from(crc_high) << 16) | u32::from(crc_low);
    if local != device {
        log::error!("sample read CRC mismatch: device 0x{device:08X}, local 0x{local:08X}");
        return Err(CommandError::CrcMismatch { expected: device, got: local });
    }

    Ok(regs[4..].to_vec())
}

/// Start sampling, wait for the buffer to fill, and read it back.
///
/// `poll_interval` paces the SAMPLE_COUNT progress polls. The buffer is
/// full once `count >= size / reglist.len()` (multi-register captures
/// interleave, so a set consumes one word per register).
pub fn get_sample(
    conn: &Connection,
    modbus_address: u8,
    interval_ms: u32,
    reglist: &[u16],
    poll_interval: Duration,
) -> CommandResult<BTreeMap<u16, Vec<u16>>> {
    if reglist.is_empty() {
        return Err(CommandError::BadSegment("empty register list".into()));
    }
    start_sample(conn, modbus_address, interval_ms, reglist)?;
    let size = sample_size(conn, modbus_address)?;
    let sets_wanted = size / reglist.len() as u16;
    loop {
        let count = sample_count(conn, modbus_address)?;
        if count >= sets_wanted {
            log::info!("station {modbus_address}: downloading {count} sample sets");
            return read_sample_data(conn, modbus_address, reglist, count);
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_constant_monotonic_in_cutoff() {
        // Higher cutoff -> faster filter -> smaller coefficient.
        let slow = filter_constant(0.5);
        let fast = filter_constant(50.0);
        assert!(slow > fast, "{slow} vs {fast}");
    }

    #[test]
    fn filter_constant_bounds() {
        assert_eq!(filter_constant(0.0), 0xFFFF);
        assert_eq!(filter_constant(f64::INFINITY), 0);
        // 0.5 Hz at a 1 ms tick stays close to unity.
        let k = filter_constant(0.5);
        assert!(k > 65000 && k <= 65535, "{k}");
    }

    #[test]
    fn start_sample_payload_layout() {
        let mut frame = CommandFrame::new(Command::StartSample);
        frame.set_address_words((100_000u32 & 0xFFFF) as u16, (100_000u32 >> 16) as u16);
        {
            let segment = frame.segment_mut();
            segment[0] = 2;
            segment[1] = 0;
            segment[2] = 48; // register 48, LSB first
            segment[3] = 0;
            segment[4] = 49;
            segment[5] = 0;
        }
        let regs = frame.registers(5);
        assert_eq!(regs[2], (100_000u32 & 0xFFFF) as u16);
        assert_eq!(regs[3], (100_000u32 >> 16) as u16);
        assert_eq!(regs[4], 2);
        assert_eq!(regs[5], 48);
        assert_eq!(regs[6], 49);
    }
}
