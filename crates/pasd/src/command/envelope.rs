// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The 246-byte command buffer and its register image.
//!
//! A [`CommandFrame`] is built locally, computes its own CRC32, and is
//! transmitted as one multi-register write of the CRC plus however much of
//! the buffer the command actually uses, followed by the single-register
//! command write. The command register is always written last: the
//! firmware latches the whole buffer when it lands.

use flate2::Crc;

use crate::transport::Connection;

use super::{CommandError, CommandResult};

/// CRC32 low half.
pub const REG_CRC_LOW: u16 = 10001;
/// CRC32 high half.
pub const REG_CRC_HIGH: u16 = 10002;
/// Target address, low word.
pub const REG_ADDRESS_LOW: u16 = 10003;
/// Target address high byte, word count in the upper byte.
pub const REG_ADDRESS_HIGH_COUNT: u16 = 10004;
/// First of the 120 segment data words.
pub const REG_SEGMENT_DATA: u16 = 10005;
/// The command register; always the last register written.
pub const REG_COMMAND: u16 = 10125;
/// The result register; read after every command.
pub const REG_RESULT: u16 = 10126;
/// Scalar query replies (sample count, size, state) land here.
pub const REG_SAMPLE_INFO: u16 = 10127;

/// Size of the CRC-covered buffer in bytes.
pub const BUFFER_LEN: usize = 246;
/// Byte offset of the segment data within the buffer.
pub const SEGMENT_OFFSET: usize = 4;
/// Byte offset of the command within the buffer.
pub const COMMAND_OFFSET: usize = 244;

/// Commands served through the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    /// Erase flash and prepare for an update.
    Erase = 1,
    /// Write the segment described by the address and data words.
    WriteSegment = 2,
    /// Verify: total chunk count in the first two data words.
    Verify = 3,
    /// Commit the staged firmware image.
    Update = 4,
    /// Reset the microcontroller.
    Reset = 5,
    /// Read back ROM at the given address.
    PeekRom = 6,
    /// Begin filling the rapid-sample buffer.
    StartSample = 7,
    /// Stop sampling immediately.
    StopSample = 8,
    /// Query sampling state (0 stopped, 1 sampling).
    SampleState = 9,
    /// Query the sample buffer size in words.
    SampleSize = 10,
    /// Read a block of the sample buffer.
    SampleRead = 11,
    /// Query the number of sample sets recorded so far.
    SampleCount = 12,
}

impl Command {
    /// The value written to the command register.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Result codes from the result register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Command completed.
    Ok,
    /// Command failed.
    Error,
    /// Buffer CRC32 did not match on the device.
    CrcError,
    /// The device does not know the command.
    UnknownCommand,
    /// A value outside the documented set.
    Other(u8),
}

impl ResultCode {
    /// Decode the low byte of the result register.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ResultCode::Ok,
            1 => ResultCode::Error,
            2 => ResultCode::CrcError,
            3 => ResultCode::UnknownCommand,
            other => ResultCode::Other(other),
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "OK"),
            ResultCode::Error => write!(f, "ERROR"),
            ResultCode::CrcError => write!(f, "CRC_ERROR"),
            ResultCode::UnknownCommand => write!(f, "UNKNOWN_COMMAND"),
            ResultCode::Other(code) => write!(f, "result code {code}"),
        }
    }
}

/// One command buffer, as it will appear in registers 10003..10125.
///
/// Bytes are little-endian within each register. The command byte lives at
/// offset 244 and is covered by the CRC even though it is transmitted
/// through its own register write.
pub struct CommandFrame {
    buf: [u8; BUFFER_LEN],
    command: Command,
}

impl CommandFrame {
    /// A zeroed buffer for `command`.
    #[must_use]
    pub fn new(command: Command) -> Self {
        let mut buf = [0u8; BUFFER_LEN];
        buf[COMMAND_OFFSET] = command.as_u16() as u8;
        CommandFrame { buf, command }
    }

    /// The command this frame carries.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command
    }

    /// Set the two address words (bytes 0..4, little-endian per word).
    pub fn set_address_words(&mut self, address_low: u16, address_high_count: u16) {
        self.buf[0] = (address_low & 0xFF) as u8;
        self.buf[1] = (address_low >> 8) as u8;
        self.buf[2] = (address_high_count & 0xFF) as u8;
        self.buf[3] = (address_high_count >> 8) as u8;
    }

    /// The 240 segment data bytes (buffer offsets 4..244).
    pub fn segment_mut(&mut self) -> &mut [u8] {
        &mut self.buf[SEGMENT_OFFSET..COMMAND_OFFSET]
    }

    /// CRC32 (IEEE 802.3, reflected) over the whole 246-byte buffer.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        let mut crc = Crc::new();
        crc.update(&self.buf);
        crc.sum()
    }

    /// The register values for the bulk write at [`REG_CRC_LOW`]: the two
    /// CRC words followed by the first `payload_words` buffer words.
    #[must_use]
    pub fn registers(&self, payload_words: usize) -> Vec<u16> {
        let crc = self.crc32();
        let mut regs = Vec::with_capacity(2 + payload_words);
        regs.push((crc & 0xFFFF) as u16);
        regs.push((crc >> 16) as u16);
        for i in 0..payload_words {
            let lo = u16::from(self.buf[i * 2]);
            let hi = u16::from(self.buf[i * 2 + 1]);
            regs.push(lo | (hi << 8));
        }
        regs
    }

    /// Transmit the bulk payload then the command register.
    pub fn send(&self, conn: &Connection, modbus_address: u8, payload_words: usize) -> CommandResult<()> {
        conn.write_multiple_registers(modbus_address, REG_CRC_LOW, &self.registers(payload_words))?;
        conn.write_register(modbus_address, REG_COMMAND, self.command.as_u16())?;
        Ok(())
    }
}

/// Read the result register; the code travels in its low byte.
pub fn read_result(conn: &Connection, modbus_address: u8) -> CommandResult<ResultCode> {
    let regs = conn.read_registers(modbus_address, REG_RESULT, 1)?;
    Ok(ResultCode::from_raw((regs[0] & 0xFF) as u8))
}

/// Send a frame and require an OK result, naming `step` on failure.
pub fn execute(
    conn: &Connection,
    modbus_address: u8,
    frame: &CommandFrame,
    payload_words: usize,
    step: &'static str,
) -> CommandResult<()> {
    log::debug!("issuing {step} command to station {modbus_address}");
    frame.send(conn, modbus_address, payload_words)?;
    match read_result(conn, modbus_address)? {
        ResultCode::Ok => Ok(()),
        code => Err(CommandError::Failed { step, code }),
    }
}

/// Reset the microcontroller. Fire-and-forget: the device reboots rather
/// than reporting a result.
pub fn reset_microcontroller(conn: &Connection, modbus_address: u8) -> CommandResult<()> {
    log::debug!("issuing reset command to station {modbus_address}");
    let frame = CommandFrame::new(Command::Reset);
    frame.send(conn, modbus_address, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// zlib CRC32 of 246 zero bytes except a trailing command byte; checked
    /// against the reference implementation the firmware uses.
    #[test]
    fn crc_over_zeroed_buffer_with_command() {
        let frame = CommandFrame::new(Command::Erase);
        let mut reference = Crc::new();
        let mut buf = [0u8; BUFFER_LEN];
        buf[COMMAND_OFFSET] = 1;
        reference.update(&buf);
        assert_eq!(frame.crc32(), reference.sum());
    }

    #[test]
    fn every_byte_toggles_the_crc() {
        let base = CommandFrame::new(Command::StartSample).crc32();
        for offset in 0..BUFFER_LEN {
            let mut frame = CommandFrame::new(Command::StartSample);
            frame.buf[offset] ^= 0xA5;
            assert_ne!(frame.crc32(), base, "byte {offset} did not affect the CRC");
        }
    }

    #[test]
    fn command_byte_is_covered_by_crc() {
        assert_ne!(CommandFrame::new(Command::Erase).crc32(), CommandFrame::new(Command::Update).crc32());
    }

    #[test]
    fn registers_are_little_endian_words() {
        let mut frame = CommandFrame::new(Command::WriteSegment);
        frame.set_address_words(0x1234, 0x5678);
        frame.segment_mut()[0] = 0xAB;
        frame.segment_mut()[1] = 0xCD;
        let regs = frame.registers(3);
        let crc = frame.crc32();
        assert_eq!(regs[0], (crc & 0xFFFF) as u16);
        assert_eq!(regs[1], (crc >> 16) as u16);
        assert_eq!(regs[2], 0x1234);
        assert_eq!(regs[3], 0x5678);
        assert_eq!(regs[4], 0xCDAB);
    }

    #[test]
    fn result_codes() {
        assert_eq!(ResultCode::from_raw(0), ResultCode::Ok);
        assert_eq!(ResultCode::from_raw(2), ResultCode::CrcError);
        assert_eq!(ResultCode::from_raw(9), ResultCode::Other(9));
    }
}
