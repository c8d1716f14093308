// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firmware upload over the command envelope.
//!
//! The PIC24 executes 24-bit instructions that hex files store as 4-byte
//! groups with a phantom upper byte. Three consecutive instructions
//! I0..I2, each (L, M, U), pack into five 16-bit registers:
//!
//! ```text
//! R0 = M0 | L0 << 8
//! R1 = L1 | U0 << 8
//! R2 = U1 | M1 << 8
//! R3 = M2 | L2 << 8
//! R4 = U2            (high byte unused)
//! ```
//!
//! in register little-endian terms: the packed byte stream is simply
//! L0 M0 U0 L1 M1 U1 ... laid into the segment buffer.
//!
//! A chunk carries at most 80 instructions (320 source bytes, 240 packed
//! bytes). Upload runs ERASE, one WRITE_SEGMENT per chunk, VERIFY with the
//! chunk count, UPDATE, then RESET; any non-zero result aborts with the
//! failing step named.

use crate::transport::{Connection, TransportError};

use super::envelope::{execute, read_result, Command, CommandFrame, ResultCode};
use super::{CommandError, CommandResult};

/// One contiguous run of firmware bytes from the image file.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Byte address of the run (hex-file addressing: 4 bytes per
    /// instruction, so instruction addresses advance by 2).
    pub address: u32,
    /// The run's bytes; length must be a multiple of 4 and every fourth
    /// byte is the phantom upper byte.
    pub data: Vec<u8>,
}

/// Source bytes per WRITE_SEGMENT chunk (80 instructions).
pub const CHUNK_SOURCE_BYTES: usize = 320;

/// Word (instruction-address) stride per chunk.
const CHUNK_ADDRESS_WORDS: u32 = 160;

/// Segments at or above this byte address hold the dual-partition boot
/// configuration and must never be rewritten.
pub const BOOT_CONFIG_FLOOR: u32 = 0x0100_3000;

/// Pack one chunk of source bytes into `frame`'s segment buffer and set
/// its address words. Returns the number of payload words to transmit.
fn pack_chunk(frame: &mut CommandFrame, address_words: u32, chunk: &[u8]) -> CommandResult<usize> {
    if chunk.len() % 4 != 0 {
        return Err(CommandError::BadSegment(format!(
            "chunk length {} is not a multiple of 4",
            chunk.len()
        )));
    }
    if chunk.len() > CHUNK_SOURCE_BYTES {
        return Err(CommandError::BadSegment(format!("chunk length {} exceeds 320", chunk.len())));
    }

    let mut j = 0usize;
    {
        let segment = frame.segment_mut();
        for group in chunk.chunks_exact(4) {
            segment[j] = group[0];
            segment[j + 1] = group[1];
            segment[j + 2] = group[2];
            j += 3;
        }
    }
    // Two address words precede the data; round the packed bytes up to a
    // whole word.
    let num_words = 2 + (j + 1) / 2;

    let address_low = (address_words & 0xFFFF) as u16;
    let address_high_count = ((address_words >> 16) as u16) | (((num_words as u16) - 2) << 8);
    frame.set_address_words(address_low, address_high_count);
    Ok(num_words)
}

/// Upload a firmware image and commit it, returning the number of chunks
/// written. Segments in the boot-configuration region are skipped.
pub fn upload(conn: &Connection, modbus_address: u8, segments: &[Segment]) -> CommandResult<u32> {
    log::info!("station {modbus_address}: erasing for firmware update");
    execute(conn, modbus_address, &CommandFrame::new(Command::Erase), 0, "ERASE")?;

    let mut chunks_written: u32 = 0;
    for segment in segments {
        if segment.address >= BOOT_CONFIG_FLOOR {
            log::warn!(
                "skipping segment at 0x{:07X}: boot configuration region",
                segment.address
            );
            continue;
        }
        if segment.data.len() % 4 != 0 {
            return Err(CommandError::BadSegment(format!(
                "segment at 0x{:07X} has length {}",
                segment.address,
                segment.data.len()
            )));
        }

        let mut address_words = segment.address >> 1;
        for chunk in segment.data.chunks(CHUNK_SOURCE_BYTES) {
            let mut frame = CommandFrame::new(Command::WriteSegment);
            let num_words = pack_chunk(&mut frame, address_words, chunk)?;
            log::debug!(
                "writing chunk at word address 0x{address_words:06X} ({} source bytes)",
                chunk.len()
            );
            execute(conn, modbus_address, &frame, num_words, "WRITE_SEGMENT")?;
            chunks_written += 1;
            address_words += CHUNK_ADDRESS_WORDS;
        }
    }

    log::info!("{chunks_written} chunks written, verifying");
    let mut verify = CommandFrame::new(Command::Verify);
    {
        let segment = verify.segment_mut();
        segment[0] = (chunks_written & 0xFF) as u8;
        segment[1] = ((chunks_written >> 8) & 0xFF) as u8;
        segment[2] = ((chunks_written >> 16) & 0xFF) as u8;
        segment[3] = (chunks_written >> 24) as u8;
    }
    // Two zero address words plus the two count words.
    execute(conn, modbus_address, &verify, 4, "VERIFY")?;

    log::info!("verify ok, committing update");
    execute(conn, modbus_address, &CommandFrame::new(Command::Update), 0, "UPDATE")?;

    log::info!("update ok, resetting");
    let reset = CommandFrame::new(Command::Reset);
    reset.send(conn, modbus_address, 0)?;
    // The device reboots on RESET; no answer counts as success.
    match read_result(conn, modbus_address) {
        Ok(ResultCode::Ok) | Err(CommandError::Transport(TransportError::NoReply)) => {
            Ok(chunks_written)
        }
        Ok(code) => Err(CommandError::Failed { step: "RESET", code }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_matches_the_documented_layout() {
        // Three instructions (L,M,U) = (0x01,0x02,0x03), (0x11,0x12,0x13),
        // (0x21,0x22,0x23), phantom bytes zero.
        let chunk = [
            0x01, 0x02, 0x03, 0x00, //
            0x11, 0x12, 0x13, 0x00, //
            0x21, 0x22, 0x23, 0x00,
        ];
        let mut frame = CommandFrame::new(Command::WriteSegment);
        let words = pack_chunk(&mut frame, 0x0000_1000, &chunk).unwrap();
        // 9 packed bytes round up to 5 data words, plus 2 address words.
        assert_eq!(words, 7);

        let regs = frame.registers(words);
        // regs[0..2] are the CRC words, regs[2..4] the address words.
        assert_eq!(regs[2], 0x1000);
        assert_eq!(regs[3], (words as u16 - 2) << 8);
        // R0 = M0|L0<<8 in big-endian byte terms; as a little-endian
        // register value that is L0 | M0<<8 reversed: 0x0201.
        assert_eq!(regs[4], 0x0201);
        assert_eq!(regs[5], 0x1103); // U0, L1
        assert_eq!(regs[6], 0x1312); // M1, U1
        assert_eq!(regs[7], 0x2221); // L2, M2
        assert_eq!(regs[8], 0x0023); // U2, unused high byte
    }

    #[test]
    fn full_chunk_word_count() {
        let chunk = vec![0u8; CHUNK_SOURCE_BYTES];
        let mut frame = CommandFrame::new(Command::WriteSegment);
        let words = pack_chunk(&mut frame, 0, &chunk).unwrap();
        // 240 packed bytes = 120 data words + 2 address words.
        assert_eq!(words, 122);
    }

    #[test]
    fn unaligned_chunk_rejected() {
        let mut frame = CommandFrame::new(Command::WriteSegment);
        assert!(matches!(
            pack_chunk(&mut frame, 0, &[1, 2, 3]),
            Err(CommandError::BadSegment(_))
        ));
    }

    #[test]
    fn address_words_split() {
        let mut frame = CommandFrame::new(Command::WriteSegment);
        let chunk = [0u8; 8];
        // Byte address 0x2_0000 -> word address 0x1_0000: high bit lands in
        // the high-count register's low byte.
        let words = pack_chunk(&mut frame, 0x0002_0000u32 >> 1, &chunk).unwrap();
        let regs = frame.registers(words);
        assert_eq!(regs[2], 0x0000);
        assert_eq!(regs[3] & 0x00FF, 0x0001);
    }
}
