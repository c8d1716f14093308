// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modbus-RTU transport for the shared station bus.
//!
//! One RS-485 multidrop bus per station carries every conversation: the
//! MCCS polling field devices as master, and the MCCS answering a
//! technician's hand-held SID as a slave. The bus is usually reached
//! through a TCP serial-to-Ethernet bridge in the FNDH.
//!
//! # Wire Protocol
//!
//! ```text
//! Frame = address(u8) | function(u8) | payload | crc16(2B, low byte first)
//! ```
//!
//! Functions spoken: 0x03 (read holding), 0x06 (write single), 0x10 (write
//! multiple). Errors come back as function|0x80 with an exception code.
//!
//! # Modules
//!
//! - `crc` - CRC-16/MODBUS checksums
//! - `frame` - frame assembly and parsing, byte/word helpers
//! - `link` - byte carriers (TCP bridge, in-process loopback)
//! - `view` - slave-side register views and request servicing
//! - `connection` - the serialised bus handle (master + slave roles)

pub mod connection;
pub mod crc;
pub mod frame;
pub mod link;
pub mod view;

// Re-exports
pub use connection::{Connection, TransportError, TransportResult, PACKET_WINDOW, REPLY_TIMEOUT};
pub use crc::{crc16, crc16_raw, verify_crc16};
pub use link::{loopback_pair, BusLink, LoopbackLink, TcpLink};
pub use view::{RegisterView, Validator, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

#[cfg(test)]
mod fuzz_tests {
    //! Fuzz-lite tests to ensure no panics on random/malformed input.

    use super::frame::parse_slave_request;
    use super::view::{service_request, RegisterView};

    #[test]
    fn parse_never_panics_on_random_bytes() {
        for len in 0..64usize {
            for _ in 0..200 {
                let bytes: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
                let _ = parse_slave_request(&bytes);
            }
        }
    }

    #[test]
    fn service_never_panics_on_random_frames() {
        let mut view = RegisterView::new();
        for r in 1..=64 {
            view.insert(r, r);
        }
        for _ in 0..2000 {
            let len = fastrand::usize(2..32);
            let mut bytes: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
            bytes[0] = 63;
            // Bias toward the served function codes so the deeper paths run.
            bytes[1] = *fastrand::choice(&[0x03u8, 0x06, 0x10, 0x2B]).unwrap();
            let _ = service_request(&mut view, 63, &bytes, None);
        }
    }
}
