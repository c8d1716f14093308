// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The shared-bus connection: one handle per station, both bus roles.
//!
//! All master and slave traffic for a station flows through a single
//! `Connection`. A mutex around the bus state serialises entire
//! transactions (request, silence windows, reply, error flush), so two
//! transactions can never interleave on the wire.
//!
//! # Timing discipline
//!
//! - 10 ms of bus silence before and after every transmitted packet
//!   (approximates the Modbus 28-bit inter-frame gap at field baud rates)
//! - 1 s reply timeout; a frame is complete once at least four bytes are
//!   present and the trailing two bytes CRC-match the prefix
//! - fragments still incomplete at the timeout are discarded and the link
//!   input flushed
//!
//! I/O errors close and reopen the link; the in-flight transaction is
//! reported as [`TransportError::NoReply`] and retried by the caller's
//! outer loop.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::crc::{crc16, verify_crc16};
use super::frame::{self, function};
use super::link::BusLink;
use super::view::{self, RegisterView, Validator};

/// Bus silence observed before and after each transmitted packet.
pub const PACKET_WINDOW: Duration = Duration::from_millis(10);

/// Longest we wait for a reply (or a complete incoming frame) on the bus.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors surfaced by bus transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No CRC-valid reply within the timeout, or the link died mid-frame.
    NoReply,
    /// A different station answered than the one addressed.
    AddressMismatch {
        /// Station the request was sent to.
        expected: u8,
        /// Station that replied.
        got: u8,
    },
    /// The device returned a Modbus exception.
    Exception {
        /// Function code of the failed request.
        function: u8,
        /// Exception code (0x02 illegal address, 0x03 illegal value, ...).
        code: u8,
    },
    /// Reply did not match the request structurally.
    Malformed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReply => write!(f, "no valid reply within timeout"),
            Self::AddressMismatch { expected, got } => {
                write!(f, "sent to station {expected}, but station {got} responded")
            }
            Self::Exception { function, code } => {
                write!(f, "exception 0x{:02X}{code:02X} from device", function | 0x80)
            }
            Self::Malformed => write!(f, "reply did not match request"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Result alias for bus transactions.
pub type TransportResult<T> = Result<T, TransportError>;

struct Bus {
    link: Box<dyn BusLink>,
}

impl Bus {
    /// Close and reconnect after an I/O error, best effort.
    fn recover(&mut self, context: &str, err: &io::Error) {
        log::warn!("{context} on {}: {err}; reopening link", self.link.describe());
        if let Err(e) = self.link.reopen() {
            log::error!("could not reopen {}: {e}", self.link.describe());
        }
    }
}

/// One Modbus-RTU bus handle, master and slave roles.
pub struct Connection {
    bus: Mutex<Bus>,
}

impl Connection {
    /// Wrap an already-established link.
    #[must_use]
    pub fn new(link: Box<dyn BusLink>) -> Self {
        Connection { bus: Mutex::new(Bus { link }) }
    }

    /// Connect to a serial-to-Ethernet bridge at `host:port`.
    pub fn tcp(host: &str, port: u16) -> io::Result<Self> {
        let link = super::link::TcpLink::connect(host, port)?;
        Ok(Self::new(Box::new(link)))
    }

    /// Force the link closed and reopened, e.g. after the station loses the
    /// FNDH and backs off for a reconnect cycle.
    pub fn reopen(&self) {
        let mut bus = self.bus.lock();
        if let Err(e) = bus.link.reopen() {
            log::error!("could not reopen {}: {e}", bus.link.describe());
        }
    }

    // ------------------------------------------------------------------
    // Master role
    // ------------------------------------------------------------------

    /// Read `count` holding registers starting at `regnum` from the device
    /// at `modbus_address`. Returns the raw 16-bit register values.
    pub fn read_registers(
        &self,
        modbus_address: u8,
        regnum: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        let request = frame::read_request(modbus_address, regnum, count);
        let reply = self.transact(request)?;
        check_reply_header(&reply, modbus_address, function::READ_HOLDING)?;
        if reply.len() < 3 {
            return Err(TransportError::Malformed);
        }
        let byte_count = reply[2] as usize;
        let data = &reply[3..];
        if data.len() != byte_count || byte_count != count as usize * 2 {
            log::error!(
                "read of {count} registers returned {} data bytes (byte count {byte_count})",
                data.len()
            );
            return Err(TransportError::Malformed);
        }
        Ok(data.chunks_exact(2).map(frame::read_u16).collect())
    }

    /// Write one register and verify the device echoed the request.
    pub fn write_register(
        &self,
        modbus_address: u8,
        regnum: u16,
        value: u16,
    ) -> TransportResult<()> {
        let request = frame::write_single_request(modbus_address, regnum, value);
        let reply = self.transact(request.clone())?;
        check_reply_header(&reply, modbus_address, function::WRITE_SINGLE)?;
        if reply != request {
            log::error!("register {regnum} write echo mismatch: {}", hex(&reply));
            return Err(TransportError::Malformed);
        }
        Ok(())
    }

    /// Write consecutive registers starting at `regnum` and verify the echo
    /// carries the original start register and count.
    pub fn write_multiple_registers(
        &self,
        modbus_address: u8,
        regnum: u16,
        values: &[u16],
    ) -> TransportResult<()> {
        let request = frame::write_multiple_request(modbus_address, regnum, values);
        let reply = self.transact(request)?;
        check_reply_header(&reply, modbus_address, function::WRITE_MULTIPLE)?;
        if reply.len() < 6
            || frame::read_u16(&reply[2..4]) != regnum - 1
            || frame::read_u16(&reply[4..6]) != values.len() as u16
        {
            log::error!("multi-write at register {regnum} echo mismatch: {}", hex(&reply));
            return Err(TransportError::Malformed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slave role
    // ------------------------------------------------------------------

    /// Listen for one master packet addressed to `listen_address` and serve
    /// it from `view`. Returns the sets of registers read and written.
    ///
    /// Frames addressed to other stations are ignored (the bus is
    /// multidrop). Exactly one packet is served per call; the call returns
    /// after serving it, or after `max_time` with empty sets.
    pub fn listen_for_packet(
        &self,
        listen_address: u8,
        view: &mut RegisterView,
        max_time: Duration,
        validator: Option<Validator<'_>>,
    ) -> (BTreeSet<u16>, BTreeSet<u16>) {
        let deadline = Instant::now() + max_time;
        let mut bus = self.bus.lock();
        loop {
            let Some(request) = receive_frame(&mut bus, deadline) else {
                return (BTreeSet::new(), BTreeSet::new());
            };
            if request[0] != listen_address {
                log::debug!("packet for station {} ignored while listening", request[0]);
                continue;
            }
            let outcome = view::service_request(view, listen_address, &request, validator);
            if let Err(e) = send_framed(&mut bus, outcome.reply) {
                log::error!("could not send slave reply: {e}");
                return (BTreeSet::new(), BTreeSet::new());
            }
            return (outcome.read, outcome.written);
        }
    }

    /// Receive one CRC-valid frame regardless of its address byte.
    ///
    /// Frame-level primitive for device-simulation harnesses that serve
    /// several stations from one bus endpoint.
    pub fn receive_frame(&self, max_time: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + max_time;
        let mut bus = self.bus.lock();
        receive_frame(&mut bus, deadline)
    }

    /// Frame and transmit a reply, observing the silence windows. The CRC is
    /// appended here.
    pub fn send_reply(&self, reply: Vec<u8>) -> TransportResult<()> {
        let mut bus = self.bus.lock();
        send_framed(&mut bus, reply).map_err(|_| TransportError::NoReply)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// One full master transaction: flush, frame, send, await reply.
    fn transact(&self, request: Vec<u8>) -> TransportResult<Vec<u8>> {
        let mut bus = self.bus.lock();

        if let Err(e) = bus.link.flush_input() {
            bus.recover("flush failed", &e);
        }

        if let Err(e) = send_framed(&mut bus, request) {
            bus.recover("send failed", &e);
            return Err(TransportError::NoReply);
        }

        let deadline = Instant::now() + REPLY_TIMEOUT;
        let mut reply = Vec::new();
        let mut buf = [0u8; 256];
        while !frame_complete(&reply) {
            if Instant::now() >= deadline {
                log::error!("no valid reply - raw data received: {}", hex(&reply));
                if let Err(e) = bus.link.flush_input() {
                    bus.recover("flush failed", &e);
                }
                return Err(TransportError::NoReply);
            }
            match bus.link.recv_some(&mut buf) {
                Ok(0) => {}
                Ok(n) => reply.extend_from_slice(&buf[..n]),
                Err(e) => {
                    bus.recover("receive failed", &e);
                    return Err(TransportError::NoReply);
                }
            }
        }

        log::debug!("recvd: {}", hex(&reply));
        reply.truncate(reply.len() - 2);
        Ok(reply)
    }
}

/// Reply header checks shared by all master operations.
fn check_reply_header(reply: &[u8], expected_address: u8, function: u8) -> TransportResult<()> {
    if reply.len() < 2 {
        return Err(TransportError::Malformed);
    }
    if reply[0] != expected_address {
        log::error!(
            "sent to station {expected_address}, but station {} responded: {}",
            reply[0],
            hex(reply)
        );
        return Err(TransportError::AddressMismatch { expected: expected_address, got: reply[0] });
    }
    if reply[1] == frame::error_function(function) {
        let code = reply.get(2).copied().unwrap_or(0);
        log::warn!("device exception 0x{:02X}{code:02X}", reply[1]);
        return Err(TransportError::Exception { function, code });
    }
    if reply[1] != function {
        log::error!("unexpected reply received: {}", hex(reply));
        return Err(TransportError::Malformed);
    }
    Ok(())
}

/// Append the CRC and transmit, with a silence window either side.
fn send_framed(bus: &mut Bus, mut packet: Vec<u8>) -> io::Result<()> {
    let crc = crc16(&packet);
    packet.extend_from_slice(&crc);
    thread::sleep(PACKET_WINDOW);
    bus.link.send(&packet)?;
    thread::sleep(PACKET_WINDOW);
    Ok(())
}

fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && verify_crc16(buf)
}

/// Accumulate bytes until a CRC-valid frame is complete or `deadline`
/// passes. Fragments that stall past the per-frame timeout are discarded
/// and the link flushed. The returned frame has its CRC stripped.
fn receive_frame(bus: &mut Bus, deadline: Instant) -> Option<Vec<u8>> {
    let mut msg: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];
    let mut frame_deadline = deadline.min(Instant::now() + REPLY_TIMEOUT);
    loop {
        if frame_complete(&msg) {
            msg.truncate(msg.len() - 2);
            return Some(msg);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        if !msg.is_empty() && now >= frame_deadline {
            log::warn!("packet fragment received: {}", hex(&msg));
            if let Err(e) = bus.link.flush_input() {
                bus.recover("flush failed", &e);
            }
            msg.clear();
            frame_deadline = deadline.min(now + REPLY_TIMEOUT);
            continue;
        }
        match bus.link.recv_some(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if msg.is_empty() {
                    // Per-frame timer starts at the first received byte.
                    frame_deadline = deadline.min(Instant::now() + REPLY_TIMEOUT);
                }
                msg.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                bus.recover("receive failed", &e);
                return None;
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::link::{loopback_pair, LoopbackLink};

    /// Serve exactly one master request on `link` using a canned reply
    /// builder, from a helper thread.
    fn one_shot_slave(
        mut link: LoopbackLink,
        respond: impl FnOnce(Vec<u8>) -> Option<Vec<u8>> + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            let mut msg = Vec::new();
            let mut buf = [0u8; 256];
            while !frame_complete(&msg) && Instant::now() < deadline {
                match link.recv_some(&mut buf) {
                    Ok(n) => msg.extend_from_slice(&buf[..n]),
                    Err(_) => return,
                }
            }
            if !frame_complete(&msg) {
                return;
            }
            msg.truncate(msg.len() - 2);
            if let Some(mut reply) = respond(msg) {
                let crc = crc16(&reply);
                reply.extend_from_slice(&crc);
                let _ = link.send(&reply);
            }
        })
    }

    #[test]
    fn read_registers_roundtrip() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |req| {
            assert_eq!(req, vec![5, 0x03, 0x00, 0x00, 0x00, 0x02]);
            Some(vec![5, 0x03, 4, 0x00, 0x01, 0x12, 0x34])
        });
        let regs = conn.read_registers(5, 1, 2).unwrap();
        assert_eq!(regs, vec![1, 0x1234]);
        handle.join().unwrap();
    }

    #[test]
    fn no_reply_times_out() {
        let (master, _slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let start = Instant::now();
        assert_eq!(conn.read_registers(5, 1, 1), Err(TransportError::NoReply));
        assert!(start.elapsed() >= REPLY_TIMEOUT);
    }

    #[test]
    fn wrong_station_reply_is_mismatch() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |_| Some(vec![9, 0x03, 2, 0x00, 0x01]));
        assert_eq!(
            conn.read_registers(5, 1, 1),
            Err(TransportError::AddressMismatch { expected: 5, got: 9 })
        );
        handle.join().unwrap();
    }

    #[test]
    fn exception_reply_surfaces_code() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |_| Some(vec![5, 0x83, 0x02]));
        assert_eq!(
            conn.read_registers(5, 1, 1),
            Err(TransportError::Exception { function: 0x03, code: 0x02 })
        );
        handle.join().unwrap();
    }

    #[test]
    fn write_register_verifies_echo() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |req| Some(req));
        conn.write_register(5, 22, 1).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn write_register_bad_echo_is_malformed() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |mut req| {
            req[5] ^= 0xFF; // corrupt the echoed value
            Some(req)
        });
        assert_eq!(conn.write_register(5, 22, 1), Err(TransportError::Malformed));
        handle.join().unwrap();
    }

    #[test]
    fn write_multiple_verifies_start_and_count() {
        let (master, slave) = loopback_pair();
        let conn = Connection::new(Box::new(master));
        let handle = one_shot_slave(slave, |req| {
            // Echo is address, function, start, count.
            Some(req[..6].to_vec())
        });
        conn.write_multiple_registers(5, 36, &[0x3000; 12]).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn listen_serves_one_packet() {
        let (master, slave) = loopback_pair();
        let master_conn = Connection::new(Box::new(master));
        let slave_conn = Connection::new(Box::new(slave));

        let listener = std::thread::spawn(move || {
            let mut view = RegisterView::new();
            view.insert_run(1, &[11, 22, 33]);
            let sets =
                slave_conn.listen_for_packet(63, &mut view, Duration::from_secs(2), None);
            (view, sets)
        });

        let regs = master_conn.read_registers(63, 1, 3).unwrap();
        assert_eq!(regs, vec![11, 22, 33]);
        let (_view, (read, written)) = {
            let (view, sets) = listener.join().unwrap();
            (view, sets)
        };
        assert_eq!(read, BTreeSet::from([1, 2, 3]));
        assert!(written.is_empty());
    }

    #[test]
    fn listen_ignores_other_stations() {
        let (master, slave) = loopback_pair();
        let master_conn = Connection::new(Box::new(master));
        let slave_conn = Connection::new(Box::new(slave));

        let listener = std::thread::spawn(move || {
            let mut view = RegisterView::new();
            view.insert(1, 7);
            slave_conn.listen_for_packet(63, &mut view, Duration::from_millis(600), None)
        });

        // Addressed to station 9: the listener must not answer.
        assert_eq!(master_conn.read_registers(9, 1, 1), Err(TransportError::NoReply));
        let (read, written) = listener.join().unwrap();
        assert!(read.is_empty() && written.is_empty());
    }

    #[test]
    fn garbage_bytes_do_not_panic() {
        let (mut master, slave) = loopback_pair();
        let mut seed = 0x2545F491u32;
        let mut junk = [0u8; 64];
        for b in &mut junk {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            *b = (seed >> 24) as u8;
        }
        master.inject(&junk);
        let conn = Connection::new(Box::new(master));
        let _slave = slave;
        // Junk ahead of the reply is flushed before the request goes out.
        assert_eq!(conn.read_registers(5, 1, 1), Err(TransportError::NoReply));
    }
}
