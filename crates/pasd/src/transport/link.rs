// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link abstraction for the shared RS-485 bus.
//!
//! The field hardware is reached over Modbus-RTU, normally tunnelled through
//! a TCP serial-to-Ethernet bridge in the FNDH. The `BusLink` trait hides
//! the byte carrier so the same `Connection` drives:
//!
//! - `TcpLink` - TCP socket to the bridge (production)
//! - `LoopbackLink` - channel-backed in-process pair (tests, simulation)
//!
//! A native serial-port link is a further implementation of the same trait.
//! Links are byte streams: RTU frame boundaries are recovered above this
//! layer from inter-frame timing and CRC validity.

use std::collections::VecDeque;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// How long a single `recv_some` call may block waiting for bytes.
pub const RECV_POLL: Duration = Duration::from_millis(100);

/// Byte carrier for one shared bus.
pub trait BusLink: Send {
    /// Send raw bytes. The whole buffer is transmitted or an error returned.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Receive whatever bytes are available, blocking at most [`RECV_POLL`].
    ///
    /// Returns `Ok(0)` when nothing arrived within the poll window; an
    /// `Err` means the link is broken and needs [`BusLink::reopen`].
    fn recv_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard any bytes already queued on the receive side.
    fn flush_input(&mut self) -> io::Result<()>;

    /// Tear down and re-establish the link after an I/O error.
    fn reopen(&mut self) -> io::Result<()>;

    /// Human-readable endpoint description for log messages.
    fn describe(&self) -> String;
}

// ============================================================================
// TcpLink - serial-to-Ethernet bridge link
// ============================================================================

/// TCP link to the Ethernet-to-serial bridge inside the FNDH.
pub struct TcpLink {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpLink {
    /// Connect to the bridge at `host:port`.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let mut link = TcpLink { host: host.to_string(), port, stream: None };
        link.reopen()?;
        Ok(link)
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(RECV_POLL))?;

        // Bridges sit on flaky field networks; keepalive detects a dead
        // bridge faster than the OS default.
        let sock = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
        sock.set_tcp_keepalive(&keepalive)?;

        Ok(stream)
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "bridge link closed"))
    }
}

impl BusLink for TcpLink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.stream()?.write_all(data)
    }

    fn recv_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match self.stream()?.read(buf) {
            // A zero-byte read on TCP means the bridge closed on us.
            Ok(0) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "bridge closed link")),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn flush_input(&mut self) -> io::Result<()> {
        use std::io::Read;
        let stream = self.stream()?;
        stream.set_read_timeout(Some(Duration::from_millis(1)))?;
        let mut scratch = [0u8; 1024];
        let result = loop {
            match stream.read(&mut scratch) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "bridge closed link",
                    ))
                }
                Ok(_) => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break Ok(())
                }
                Err(e) => break Err(e),
            }
        };
        stream.set_read_timeout(Some(RECV_POLL))?;
        result
    }

    fn reopen(&mut self) -> io::Result<()> {
        // Drop any existing stream first; the old socket may be dead.
        self.stream = None;
        self.stream = Some(self.open_stream()?);
        log::info!("opened bridge link to {}:{}", self.host, self.port);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

// ============================================================================
// LoopbackLink - in-process pair for tests and simulation
// ============================================================================

/// One endpoint of an in-process link pair.
///
/// Bytes written to one endpoint appear on the other. Used by the test
/// suite to wire a master `Connection` to simulated field devices without
/// touching the network.
pub struct LoopbackLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// Create a connected pair of loopback endpoints.
#[must_use]
pub fn loopback_pair() -> (LoopbackLink, LoopbackLink) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        LoopbackLink { tx: a_tx, rx: a_rx, pending: VecDeque::new() },
        LoopbackLink { tx: b_tx, rx: b_rx, pending: VecDeque::new() },
    )
}

impl BusLink for LoopbackLink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))
    }

    fn recv_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(RECV_POLL) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        // Nothing to re-establish; just drop stale bytes.
        self.flush_input()
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

impl LoopbackLink {
    /// Push bytes into this endpoint's receive queue directly, bypassing the
    /// peer. Test hook for injecting noise and fragments.
    pub fn inject(&mut self, data: &[u8]) {
        self.pending.extend(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_carries_bytes_both_ways() {
        let (mut a, mut b) = loopback_pair();
        a.send(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        let n = b.recv_some(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        b.send(&[9]).unwrap();
        let n = a.recv_some(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9]);
    }

    #[test]
    fn recv_times_out_empty() {
        let (mut a, _b) = loopback_pair();
        let mut buf = [0u8; 8];
        assert_eq!(a.recv_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn flush_discards_queued_bytes() {
        let (mut a, mut b) = loopback_pair();
        a.send(&[1, 2, 3]).unwrap();
        a.send(&[4, 5]).unwrap();
        b.flush_input().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.recv_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn dropped_peer_is_an_error() {
        let (mut a, b) = loopback_pair();
        drop(b);
        assert!(a.send(&[0]).is_err());
    }
}
