// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// MCCS slave mode: a bench SID drives the station's synthetic register
// view over the other end of the bus.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pasd::config::{StationConfig, MCCS_SLAVE_ADDRESS};
use pasd::metrics::NullSink;
use pasd::station::ServiceLog;
use pasd::store::MemoryStore;
use pasd::transport::{loopback_pair, Connection, TransportError};
use pasd::Station;

#[derive(Default)]
struct RecordingLog {
    saved: Vec<(Option<u16>, String)>,
}

impl ServiceLog for RecordingLog {
    fn get_entry(&mut self, _: Option<u16>, _: Option<&[u16; 8]>, _: u16) -> (String, u32) {
        ("service log stub".to_string(), 1_614_319_283)
    }

    fn save_entry(&mut self, antenna: Option<u16>, _: Option<&[u16; 8]>, message: &str, _: f64) {
        self.saved.push((antenna, message.to_string()));
    }
}

fn listening_station(
    listen_for: Duration,
) -> (Connection, std::thread::JoinHandle<(Station, RecordingLog)>) {
    let (sid_end, station_end) = loopback_pair();

    let mut config = StationConfig::fast_for_tests();
    config.max_smartbox = 2;
    let store = Arc::new(Mutex::new(MemoryStore::new(2)));
    {
        let mut s = store.lock();
        s.assign_antenna(1, 1, 2); // antenna 1 on SMARTbox 1 port 2
        s.assign_antenna(2, 1, 3); // antenna 2 on SMARTbox 1 port 3
    }

    let conn = Arc::new(Connection::new(Box::new(station_end)));
    let mut station = Station::new(conn, config, Box::new(store), Box::new(NullSink)).unwrap();

    let handle = std::thread::spawn(move || {
        let mut log = RecordingLog::default();
        station.listen(&mut log, listen_for);
        (station, log)
    });

    (Connection::new(Box::new(sid_end)), handle)
}

#[test]
fn antenna_map_reads_and_duplicate_writes() {
    let (sid, station_thread) = listening_station(Duration::from_secs(5));

    // The map serves (smartbox << 8) | port, zero where unmapped.
    let regs = sid.read_registers(MCCS_SLAVE_ADDRESS, 1, 8).unwrap();
    assert_eq!(regs[0], 0x0102);
    assert_eq!(regs[1], 0x0103);
    assert!(regs[2..].iter().all(|&v| v == 0));

    // Two antennas pointing at the same port: Illegal Data Value, map
    // untouched.
    let err = sid
        .write_multiple_registers(MCCS_SLAVE_ADDRESS, 1, &[0x0105, 0x0105])
        .unwrap_err();
    assert_eq!(err, TransportError::Exception { function: 0x10, code: 0x03 });
    let regs = sid.read_registers(MCCS_SLAVE_ADDRESS, 1, 2).unwrap();
    assert_eq!(regs, vec![0x0102, 0x0103]);

    // A clean remap is accepted and applied.
    sid.write_register(MCCS_SLAVE_ADDRESS, 1, 0x0104).unwrap();
    let regs = sid.read_registers(MCCS_SLAVE_ADDRESS, 1, 1).unwrap();
    assert_eq!(regs[0], 0x0104);

    let (station, _log) = station_thread.join().unwrap();
    assert_eq!(station.antennae[&1], (1, 4));
    assert_eq!(station.antennae[&2], (1, 3));
    assert_eq!(station.smartboxes[&1].port(4).antenna_number, Some(1));
    assert_eq!(station.smartboxes[&1].port(2).antenna_number, None);
}

#[test]
fn log_paging_and_entry_writes() {
    let (sid, station_thread) = listening_station(Duration::from_secs(5));

    // Reading the message text pages the log cursor forward.
    assert_eq!(sid.read_registers(MCCS_SLAVE_ADDRESS, 1010, 1).unwrap()[0], 0);
    let text = sid.read_registers(MCCS_SLAVE_ADDRESS, 1011, 4).unwrap();
    assert_eq!(text[0], u16::from_be_bytes(*b"se")); // "service log stub"
    assert_eq!(sid.read_registers(MCCS_SLAVE_ADDRESS, 1010, 1).unwrap()[0], 1);

    // Selecting a new antenna rewinds the cursor.
    sid.write_register(MCCS_SLAVE_ADDRESS, 1001, 7).unwrap();
    assert_eq!(sid.read_registers(MCCS_SLAVE_ADDRESS, 1010, 1).unwrap()[0], 0);

    // The timestamp rides in the last two registers of the block.
    let stamp = sid.read_registers(MCCS_SLAVE_ADDRESS, 1134, 2).unwrap();
    let ts = (u32::from(stamp[0]) << 16) | u32::from(stamp[1]);
    assert_eq!(ts, 1_614_319_283);

    // Writing the whole text block files a service log entry.
    let mut words = vec![0u16; 123];
    let note = b"field note";
    for (i, pair) in note.chunks(2).enumerate() {
        let msb = u16::from(pair[0]);
        let lsb = pair.get(1).map_or(0, |&b| u16::from(b));
        words[i] = (msb << 8) | lsb;
    }
    sid.write_multiple_registers(MCCS_SLAVE_ADDRESS, 1011, &words).unwrap();

    let (_station, log) = station_thread.join().unwrap();
    assert_eq!(log.saved.len(), 1);
    assert_eq!(log.saved[0].0, Some(7));
    assert_eq!(log.saved[0].1, "field note");
}

#[test]
fn pdoc_map_is_served() {
    let (sid, station_thread) = listening_station(Duration::from_secs(2));
    let regs = sid.read_registers(MCCS_SLAVE_ADDRESS, 1201, 28).unwrap();
    // No discovery has run: every PDoC register reads zero.
    assert!(regs.iter().all(|&v| v == 0));
    drop(station_thread.join().unwrap());
}
