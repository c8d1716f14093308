// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Steady-state loop against simulated hardware: UNINITIALISED boxes get
// configured, reconciliation converges (and then goes quiet), desired-state
// changes produce exactly one targeted write, and breaker resets fire once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pasd::config::StationConfig;
use pasd::metrics::VecSink;
use pasd::sim::{SimBus, SimBusHandle, SimFncc, SimFndh, SimSmartBox};
use pasd::store::MemoryStore;
use pasd::transport::{loopback_pair, Connection};
use pasd::Station;

struct Harness {
    station: Station,
    store: Arc<Mutex<MemoryStore>>,
    sink: Arc<Mutex<VecSink>>,
    bus: SimBusHandle,
}

/// A station already past startup: the FNDH is initialised and every
/// SMARTbox is powered from the bench.
fn active_station(max_smartbox: u8) -> Harness {
    let (master, slave) = loopback_pair();

    let mut bus = SimBus::new(Box::new(slave));
    let mut fndh = SimFndh::new(31);
    fndh.status = 0;
    bus.add_fndh(fndh);
    bus.add_fncc(SimFncc::new(32));
    for address in 1..=max_smartbox {
        bus.add_smartbox(SimSmartBox::new(address), None);
    }
    let bus = bus.spawn();

    let store = Arc::new(Mutex::new(MemoryStore::new(max_smartbox)));
    // Keep the activity gates quiet; these tests drive poll_once directly.
    store.lock().desired_active = false;
    let sink = Arc::new(Mutex::new(VecSink::default()));

    let mut config = StationConfig::fast_for_tests();
    config.max_smartbox = max_smartbox;

    let conn = Arc::new(Connection::new(Box::new(master)));
    let station =
        Station::new(conn, config, Box::new(Arc::clone(&store)), Box::new(Arc::clone(&sink)))
            .unwrap();

    Harness { station, store, sink, bus }
}

#[test]
fn uninitialised_boxes_are_configured_and_the_loop_goes_quiet() {
    let mut h = active_station(2);

    h.station.poll_once().unwrap();

    for sim in &h.bus.boxes {
        let sim = sim.lock();
        assert_eq!(sim.status, 0, "box {} still uninitialised", sim.modbus_address);
        assert!(sim.accepted_thresholds.is_some());
        assert_eq!(sim.port_state_writes, 1, "configure writes the port block once");
    }

    // Hardware now matches the store: further cycles must not write.
    h.station.poll_once().unwrap();
    h.station.poll_once().unwrap();
    for sim in &h.bus.boxes {
        assert_eq!(sim.lock().port_state_writes, 1);
    }
    assert_eq!(h.bus.fndh.as_ref().unwrap().lock().port_state_writes, 0);
}

#[test]
fn desired_state_change_issues_one_targeted_write() {
    let mut h = active_station(2);
    h.station.poll_once().unwrap(); // configure
    h.station.poll_once().unwrap(); // settle

    // Operator wants SMARTbox 1 port 3 on while online.
    h.store.lock().set_smartbox_desire(1, 3, true, false);
    h.station.poll_once().unwrap();

    let sim = h.bus.boxes[0].lock();
    assert_eq!(sim.port_state_writes, 2);
    assert!(sim.ports[2].desire_online);
    let words = sim.last_port_words.as_ref().unwrap();
    assert_eq!(words.len(), 12);
    for (i, word) in words.iter().enumerate() {
        let desire_bits = (word >> 10) & 0b1111;
        if i == 2 {
            // Online written true (11), offline written false (10).
            assert_eq!(desire_bits, 0b1110, "port 3 word 0x{word:04X}");
        } else {
            // Untouched ports carry "no change" in both fields.
            assert_eq!(desire_bits, 0, "port {} word 0x{word:04X}", i + 1);
        }
        assert_eq!(word & 0x0080, 0, "no breaker resets were requested");
    }
    drop(sim);

    // The other box had no changes and stays untouched.
    assert_eq!(h.bus.boxes[1].lock().port_state_writes, 1);

    // Converged again: no further writes.
    h.station.poll_once().unwrap();
    assert_eq!(h.bus.boxes[0].lock().port_state_writes, 2);
}

#[test]
fn breaker_reset_fires_exactly_once() {
    let mut h = active_station(1);
    h.station.poll_once().unwrap();
    h.station.poll_once().unwrap();

    h.store.lock().request_breaker_reset(1, 5);
    h.station.poll_once().unwrap();

    {
        let sim = h.bus.boxes[0].lock();
        assert_eq!(sim.breaker_resets, vec![5]);
        let words = sim.last_port_words.as_ref().unwrap();
        assert_ne!(words[4] & 0x0080, 0, "port 5 carries the reset bit");
        assert!(words.iter().enumerate().all(|(i, w)| i == 4 || w & 0x0080 == 0));
    }

    // The orchestrator acknowledged the one-shot; later cycles stay clean.
    assert!(!h.store.lock().smartbox_desires[&1][4].reset_breaker);
    h.station.poll_once().unwrap();
    assert_eq!(h.bus.boxes[0].lock().breaker_resets, vec![5]);
}

#[test]
fn telemetry_and_state_rows_flow_every_cycle() {
    let mut h = active_station(2);
    h.station.poll_once().unwrap();

    let sink = h.sink.lock();
    let batch = sink.batches.last().unwrap();
    assert!(batch.iter().any(|p| p.path == "pasd.fieldtest.fndh.psu48v1_voltage" && p.value == 48.1));
    assert!(batch.iter().any(|p| p.path == "pasd.fieldtest.sb01.incoming_voltage" && p.value == 47.9));
    assert!(batch.iter().any(|p| p.path == "pasd.fieldtest.sb02.port07.current"));
    drop(sink);

    let store = h.store.lock();
    let (fndh_state, fndh_ports) = store.last_fndh.as_ref().unwrap();
    assert_eq!(fndh_state.psu48v2_voltage, 48.2);
    assert_eq!(fndh_state.chipid.len(), 32);
    assert_eq!(fndh_ports.len(), 28);

    let (states, ports) = store.last_smartboxes.as_ref().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(ports.len(), 24);
    assert!(states.iter().all(|s| s.incoming_voltage == 47.9));
}

#[test]
fn losing_the_fndh_unwinds_the_inner_loop() {
    let mut h = active_station(1);
    h.station.poll_once().unwrap();

    // Kill the bus; the next FNDH poll must report unreachable.
    h.bus.stop();
    std::thread::sleep(Duration::from_millis(50));
    let err = h.station.poll_once().unwrap_err();
    assert!(matches!(err, pasd::StationError::FndhUnreachable(_)));
}
