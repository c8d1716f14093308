// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Cold-start discovery against simulated hardware. The long test runs the
// real power-sequencing at (reduced) second scale, because the uptime
// register only resolves whole seconds; the short test checks that an
// FNDH falling back to UNINITIALISED mid-run re-triggers startup.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pasd::config::StationConfig;
use pasd::metrics::NullSink;
use pasd::sim::{SimBus, SimFncc, SimFndh, SimSmartBox};
use pasd::store::MemoryStore;
use pasd::transport::{loopback_pair, Connection};
use pasd::Station;

#[test]
fn cold_startup_binds_boxes_to_their_pdoc_ports() {
    let (master, slave) = loopback_pair();

    // SMARTboxes at addresses 1, 2 and 5 wired to PDoC ports 1, 2 and 5,
    // booting 100 ms after power arrives.
    let mut bus = SimBus::new(Box::new(slave));
    bus.add_fndh(SimFndh::new(31));
    bus.add_fncc(SimFncc::new(32));
    for (address, pdoc) in [(1u8, 1u8), (2, 2), (5, 5)] {
        bus.add_smartbox(
            SimSmartBox::new(address).with_boot_delay(Duration::from_millis(100)),
            Some(pdoc),
        );
    }
    let mut bus = bus.spawn();

    // The uptime register resolves whole seconds, so the correlation
    // timings stay at second scale (just compressed from the field's 10 s).
    let mut config = StationConfig::fast_for_tests();
    config.max_smartbox = 5;
    config.port_on_interval_secs = 2.0;
    config.discovery_window_secs = 1.8;
    config.post_configure_delay_secs = 0.2;

    let store = Arc::new(Mutex::new(MemoryStore::new(5)));
    for pdoc in [1u8, 2, 5] {
        store.lock().set_fndh_desire(pdoc, true, false);
    }

    let conn = Arc::new(Connection::new(Box::new(master)));
    let mut station =
        Station::new(conn, config, Box::new(Arc::clone(&store)), Box::new(NullSink)).unwrap();

    assert!(station.startup(), "startup failed");

    // Each box bound to its own port, nothing else bound.
    assert_eq!(station.fndh.smartbox_on_port[0], Some(1));
    assert_eq!(station.fndh.smartbox_on_port[1], Some(2));
    assert_eq!(station.fndh.smartbox_on_port[4], Some(5));
    assert_eq!(station.fndh.smartbox_on_port.iter().flatten().count(), 3);
    assert_eq!(station.smartboxes[&1].pdoc_number, Some(1));
    assert_eq!(station.smartboxes[&2].pdoc_number, Some(2));
    assert_eq!(station.smartboxes[&5].pdoc_number, Some(5));
    assert!(station.active);

    // configure_final applied the persisted desires.
    {
        let fndh = bus.fndh.as_ref().unwrap().lock();
        assert_eq!(fndh.status, 0);
        for pdoc in 1..=28u8 {
            let expected = matches!(pdoc, 1 | 2 | 5);
            assert_eq!(
                fndh.ports[(pdoc - 1) as usize].desire_online,
                expected,
                "PDoC {pdoc}"
            );
        }
    }

    // The first steady-state pass configures the discovered boxes.
    station.poll_once().unwrap();
    for sim in &bus.boxes {
        assert_eq!(sim.lock().status, 0);
    }

    bus.stop();
}

#[test]
fn fndh_uninitialised_mid_run_triggers_restartup() {
    let (master, slave) = loopback_pair();

    let mut bus = SimBus::new(Box::new(slave));
    // Fresh FNDH: status starts UNINITIALISED, as after a power blip.
    bus.add_fndh(SimFndh::new(31));
    bus.add_fncc(SimFncc::new(32));
    bus.add_smartbox(SimSmartBox::new(1), None);
    let bus = bus.spawn();

    let mut config = StationConfig::fast_for_tests();
    config.max_smartbox = 1;

    let store = Arc::new(Mutex::new(MemoryStore::new(1)));
    let conn = Arc::new(Connection::new(Box::new(master)));
    let mut station =
        Station::new(conn, config, Box::new(Arc::clone(&store)), Box::new(NullSink)).unwrap();

    station.poll_once().unwrap();

    let fndh = bus.fndh.as_ref().unwrap().lock();
    assert_eq!(fndh.status, 0, "startup must have reconfigured the FNDH");
    // all-off write + 28 port-on writes + configure_final.
    assert!(fndh.port_state_writes >= 30, "saw {} writes", fndh.port_state_writes);
    drop(fndh);
    assert!(station.active);
}
