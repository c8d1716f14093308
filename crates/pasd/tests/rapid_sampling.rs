// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Rapid sampling end to end: start, progress polling, CRC-checked chunked
// readout, de-interleaving.

use std::sync::Arc;
use std::time::Duration;

use pasd::command::sampling;
use pasd::sim::{SimBus, SimSmartBox};
use pasd::transport::{loopback_pair, Connection};

fn harness(address: u8) -> (Arc<Connection>, pasd::sim::SimBusHandle) {
    let (master, slave) = loopback_pair();
    let mut bus = SimBus::new(Box::new(slave));
    bus.add_smartbox(SimSmartBox::new(address), None);
    (Arc::new(Connection::new(Box::new(master))), bus.spawn())
}

/// The simulated device fills its buffer with `reg * 7 + (set * 3 + i)`.
fn expected(regnum: u16, set: usize, index: usize) -> u16 {
    regnum.wrapping_mul(7).wrapping_add((set * 3 + index) as u16)
}

#[test]
fn two_register_capture_round_trips() {
    let (conn, mut bus) = harness(8);

    // 200-word buffer over two registers: 100 sets, read as two full
    // 100-word chunks.
    let data = sampling::get_sample(&conn, 8, 5, &[48, 49], Duration::from_millis(10)).unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(data[&48].len(), 100);
    assert_eq!(data[&49].len(), 100);
    for set in [0usize, 1, 50, 99] {
        assert_eq!(data[&48][set], expected(48, set, 0));
        assert_eq!(data[&49][set], expected(49, set, 1));
    }
    bus.stop();
}

#[test]
fn three_register_capture_has_a_remainder_chunk() {
    let (conn, mut bus) = harness(9);

    // 200 / 3 = 66 sets -> 198 words -> a 100-word chunk plus a 98-word
    // remainder.
    let data = sampling::get_sample(&conn, 9, 2, &[17, 18, 19], Duration::from_millis(10)).unwrap();

    for reg in [17u16, 18, 19] {
        assert_eq!(data[&reg].len(), 66, "register {reg}");
    }
    for set in [0usize, 33, 65] {
        assert_eq!(data[&17][set], expected(17, set, 0));
        assert_eq!(data[&18][set], expected(18, set, 1));
        assert_eq!(data[&19][set], expected(19, set, 2));
    }
    bus.stop();
}

#[test]
fn state_and_stop_commands() {
    let (conn, mut bus) = harness(10);

    sampling::start_sample(&conn, 10, 100, &[48]).unwrap();
    assert_eq!(sampling::sample_state(&conn, 10).unwrap(), 1);
    assert_eq!(sampling::sample_size(&conn, 10).unwrap(), 200);
    sampling::stop_sample(&conn, 10).unwrap();
    bus.stop();
}
