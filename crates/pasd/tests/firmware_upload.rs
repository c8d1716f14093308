// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Firmware upload over the command envelope against a simulated device
// that checks every buffer CRC.

use std::sync::Arc;

use pasd::command::envelope::{self, Command, CommandFrame, ResultCode};
use pasd::command::firmware::{upload, Segment};
use pasd::command::CommandError;
use pasd::sim::{SimBus, SimSmartBox};
use pasd::transport::{loopback_pair, Connection};

fn harness(address: u8) -> (Arc<Connection>, pasd::sim::SimBusHandle) {
    let (master, slave) = loopback_pair();
    let mut bus = SimBus::new(Box::new(slave));
    bus.add_smartbox(SimSmartBox::new(address), None);
    (Arc::new(Connection::new(Box::new(master))), bus.spawn())
}

fn ramp(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn upload_runs_erase_write_verify_update_reset() {
    let (conn, mut bus) = harness(7);

    // Three flashable segments totalling 42 chunks (the last one partial),
    // plus a boot-configuration segment that must be skipped.
    let segments = vec![
        Segment { address: 0x0000_1000, data: ramp(20 * 320) },
        Segment { address: 0x0000_8000, data: ramp(15 * 320) },
        Segment { address: 0x0002_0000, data: ramp(6 * 320 + 160) },
        Segment { address: 0x0100_3000, data: ramp(320) },
    ];

    let chunks = upload(&conn, 7, &segments).unwrap();
    assert_eq!(chunks, 42);

    let sim = bus.boxes[0].lock();
    let mut expected: Vec<u16> = vec![1];
    expected.extend(std::iter::repeat(2).take(42));
    expected.extend([3, 4, 5]);
    assert_eq!(sim.commands, expected);
    assert_eq!(sim.verify_chunk_count, Some(42));
    drop(sim);
    bus.stop();
}

#[test]
fn failing_step_is_named() {
    let (conn, mut bus) = harness(8);

    // VERIFY with a count the device never saw: the device reports ERROR
    // and the caller learns which step died.
    let mut frame = CommandFrame::new(Command::Verify);
    frame.segment_mut()[0] = 99;
    let result = envelope::execute(&conn, 8, &frame, 4, "VERIFY");
    match result {
        Err(CommandError::Failed { step, code }) => {
            assert_eq!(step, "VERIFY");
            assert_eq!(code, ResultCode::Error);
        }
        other => panic!("expected a named failure, got {other:?}"),
    }
    bus.stop();
}

#[test]
fn corrupted_buffer_is_rejected_by_the_device() {
    let (conn, mut bus) = harness(9);

    // Send an ERASE whose CRC words lie about the buffer.
    let frame = CommandFrame::new(Command::Erase);
    let mut regs = frame.registers(0);
    regs[0] ^= 0xFFFF;
    conn.write_multiple_registers(9, 10001, &regs).unwrap();
    conn.write_register(9, 10125, Command::Erase.as_u16()).unwrap();
    let code = envelope::read_result(&conn, 9).unwrap();
    assert_eq!(code, ResultCode::CrcError);
    bus.stop();
}
