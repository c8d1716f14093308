// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Register view served when this side of the bus acts as a Modbus slave.
//!
//! A `RegisterView` is the set of registers a slave exposes for one listen
//! call: the MCCS slave mode serves the antenna-map/service-log view, and
//! the simulated field devices serve their own poll/configuration maps.
//!
//! Writes are transactional per packet: if any written register is outside
//! the view, or the caller's validator rejects the post-write state, the
//! view is rolled back and the appropriate exception is returned.

use std::collections::{BTreeMap, BTreeSet};

use super::frame::{self, exception, SlaveRequest};

/// Validation hook run after every write before it is committed.
pub type Validator<'a> = &'a dyn Fn(&RegisterView) -> bool;

/// Largest register run a single read may request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Largest register run a single write may carry. The field firmware stalls
/// at the Modbus ceiling of 123+2, so the command envelope splits its
/// payload (124 registers) from the command write.
pub const MAX_WRITE_REGISTERS: u16 = 124;

/// Sparse 16-bit register file keyed by 1-based register number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterView {
    regs: BTreeMap<u16, u16>,
}

impl RegisterView {
    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite one register.
    pub fn insert(&mut self, regnum: u16, value: u16) {
        self.regs.insert(regnum, value);
    }

    /// Add a run of consecutive registers starting at `start`.
    pub fn insert_run(&mut self, start: u16, values: &[u16]) {
        for (i, &value) in values.iter().enumerate() {
            self.regs.insert(start + i as u16, value);
        }
    }

    /// Value of a register, if it is part of the view.
    #[must_use]
    pub fn get(&self, regnum: u16) -> Option<u16> {
        self.regs.get(&regnum).copied()
    }

    /// True if `regnum` is served by this view.
    #[must_use]
    pub fn contains(&self, regnum: u16) -> bool {
        self.regs.contains_key(&regnum)
    }

    /// Number of registers in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// True when the view serves no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Iterate `(regnum, value)` pairs in register order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.regs.iter().map(|(&r, &v)| (r, v))
    }
}

/// Outcome of servicing one parsed request against a view.
#[derive(Debug)]
pub struct ServiceOutcome {
    /// Reply frame (without CRC) to put on the bus.
    pub reply: Vec<u8>,
    /// Registers read by the request.
    pub read: BTreeSet<u16>,
    /// Registers written (and committed) by the request.
    pub written: BTreeSet<u16>,
}

impl ServiceOutcome {
    fn exception(address: u8, function: u8, code: u8) -> Self {
        ServiceOutcome {
            reply: vec![address, frame::error_function(function), code],
            read: BTreeSet::new(),
            written: BTreeSet::new(),
        }
    }
}

/// Service one CRC-stripped request frame addressed to `address`.
///
/// `frame` must already have been checked for the address byte. Returns the
/// reply to send and the sets of registers touched.
pub fn service_request(
    view: &mut RegisterView,
    address: u8,
    request_frame: &[u8],
    validator: Option<Validator<'_>>,
) -> ServiceOutcome {
    match frame::parse_slave_request(request_frame) {
        SlaveRequest::Read { start, count } => {
            if count == 0 || count > MAX_READ_REGISTERS {
                return ServiceOutcome::exception(
                    address,
                    frame::function::READ_HOLDING,
                    exception::ILLEGAL_DATA_VALUE,
                );
            }
            let Some(end) = start.checked_add(count - 1) else {
                return ServiceOutcome::exception(
                    address,
                    frame::function::READ_HOLDING,
                    exception::ILLEGAL_DATA_ADDRESS,
                );
            };
            let mut read = BTreeSet::new();
            let mut data = Vec::with_capacity(count as usize * 2);
            for regnum in start..=end {
                match view.get(regnum) {
                    Some(value) => {
                        frame::push_u16(&mut data, value);
                        read.insert(regnum);
                    }
                    None => {
                        log::warn!("slave read of unserved register {regnum}");
                        return ServiceOutcome::exception(
                            address,
                            frame::function::READ_HOLDING,
                            exception::ILLEGAL_DATA_ADDRESS,
                        );
                    }
                }
            }
            let mut reply = vec![address, frame::function::READ_HOLDING, (count * 2) as u8];
            reply.extend_from_slice(&data);
            ServiceOutcome { reply, read, written: BTreeSet::new() }
        }

        SlaveRequest::WriteSingle { regnum, value } => {
            if !view.contains(regnum) {
                log::warn!("slave write of unserved register {regnum}");
                return ServiceOutcome::exception(
                    address,
                    frame::function::WRITE_SINGLE,
                    exception::ILLEGAL_DATA_ADDRESS,
                );
            }
            let before = view.clone();
            view.insert(regnum, value);
            if let Some(validate) = validator {
                if !validate(view) {
                    *view = before;
                    log::warn!("slave write to register {regnum} rejected by validator");
                    return ServiceOutcome::exception(
                        address,
                        frame::function::WRITE_SINGLE,
                        exception::ILLEGAL_DATA_VALUE,
                    );
                }
            }
            // Success echoes the request frame verbatim.
            ServiceOutcome {
                reply: request_frame.to_vec(),
                read: BTreeSet::new(),
                written: BTreeSet::from([regnum]),
            }
        }

        SlaveRequest::WriteMultiple { start, values } => {
            let count = values.len() as u16;
            if count == 0 || count > MAX_WRITE_REGISTERS {
                return ServiceOutcome::exception(
                    address,
                    frame::function::WRITE_MULTIPLE,
                    exception::ILLEGAL_DATA_VALUE,
                );
            }
            let Some(end) = start.checked_add(count - 1) else {
                return ServiceOutcome::exception(
                    address,
                    frame::function::WRITE_MULTIPLE,
                    exception::ILLEGAL_DATA_ADDRESS,
                );
            };
            for regnum in start..=end {
                if !view.contains(regnum) {
                    log::warn!("slave write of unserved register {regnum}");
                    return ServiceOutcome::exception(
                        address,
                        frame::function::WRITE_MULTIPLE,
                        exception::ILLEGAL_DATA_ADDRESS,
                    );
                }
            }
            let before = view.clone();
            let mut written = BTreeSet::new();
            for (i, &value) in values.iter().enumerate() {
                let regnum = start + i as u16;
                view.insert(regnum, value);
                written.insert(regnum);
            }
            if let Some(validate) = validator {
                if !validate(view) {
                    *view = before;
                    log::warn!("slave multi-write at register {start} rejected by validator");
                    return ServiceOutcome::exception(
                        address,
                        frame::function::WRITE_MULTIPLE,
                        exception::ILLEGAL_DATA_VALUE,
                    );
                }
            }
            let mut reply = vec![address, frame::function::WRITE_MULTIPLE];
            frame::push_u16(&mut reply, start - 1);
            frame::push_u16(&mut reply, count);
            ServiceOutcome { reply, read: BTreeSet::new(), written }
        }

        SlaveRequest::Unsupported { function } => {
            log::warn!("slave received unsupported function 0x{function:02X}");
            ServiceOutcome::exception(address, function, exception::ILLEGAL_FUNCTION)
        }

        SlaveRequest::Malformed { function } => {
            log::warn!("slave received malformed frame for function 0x{function:02X}");
            ServiceOutcome::exception(address, function, exception::ILLEGAL_DATA_VALUE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::{read_request, write_multiple_request, write_single_request};

    fn view_1_to_4() -> RegisterView {
        let mut view = RegisterView::new();
        view.insert_run(1, &[10, 20, 30, 40]);
        view
    }

    #[test]
    fn read_returns_values_and_set() {
        let mut view = view_1_to_4();
        let out = service_request(&mut view, 63, &read_request(63, 2, 2), None);
        assert_eq!(out.reply, vec![63, 0x03, 4, 0, 20, 0, 30]);
        assert_eq!(out.read, BTreeSet::from([2, 3]));
        assert!(out.written.is_empty());
    }

    #[test]
    fn read_outside_view_is_illegal_address() {
        let mut view = view_1_to_4();
        let out = service_request(&mut view, 63, &read_request(63, 3, 5), None);
        assert_eq!(out.reply, vec![63, 0x83, 0x02]);
        assert!(out.read.is_empty());
    }

    #[test]
    fn write_single_echoes_request() {
        let mut view = view_1_to_4();
        let req = write_single_request(63, 3, 99);
        let out = service_request(&mut view, 63, &req, None);
        assert_eq!(out.reply, req);
        assert_eq!(view.get(3), Some(99));
        assert_eq!(out.written, BTreeSet::from([3]));
    }

    #[test]
    fn rejected_write_rolls_back() {
        let mut view = view_1_to_4();
        let never = |_: &RegisterView| false;
        let out =
            service_request(&mut view, 63, &write_multiple_request(63, 1, &[7, 8]), Some(&never));
        assert_eq!(out.reply, vec![63, 0x90, 0x03]);
        assert_eq!(view, view_1_to_4());
        assert!(out.written.is_empty());
    }

    #[test]
    fn partial_out_of_range_write_commits_nothing() {
        let mut view = view_1_to_4();
        let out = service_request(&mut view, 63, &write_multiple_request(63, 3, &[1, 2, 3]), None);
        assert_eq!(out.reply, vec![63, 0x90, 0x02]);
        assert_eq!(view, view_1_to_4());
    }

    #[test]
    fn unsupported_function_code() {
        let mut view = view_1_to_4();
        let out = service_request(&mut view, 63, &[63, 0x05, 0x00, 0x00, 0xFF, 0x00], None);
        assert_eq!(out.reply, vec![63, 0x85, 0x01]);
    }
}
