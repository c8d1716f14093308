// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The simulated bus: one slave-side endpoint serving several devices.
//!
//! Physically every device hears every frame on the multidrop bus; the
//! harness mirrors that by receiving raw frames on one link endpoint and
//! dispatching by address byte. Wiring a SMARTbox to an FNDH PDoC port
//! makes its power (and therefore its boot time) follow that port, which
//! is what startup discovery correlates against.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{view, BusLink, Connection};

use super::fncc::SimFncc;
use super::fndh::SimFndh;
use super::smartbox::SimSmartBox;
use super::SimDevice;

/// The slave side of a simulated station bus.
pub struct SimBus {
    conn: Connection,
    fndh: Option<Arc<Mutex<SimFndh>>>,
    fncc: Option<Arc<Mutex<SimFncc>>>,
    boxes: Vec<Arc<Mutex<SimSmartBox>>>,
    /// PDoC port -> index into `boxes`.
    wiring: BTreeMap<u8, usize>,
}

impl SimBus {
    /// A bus serving no devices yet on the given link endpoint.
    #[must_use]
    pub fn new(link: Box<dyn BusLink>) -> Self {
        SimBus {
            conn: Connection::new(link),
            fndh: None,
            fncc: None,
            boxes: Vec::new(),
            wiring: BTreeMap::new(),
        }
    }

    /// Attach the FNDH. Returns the shared handle for test assertions.
    pub fn add_fndh(&mut self, fndh: SimFndh) -> Arc<Mutex<SimFndh>> {
        let fndh = Arc::new(Mutex::new(fndh));
        self.fndh = Some(Arc::clone(&fndh));
        fndh
    }

    /// Attach the FNCC. Returns the shared handle for test assertions.
    pub fn add_fncc(&mut self, fncc: SimFncc) -> Arc<Mutex<SimFncc>> {
        let fncc = Arc::new(Mutex::new(fncc));
        self.fncc = Some(Arc::clone(&fncc));
        fncc
    }

    /// Attach a SMARTbox, optionally wired to an FNDH PDoC port. Wired
    /// boxes power-follow their port; unwired boxes are always powered.
    pub fn add_smartbox(
        &mut self,
        smartbox: SimSmartBox,
        pdoc: Option<u8>,
    ) -> Arc<Mutex<SimSmartBox>> {
        let mut smartbox = smartbox;
        if pdoc.is_some() {
            // Power arrives from the FNDH, not from the bench.
            smartbox.set_powered(false);
        }
        let handle = Arc::new(Mutex::new(smartbox));
        self.boxes.push(Arc::clone(&handle));
        if let Some(pdoc) = pdoc {
            self.wiring.insert(pdoc, self.boxes.len() - 1);
        }
        handle
    }

    /// Serve frames until `stop` is raised.
    fn serve(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.service_one(Duration::from_millis(50));
            self.update_power();
        }
    }

    /// Receive and answer at most one frame.
    fn service_one(&self, max_time: Duration) {
        let Some(frame) = self.conn.receive_frame(max_time) else { return };
        let address = frame[0];

        if let Some(fndh) = &self.fndh {
            let mut fndh = fndh.lock();
            if fndh.address() == address {
                Self::serve_device(&self.conn, &mut *fndh, &frame);
                return;
            }
        }
        if let Some(fncc) = &self.fncc {
            let mut fncc = fncc.lock();
            if fncc.address() == address {
                Self::serve_device(&self.conn, &mut *fncc, &frame);
                return;
            }
        }
        for smartbox in &self.boxes {
            let mut smartbox = smartbox.lock();
            if smartbox.address() == address {
                if smartbox.responds() {
                    Self::serve_device(&self.conn, &mut *smartbox, &frame);
                } else {
                    log::debug!("sim SMARTbox {address} has no power, staying silent");
                }
                return;
            }
        }
        log::debug!("sim bus: no device at address {address}");
    }

    fn serve_device(conn: &Connection, device: &mut dyn SimDevice, frame: &[u8]) {
        let mut registers = device.build_view();
        let outcome = view::service_request(&mut registers, device.address(), frame, None);
        if let Err(e) = conn.send_reply(outcome.reply) {
            log::error!("sim bus reply failed: {e}");
            return;
        }
        device.apply(&registers, &outcome.read, &outcome.written);
    }

    /// Propagate FNDH port power to the wired SMARTboxes.
    fn update_power(&self) {
        let Some(fndh) = &self.fndh else { return };
        let fndh = fndh.lock();
        for (&pdoc, &index) in &self.wiring {
            let on = fndh.port_power(pdoc);
            self.boxes[index].lock().set_powered(on);
        }
    }

    /// Run the bus on its own thread until the returned handle stops it.
    #[must_use]
    pub fn spawn(self) -> SimBusHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let fndh = self.fndh.clone();
        let fncc = self.fncc.clone();
        let boxes = self.boxes.clone();
        let join = std::thread::spawn(move || self.serve(&stop_for_thread));
        SimBusHandle { stop, join: Some(join), fndh, fncc, boxes }
    }
}

/// Running simulated bus; dropping it stops the thread.
pub struct SimBusHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    /// The attached FNDH, if any.
    pub fndh: Option<Arc<Mutex<SimFndh>>>,
    /// The attached FNCC, if any.
    pub fncc: Option<Arc<Mutex<SimFncc>>>,
    /// The attached SMARTboxes, in attachment order.
    pub boxes: Vec<Arc<Mutex<SimSmartBox>>>,
}

impl SimBusHandle {
    /// Stop the bus thread and wait for it. The device handles stay
    /// readable afterwards.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SimBusHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
