// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # PaSD - station power supervisor
//!
//! Control-building-side supervisor for one SKA-Low PaSD antenna station:
//! a Field Node Distribution Hub (FNDH) feeding 48 VDC to 28 PDoC ports,
//! and up to 24 SMARTboxes each powering 12 antenna front-end modules.
//! The hardware sits on a shared RS-485 multidrop bus speaking
//! Modbus-RTU, normally tunnelled through a TCP serial-to-Ethernet bridge.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pasd::{Connection, MemoryStore, NullSink, Station, StationConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StationConfig::default();
//!     let conn = Arc::new(Connection::tcp(&config.host, config.port)?);
//!     let store = Box::new(MemoryStore::new(config.max_smartbox));
//!     let mut station = Station::new(conn, config, store, Box::new(NullSink))?;
//!     station.startup();
//!     station.run(); // poll + reconcile until the exit flag is raised
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Station Orchestrator                        |
//! |  startup sequencing | PDoC discovery | poll + reconcile loop       |
//! +--------------------------------------------------------------------+
//! |        Device Layer           |     External Contracts             |
//! |  FNDH | SMARTbox | FNCC |     |  StationStore | MetricsSink |      |
//! |  Weather | register maps      |  ServiceLog                        |
//! +--------------------------------------------------------------------+
//! |   Command Envelope (10001..)  |   Port/Sensor Codecs               |
//! |   firmware upload | sampling  |   state words | scaling            |
//! +--------------------------------------------------------------------+
//! |                       Modbus-RTU Transport                         |
//! |   CRC-16 | framing | master ops | slave serving | bus links        |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Connection`] | The serialised bus handle, master and slave roles |
//! | [`Station`] | One station's orchestrator |
//! | [`Fndh`] / [`SmartBox`] | Typed field-device models |
//! | [`StationStore`] | Contract with the persistent store |
//! | [`MetricsSink`] | Contract with the telemetry sink |
//!
//! ## Modules Overview
//!
//! - [`transport`] - Modbus-RTU framing, CRC, links, the bus handle
//! - [`device`] - register maps and the typed device models
//! - [`command`] - the register-10001 command envelope
//! - [`station`] - orchestrator and MCCS slave mode
//! - [`store`] / [`metrics`] - external collaborator contracts
//! - [`sim`] - simulated devices for integration testing

/// The register-10001 command envelope (firmware upload, rapid sampling).
pub mod command;
/// Station configuration and its YAML loader.
pub mod config;
/// Register maps and typed models of the field devices.
pub mod device;
/// Metrics-sink contract and path building.
pub mod metrics;
/// Simulated field devices for integration testing.
pub mod sim;
/// Station orchestrator and MCCS slave mode.
pub mod station;
/// Contract with the persistent station store.
pub mod store;
/// Modbus-RTU transport for the shared station bus.
pub mod transport;

// Top-level re-exports: the types a station binary touches.
pub use command::{CommandError, CommandResult};
pub use config::{StationConfig, MCCS_SLAVE_ADDRESS};
pub use device::{
    DeviceError, DeviceResult, Fncc, Fndh, SmartBox, StatusCode, Thresholds, Weather,
};
pub use metrics::{MetricPoint, MetricsSink, NullSink, VecSink};
pub use station::{NullServiceLog, ServiceLog, Station, StationError, StationResult};
pub use store::{MemoryStore, StationStore, StoreError, StoreResult};
pub use transport::{Connection, TransportError, TransportResult};
