// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics-sink contract.
//!
//! Once per poll cycle the orchestrator emits a flat batch of
//! `(path, (timestamp, value))` samples. Paths follow the hierarchy
//! `pasd.<domain>.<device>.<field>`, e.g.
//! `pasd.fieldtest.sb02.port07.current`. The sink itself (a carbon relay
//! in production) is an external collaborator.

use std::fmt;

/// One metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Dotted metric path.
    pub path: String,
    /// Unix timestamp of the reading.
    pub timestamp: f64,
    /// Sample value.
    pub value: f64,
}

impl MetricPoint {
    /// Build a sample.
    #[must_use]
    pub fn new(path: impl Into<String>, timestamp: f64, value: f64) -> Self {
        MetricPoint { path: path.into(), timestamp, value }
    }
}

/// A failed batch send. Batches are fire-and-forget: failures are logged
/// and the data dropped, never retried.
#[derive(Debug, Clone)]
pub struct MetricsError {
    /// What the sink reported.
    pub message: String,
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metrics sink: {}", self.message)
    }
}

impl std::error::Error for MetricsError {}

/// Batch receiver for metric samples.
pub trait MetricsSink: Send {
    /// Deliver one batch.
    fn send(&mut self, batch: &[MetricPoint]) -> Result<(), MetricsError>;
}

/// A shared sink handle: lets a test keep reading what the station emits.
impl<S: MetricsSink> MetricsSink for std::sync::Arc<parking_lot::Mutex<S>> {
    fn send(&mut self, batch: &[MetricPoint]) -> Result<(), MetricsError> {
        self.lock().send(batch)
    }
}

/// Discards every batch. The default when no sink is configured.
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn send(&mut self, _batch: &[MetricPoint]) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Buffers every batch in memory; used by the test suite.
#[derive(Debug, Default)]
pub struct VecSink {
    /// All delivered batches, oldest first.
    pub batches: Vec<Vec<MetricPoint>>,
}

impl MetricsSink for VecSink {
    fn send(&mut self, batch: &[MetricPoint]) -> Result<(), MetricsError> {
        self.batches.push(batch.to_vec());
        Ok(())
    }
}

/// Path builder rooted at `pasd.<domain>`.
#[derive(Debug, Clone)]
pub struct MetricPath {
    domain: String,
}

impl MetricPath {
    /// A builder for the given domain (e.g. `fieldtest`).
    #[must_use]
    pub fn new(domain: &str) -> Self {
        MetricPath { domain: domain.to_string() }
    }

    /// `pasd.<domain>.fndh.<field>`
    #[must_use]
    pub fn fndh(&self, field: &str) -> String {
        format!("pasd.{}.fndh.{field}", self.domain)
    }

    /// `pasd.<domain>.fndh.portNN.<field>`
    #[must_use]
    pub fn fndh_port(&self, port: u8, field: &str) -> String {
        format!("pasd.{}.fndh.port{port:02}.{field}", self.domain)
    }

    /// `pasd.<domain>.sbNN.<field>`
    #[must_use]
    pub fn smartbox(&self, address: u8, field: &str) -> String {
        format!("pasd.{}.sb{address:02}.{field}", self.domain)
    }

    /// `pasd.<domain>.sbNN.portMM.<field>`
    #[must_use]
    pub fn smartbox_port(&self, address: u8, port: u8, field: &str) -> String {
        format!("pasd.{}.sb{address:02}.port{port:02}.{field}", self.domain)
    }

    /// `pasd.<domain>.sbNN.sensorMM.<field>`
    #[must_use]
    pub fn smartbox_sensor(&self, address: u8, sensor: u8, field: &str) -> String {
        format!("pasd.{}.sb{address:02}.sensor{sensor:02}.{field}", self.domain)
    }
}
