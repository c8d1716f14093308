// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station configuration.
//!
//! Every timing knob of the orchestrator lives here with its field
//! default, so the whole startup/poll machinery can be run at millisecond
//! scale by the test suite. Configuration loads from a YAML file; missing
//! keys take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Modbus address a technician's SID uses to reach the MCCS as a slave.
pub const MCCS_SLAVE_ADDRESS: u8 = 63;

/// Everything needed to run one station.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Station identifier (1-9999) used in store rows.
    pub station_id: u16,
    /// Hostname of the serial-to-Ethernet bridge.
    pub host: String,
    /// TCP port of the bridge.
    pub port: u16,
    /// Modbus address of the FNDH controller.
    pub fndh_address: u8,
    /// Modbus address of the FNCC.
    pub fncc_address: u8,
    /// Highest SMARTbox address probed during discovery.
    pub max_smartbox: u8,
    /// Metric path domain (`pasd.<domain>.` prefix).
    pub metrics_domain: String,
    /// Sensor smoothing cutoff in Hz; `None` disables smoothing.
    pub filter_cutoff_hz: Option<f64>,
    /// Steady-state loop cadence in seconds.
    pub poll_interval_secs: f64,
    /// Delay between powering successive PDoC ports during discovery.
    pub port_on_interval_secs: f64,
    /// A SMARTbox boot must land within this window after its port
    /// powered to bind port and address.
    pub discovery_window_secs: f64,
    /// Settle time after `configure_all_off` before discovery starts.
    pub post_configure_delay_secs: f64,
    /// Settle time after an FNDH port write that may boot a SMARTbox.
    pub fndh_port_settle_secs: f64,
    /// Minimum gap between startup attempts when the station should be
    /// active but is not.
    pub startup_retry_secs: f64,
    /// Minimum gap between shutdown attempts when the station is active
    /// but should not be.
    pub shutdown_retry_secs: f64,
    /// Wait before reopening the transport after losing the FNDH.
    pub reconnect_delay_secs: f64,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            station_id: 1,
            host: "pasd-fndh".to_string(),
            port: 5000,
            fndh_address: 31,
            fncc_address: 32,
            max_smartbox: 24,
            metrics_domain: "fieldtest".to_string(),
            filter_cutoff_hz: Some(0.5),
            poll_interval_secs: 15.0,
            port_on_interval_secs: 10.0,
            discovery_window_secs: 10.0,
            post_configure_delay_secs: 5.0,
            fndh_port_settle_secs: 1.0,
            startup_retry_secs: 600.0,
            shutdown_retry_secs: 600.0,
            reconnect_delay_secs: 10.0,
        }
    }
}

impl StationConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError { message: format!("{}: {e}", path.display()) })?;
        serde_yaml::from_str(&text)
            .map_err(|e| ConfigError { message: format!("{}: {e}", path.display()) })
    }

    /// Load the first file that exists from `paths`; defaults when none do.
    #[must_use]
    pub fn load_first(paths: &[&Path]) -> Self {
        for path in paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return config,
                    Err(e) => log::error!("skipping config: {e}"),
                }
            }
        }
        log::info!("no configuration file found, using defaults");
        StationConfig::default()
    }

    /// Timings scaled down to milliseconds; keeps the full machinery
    /// testable without quarter-hour waits.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        StationConfig {
            poll_interval_secs: 0.05,
            port_on_interval_secs: 0.08,
            discovery_window_secs: 0.08,
            post_configure_delay_secs: 0.01,
            fndh_port_settle_secs: 0.01,
            startup_retry_secs: 0.1,
            shutdown_retry_secs: 0.1,
            reconnect_delay_secs: 0.05,
            ..StationConfig::default()
        }
    }

    /// Steady-state loop cadence.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    /// Delay between powering successive PDoC ports.
    #[must_use]
    pub fn port_on_interval(&self) -> Duration {
        Duration::from_secs_f64(self.port_on_interval_secs)
    }

    /// Settle time after `configure_all_off`.
    #[must_use]
    pub fn post_configure_delay(&self) -> Duration {
        Duration::from_secs_f64(self.post_configure_delay_secs)
    }

    /// Settle time after an FNDH port write.
    #[must_use]
    pub fn fndh_port_settle(&self) -> Duration {
        Duration::from_secs_f64(self.fndh_port_settle_secs)
    }

    /// Wait before reopening the transport.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }
}

/// A configuration file could not be read or parsed.
#[derive(Debug, Clone)]
pub struct ConfigError {
    /// File and backend error.
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_field_timings() {
        let c = StationConfig::default();
        assert_eq!(c.poll_interval_secs, 15.0);
        assert_eq!(c.port_on_interval_secs, 10.0);
        assert_eq!(c.startup_retry_secs, 600.0);
        assert_eq!(c.max_smartbox, 24);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "station_id: 7\nhost: 10.128.30.1\npoll_interval_secs: 30.0").unwrap();
        let c = StationConfig::load(file.path()).unwrap();
        assert_eq!(c.station_id, 7);
        assert_eq!(c.host, "10.128.30.1");
        assert_eq!(c.poll_interval_secs, 30.0);
        // Untouched keys keep their defaults.
        assert_eq!(c.port, 5000);
    }

    #[test]
    fn unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "station_idd: 7").unwrap();
        assert!(StationConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let c = StationConfig::load_first(&[Path::new("/nonexistent/pasd.yaml")]);
        assert_eq!(c.station_id, 1);
    }
}
