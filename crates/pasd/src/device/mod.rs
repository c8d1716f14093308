// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed models of the field devices on the station bus.
//!
//! Every device follows the same contract: the value of register 1
//! (`SYS_MBRV`) on first contact pins a register map, `poll_data()` reads
//! the whole POLL block in one transaction and decodes it through that
//! map, and `configure()` writes the CONF block before releasing the
//! device from its UNINITIALISED state.
//!
//! # Modules
//!
//! - `registers` - static register map tables keyed by map revision
//! - `scale` - raw/physical unit conversions
//! - `status` - status and indicator code enums
//! - `port` - per-port state word codec
//! - `smartbox` - 12-port FEM power box
//! - `fndh` - the 28-port power and comms concentrator
//! - `fncc` - communications watchdog inside the FNDH
//! - `weather` - weather station (SMARTbox variant)

pub mod fncc;
pub mod fndh;
pub mod port;
pub mod registers;
pub mod scale;
pub mod smartbox;
pub mod status;
pub mod weather;

// Re-exports
pub use fncc::Fncc;
pub use fndh::Fndh;
pub use port::{Forcing, PortStatus, Tristate, WriteIntent};
pub use registers::{Field, RegisterDef, RegisterMap, ThresholdDef};
pub use scale::Scale;
pub use smartbox::SmartBox;
pub use status::{FnccStatus, IndicatorCode, StatusCode};
pub use weather::{SensorMode, Weather, WeatherSensor};

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::transport::{frame, TransportError};

/// Result alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors from device-level operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The underlying bus transaction failed.
    Transport(TransportError),
    /// `SYS_MBRV` is not in the compiled-in table, or a poll implied a
    /// different revision than the one pinned at first contact.
    MapUnknown(u16),
    /// Configuration data missing or inconsistent with the register map.
    Config(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::MapUnknown(rev) => write!(f, "unknown register map revision {rev}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DeviceError {
    fn from(e: TransportError) -> Self {
        DeviceError::Transport(e)
    }
}

impl DeviceError {
    /// True when the failure means "the device did not answer usefully";
    /// the poll loop skips such devices for the cycle rather than aborting.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            DeviceError::Transport(
                TransportError::NoReply
                    | TransportError::AddressMismatch { .. }
                    | TransportError::Malformed
            ) | DeviceError::MapUnknown(_)
        )
    }
}

/// Current unix time as fractional seconds; the timestamp unit used in
/// snapshots, state rows and metric batches.
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// The common system block every device carries in registers 1..16.
#[derive(Debug, Clone, Default)]
pub struct SysBlock {
    /// Register map revision, pinned at first successful poll.
    pub mbrv: u16,
    /// PCB revision number.
    pub pcbrv: u16,
    /// Microcontroller device id.
    pub cpuid: u32,
    /// 16-byte unique chip id.
    pub chipid: [u8; 16],
    /// Firmware version.
    pub firmware_version: u16,
    /// Seconds since the device booted.
    pub uptime: u32,
    /// Modbus address read back from `SYS_ADDRESS`; should always equal
    /// the address polled.
    pub address_echo: u16,
    /// Unix time of the last successful poll.
    pub readtime: Option<f64>,
}

impl SysBlock {
    /// CPU id rendered the way the service tooling expects it.
    #[must_use]
    pub fn cpuid_hex(&self) -> String {
        format!("0x{:08X}", self.cpuid)
    }

    /// Chip id as the 16 concatenated bytes rendered as ASCII hex.
    #[must_use]
    pub fn chipid_hex(&self) -> String {
        let mut out = String::with_capacity(32);
        for b in &self.chipid {
            out.push_str(&format!("{b:02X}"));
        }
        out
    }
}

/// Raw register run for `def` out of a full poll block (register 1 first).
pub(crate) fn word_at(values: &[u16], def: &RegisterDef) -> u16 {
    values[(def.number - 1) as usize]
}

/// 32-bit field spanning two registers, high half in the lower register.
pub(crate) fn dword_at(values: &[u16], def: &RegisterDef) -> u32 {
    let i = (def.number - 1) as usize;
    frame::words_to_u32(values[i], values[i + 1])
}

/// 16-byte chip id from an 8-register run, big-endian within each register.
pub(crate) fn chipid_at(values: &[u16], def: &RegisterDef) -> [u8; 16] {
    let mut out = [0u8; 16];
    let i = (def.number - 1) as usize;
    for (n, &word) in values[i..i + 8].iter().enumerate() {
        out[n * 2] = (word >> 8) as u8;
        out[n * 2 + 1] = (word & 0xFF) as u8;
    }
    out
}

/// Decode the fields of the common system block. Returns `true` when the
/// field was one of the shared ones (and has been consumed).
pub(crate) fn decode_sys_field(sys: &mut SysBlock, def: &RegisterDef, values: &[u16]) -> bool {
    match def.field {
        Field::Mbrv => sys.mbrv = word_at(values, def),
        Field::PcbRev => sys.pcbrv = word_at(values, def),
        Field::CpuId => sys.cpuid = dword_at(values, def),
        Field::ChipId => sys.chipid = chipid_at(values, def),
        Field::FirmwareVersion => sys.firmware_version = word_at(values, def),
        Field::Uptime => sys.uptime = dword_at(values, def),
        Field::AddressEcho => sys.address_echo = word_at(values, def),
        _ => return false,
    }
    true
}

/// Decoded `SYS_LIGHTS` register: service LED boolean in the high byte,
/// indicator code in the low byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lights {
    /// Blue service LED switched on.
    pub service_led: bool,
    /// Front-panel indicator state.
    pub indicator: IndicatorCode,
}

impl Lights {
    pub(crate) fn from_raw(raw: u16) -> Self {
        Lights {
            service_led: (raw >> 8) != 0,
            indicator: IndicatorCode::from_raw((raw & 0xFF) as u8),
        }
    }
}

/// Analog alarm/warning thresholds for one device, keyed by CONF register
/// name and held in physical units. Written to hardware through the map's
/// scaling during `configure()`.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    values: BTreeMap<String, Vec<f64>>,
}

impl Thresholds {
    /// Empty threshold set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the values for one CONF register block.
    pub fn insert(&mut self, name: &str, values: Vec<f64>) {
        self.values.insert(name.to_string(), values);
    }

    /// Values for one CONF register block, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Field-test defaults for a SMARTbox: generous sensor windows and a
    /// 496 mA FEM trip level.
    #[must_use]
    pub fn smartbox_defaults() -> Self {
        let mut t = Thresholds::new();
        t.insert("SYS_48V_V_TH", vec![50.0, 49.0, 45.0, 40.0]);
        t.insert("SYS_PSU_V_TH", vec![5.5, 5.3, 4.7, 4.5]);
        for name in ["SYS_PSUTEMP_TH", "SYS_PCBTEMP_TH", "SYS_OUTTEMP_TH"] {
            t.insert(name, vec![85.0, 70.0, -5.0, -10.0]);
        }
        for n in 1..=12 {
            t.insert(&format!("SYS_SENSE{n:02}_TH"), vec![85.0, 70.0, -5.0, -10.0]);
            t.insert(&format!("P{n:02}_CURRENT_TH"), vec![496.0]);
        }
        t
    }

    /// Field-test defaults for the FNDH.
    #[must_use]
    pub fn fndh_defaults() -> Self {
        let mut t = Thresholds::new();
        t.insert("SYS_48V1_V_TH", vec![50.0, 49.0, 45.0, 40.0]);
        t.insert("SYS_48V2_V_TH", vec![50.0, 49.0, 45.0, 40.0]);
        t.insert("SYS_48V_I_TH", vec![25.0, 20.0, 0.0, 0.0]);
        for name in ["SYS_48V1_TEMP_TH", "SYS_48V2_TEMP_TH", "SYS_PANELTEMP_TH", "SYS_FNCBTEMP_TH"]
        {
            t.insert(name, vec![85.0, 70.0, -5.0, -10.0]);
        }
        t.insert("SYS_HUMIDITY_TH", vec![90.0, 80.0, 0.0, 0.0]);
        t
    }

    /// Scale this set into the contiguous raw block covering `conf`,
    /// returning the start register and the values to write.
    pub(crate) fn to_block(&self, conf: &[ThresholdDef]) -> DeviceResult<(u16, Vec<u16>)> {
        let start = conf
            .iter()
            .map(|d| d.number)
            .min()
            .ok_or_else(|| DeviceError::Config("empty CONF map".into()))?;
        let total: usize = conf.iter().map(|d| d.count as usize).sum();
        let mut block = vec![0u16; total];
        for def in conf {
            let values = self
                .get(def.name)
                .ok_or_else(|| DeviceError::Config(format!("no thresholds for {}", def.name)))?;
            if values.len() != def.count as usize {
                return Err(DeviceError::Config(format!(
                    "{} needs {} values, got {}",
                    def.name,
                    def.count,
                    values.len()
                )));
            }
            let offset = (def.number - start) as usize;
            for (i, &v) in values.iter().enumerate() {
                block[offset + i] = def.scale.reverse(v);
            }
        }
        Ok((start, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registers::SMARTBOX_CONF_1;

    #[test]
    fn chipid_renders_as_ascii_hex() {
        let mut sys = SysBlock::default();
        sys.chipid = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 255];
        assert_eq!(sys.chipid_hex(), "000102030405060708090A0B0C0D0EFF");
    }

    #[test]
    fn chipid_decodes_big_endian_per_register() {
        let def = RegisterDef {
            name: "SYS_CHIPID",
            number: 5,
            count: 8,
            description: "",
            field: Field::ChipId,
        };
        let mut values = vec![0u16; 16];
        values[4] = 0x0102; // register 5
        values[11] = 0xAABB; // register 12
        let id = chipid_at(&values, &def);
        assert_eq!(id[0], 0x01);
        assert_eq!(id[1], 0x02);
        assert_eq!(id[14], 0xAA);
        assert_eq!(id[15], 0xBB);
    }

    #[test]
    fn lights_split() {
        let l = Lights::from_raw(0x010B);
        assert!(l.service_led);
        assert_eq!(l.indicator, IndicatorCode::GreenSlow);
        let l = Lights::from_raw(0x0000);
        assert!(!l.service_led);
        assert_eq!(l.indicator, IndicatorCode::Off);
    }

    #[test]
    fn smartbox_default_thresholds_fill_the_block() {
        let t = Thresholds::smartbox_defaults();
        let (start, block) = t.to_block(SMARTBOX_CONF_1).unwrap();
        assert_eq!(start, 1001);
        assert_eq!(block.len(), 80);
        // 48 V alarm-high is 50.00 V -> 5000 raw, first word of the block.
        assert_eq!(block[0], 5000);
        // Port 12 trip current is the last word.
        assert_eq!(block[79], 496);
    }

    #[test]
    fn missing_threshold_is_a_config_error() {
        let t = Thresholds::new();
        assert!(matches!(t.to_block(SMARTBOX_CONF_1), Err(DeviceError::Config(_))));
    }
}
