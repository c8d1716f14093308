// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status and indicator codes shared by the field devices.
//!
//! `Unknown` is internal only: it means "never polled" and can never be
//! decoded from hardware.

use std::fmt;

/// System status from the `SYS_STATUS` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    /// No contact with the hardware yet.
    #[default]
    Unknown,
    /// Initialised, system health OK.
    Ok,
    /// At least one sensor in WARNING, none in ALARM or RECOVERY.
    Warning,
    /// At least one sensor in ALARM.
    Alarm,
    /// At least one sensor in RECOVERY, none in ALARM.
    Recovery,
    /// Thresholds not yet written; outputs disabled.
    Uninitialised,
    /// Local technician requested a full 48 V power-down (long press).
    Powerdown,
}

impl StatusCode {
    /// Decode the raw register value. Out-of-range values decode to
    /// `Unknown` and are logged by the caller.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => StatusCode::Ok,
            1 => StatusCode::Warning,
            2 => StatusCode::Alarm,
            3 => StatusCode::Recovery,
            4 => StatusCode::Uninitialised,
            5 => StatusCode::Powerdown,
            _ => StatusCode::Unknown,
        }
    }

    /// The raw register value, `-1` for the internal `Unknown`.
    #[must_use]
    pub fn as_i8(self) -> i8 {
        match self {
            StatusCode::Unknown => -1,
            StatusCode::Ok => 0,
            StatusCode::Warning => 1,
            StatusCode::Alarm => 2,
            StatusCode::Recovery => 3,
            StatusCode::Uninitialised => 4,
            StatusCode::Powerdown => 5,
        }
    }

    /// True for any state worth flagging in the poll loop.
    #[must_use]
    pub fn is_abnormal(self) -> bool {
        !matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::Ok => "OK",
            StatusCode::Warning => "WARNING",
            StatusCode::Alarm => "ALARM",
            StatusCode::Recovery => "RECOVERY",
            StatusCode::Uninitialised => "UNINITIALISED",
            StatusCode::Powerdown => "POWERDOWN",
        };
        f.write_str(name)
    }
}

/// FNCC (communications microcontroller) status. The FNCC watches the
/// shared serial bus from inside the FNDH and reports line faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FnccStatus {
    /// No contact with the hardware yet.
    #[default]
    Unknown,
    /// System health OK.
    Ok,
    /// Bridge module being reset; should never be observed over the bus.
    Reset,
    /// UART framing error seen on the shared bus.
    ModbusFrameError,
    /// Hardware timer tripped: a receive line held low too long.
    ModbusStuck,
    /// Both the framing error and the stuck-line timer have fired.
    ModbusFrameErrorStuck,
}

impl FnccStatus {
    /// Decode the raw register value.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => FnccStatus::Ok,
            1 => FnccStatus::Reset,
            2 => FnccStatus::ModbusFrameError,
            3 => FnccStatus::ModbusStuck,
            4 => FnccStatus::ModbusFrameErrorStuck,
            _ => FnccStatus::Unknown,
        }
    }
}

impl fmt::Display for FnccStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FnccStatus::Unknown => "STATUS_UNKNOWN",
            FnccStatus::Ok => "STATUS_OK",
            FnccStatus::Reset => "STATUS_RESET",
            FnccStatus::ModbusFrameError => "STATE_MODBUS_FRAME_ERROR",
            FnccStatus::ModbusStuck => "STATE_MODBUS_STUCK",
            FnccStatus::ModbusFrameErrorStuck => "STATE_MODBUS_FRAME_ERROR_STUCK",
        };
        f.write_str(name)
    }
}

/// Front-panel indicator LED state, from the low byte of `SYS_LIGHTS`.
///
/// Colour x flash-pattern matrix plus the alternating recovery patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)] // variant names are the firmware's own vocabulary
pub enum IndicatorCode {
    #[default]
    Unknown,
    Off,
    Green,
    GreenSlow,
    GreenFast,
    GreenVFast,
    GreenDotDash,
    Yellow,
    YellowSlow,
    YellowFast,
    YellowVFast,
    YellowDotDash,
    Red,
    RedSlow,
    RedFast,
    RedVFast,
    RedDotDash,
    YellowRed,
    YellowRedSlow,
    GreenRed,
}

impl IndicatorCode {
    /// Decode the low byte of `SYS_LIGHTS`.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => IndicatorCode::Off,
            10 => IndicatorCode::Green,
            11 => IndicatorCode::GreenSlow,
            12 => IndicatorCode::GreenFast,
            13 => IndicatorCode::GreenVFast,
            14 => IndicatorCode::GreenDotDash,
            20 => IndicatorCode::Yellow,
            21 => IndicatorCode::YellowSlow,
            22 => IndicatorCode::YellowFast,
            23 => IndicatorCode::YellowVFast,
            24 => IndicatorCode::YellowDotDash,
            30 => IndicatorCode::Red,
            31 => IndicatorCode::RedSlow,
            32 => IndicatorCode::RedFast,
            33 => IndicatorCode::RedVFast,
            34 => IndicatorCode::RedDotDash,
            40 => IndicatorCode::YellowRed,
            41 => IndicatorCode::YellowRedSlow,
            50 => IndicatorCode::GreenRed,
            _ => IndicatorCode::Unknown,
        }
    }

    /// The raw code value, `-1` for the internal `Unknown`.
    #[must_use]
    pub fn as_i8(self) -> i8 {
        match self {
            IndicatorCode::Unknown => -1,
            IndicatorCode::Off => 0,
            IndicatorCode::Green => 10,
            IndicatorCode::GreenSlow => 11,
            IndicatorCode::GreenFast => 12,
            IndicatorCode::GreenVFast => 13,
            IndicatorCode::GreenDotDash => 14,
            IndicatorCode::Yellow => 20,
            IndicatorCode::YellowSlow => 21,
            IndicatorCode::YellowFast => 22,
            IndicatorCode::YellowVFast => 23,
            IndicatorCode::YellowDotDash => 24,
            IndicatorCode::Red => 30,
            IndicatorCode::RedSlow => 31,
            IndicatorCode::RedFast => 32,
            IndicatorCode::RedVFast => 33,
            IndicatorCode::RedDotDash => 34,
            IndicatorCode::YellowRed => 40,
            IndicatorCode::YellowRedSlow => 41,
            IndicatorCode::GreenRed => 50,
        }
    }
}

impl fmt::Display for IndicatorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The names are the uppercase firmware spellings.
        let name = match self {
            IndicatorCode::Unknown => "UNKNOWN",
            IndicatorCode::Off => "OFF",
            IndicatorCode::Green => "GREEN",
            IndicatorCode::GreenSlow => "GREENSLOW",
            IndicatorCode::GreenFast => "GREENFAST",
            IndicatorCode::GreenVFast => "GREENVFAST",
            IndicatorCode::GreenDotDash => "GREENDOTDASH",
            IndicatorCode::Yellow => "YELLOW",
            IndicatorCode::YellowSlow => "YELLOWSLOW",
            IndicatorCode::YellowFast => "YELLOWFAST",
            IndicatorCode::YellowVFast => "YELLOWVFAST",
            IndicatorCode::YellowDotDash => "YELLOWDOTDASH",
            IndicatorCode::Red => "RED",
            IndicatorCode::RedSlow => "REDSLOW",
            IndicatorCode::RedFast => "REDFAST",
            IndicatorCode::RedVFast => "REDVFAST",
            IndicatorCode::RedDotDash => "REDDOTDASH",
            IndicatorCode::YellowRed => "YELLOWRED",
            IndicatorCode::YellowRedSlow => "YELLOWREDSLOW",
            IndicatorCode::GreenRed => "GREENRED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_both_ways() {
        for raw in 0..=5u16 {
            let code = StatusCode::from_raw(raw);
            assert_eq!(code.as_i8() as u16, raw);
        }
        assert_eq!(StatusCode::from_raw(99), StatusCode::Unknown);
        assert_eq!(StatusCode::Unknown.as_i8(), -1);
    }

    #[test]
    fn indicator_codes_map_both_ways() {
        for raw in 0..=255u8 {
            let code = IndicatorCode::from_raw(raw);
            if code != IndicatorCode::Unknown {
                assert_eq!(code.as_i8() as u8, raw);
            }
        }
    }

    #[test]
    fn fncc_codes() {
        assert_eq!(FnccStatus::from_raw(3), FnccStatus::ModbusStuck);
        assert_eq!(FnccStatus::from_raw(4), FnccStatus::ModbusFrameErrorStuck);
        assert_eq!(FnccStatus::from_raw(17), FnccStatus::Unknown);
    }
}
