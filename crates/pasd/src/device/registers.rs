// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Register maps for every device type, keyed by map revision.
//!
//! The value of register 1 (`SYS_MBRV`) on first contact pins the map used
//! for all subsequent decodes. Adding a firmware revision is purely
//! additive: define new `*_POLL_N` / `*_CONF_N` tables and register them in
//! the lookup function; existing decode paths are untouched.
//!
//! Each device has two sub-maps:
//!
//! - **POLL** - live telemetry, read in one block every cycle
//! - **CONF** - thresholds and channel configuration, written once at
//!   initialisation and never polled
//!
//! Registers 1..16 are the common system block and are fixed across
//! revisions; everything after may move between firmware releases.

use super::scale::Scale;

/// Decode target for one polled register run.
///
/// Tagging the field here lets the decoder assign values without matching
/// on register names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Modbus register map revision.
    Mbrv,
    /// PCB revision number.
    PcbRev,
    /// Microcontroller device id (2 registers).
    CpuId,
    /// Chip unique device id (8 registers, 16 bytes).
    ChipId,
    /// Firmware version.
    FirmwareVersion,
    /// Uptime in seconds (2 registers).
    Uptime,
    /// Modbus station id read back from the device.
    AddressEcho,
    /// Incoming 48 VDC voltage (SMARTbox).
    Incoming48V,
    /// 5 V PSU output voltage.
    Psu5V,
    /// PSU temperature.
    PsuTemp,
    /// PCB temperature.
    PcbTemp,
    /// Outside temperature.
    OutsideTemp,
    /// First 48 V rail voltage (FNDH).
    Psu48V1Voltage,
    /// Second 48 V rail voltage (FNDH).
    Psu48V2Voltage,
    /// Total 48 V bus current (FNDH).
    Psu48Current,
    /// First 48 V rail temperature (FNDH).
    Psu48V1Temp,
    /// Second 48 V rail temperature (FNDH).
    Psu48V2Temp,
    /// Panel temperature (FNDH).
    PanelTemp,
    /// FNCB board temperature (FNDH).
    FncbTemp,
    /// FNCB humidity in percent (FNDH).
    Humidity,
    /// System status code.
    Status,
    /// Service LED (high byte) and indicator code (low byte).
    Lights,
    /// Generic sensor slot, 1-based.
    SenseTemp(u8),
    /// Port state bitmap, 1-based port number.
    PortState(u8),
    /// Port current, 1-based port number.
    PortCurrent(u8),
    /// FNCC status register.
    FnccStatus,
    /// Value of the FNDH 4-digit field-node switch.
    FieldNodeNumber,
    /// Weather channel raw ADU sample, 1-based channel.
    Sample(u8),
    /// Weather channel edge/stabilised counter, 1-based channel.
    Count(u8),
    /// Deciseconds since the channel counter was last read, 1-based.
    Period(u8),
}

/// One named run of polled registers.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDef {
    /// Symbolic register name (firmware documentation spelling).
    pub name: &'static str,
    /// First register number, 1-based.
    pub number: u16,
    /// Number of consecutive registers.
    pub count: u16,
    /// Human-readable description.
    pub description: &'static str,
    /// Decode target.
    pub field: Field,
}

/// One named run of configuration (threshold) registers.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdDef {
    /// Symbolic register name.
    pub name: &'static str,
    /// First register number, 1-based.
    pub number: u16,
    /// Number of consecutive registers (4 for AH/WH/WL/AL blocks, 1 for
    /// current trip levels).
    pub count: u16,
    /// Human-readable description.
    pub description: &'static str,
    /// Scaling between physical threshold values and raw words.
    pub scale: Scale,
}

/// POLL and CONF tables for one map revision.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    /// `SYS_MBRV` value this map belongs to.
    pub revision: u16,
    /// Polled telemetry registers.
    pub poll: &'static [RegisterDef],
    /// Threshold / configuration registers.
    pub conf: &'static [ThresholdDef],
}

/// Number of registers one poll transaction must read to cover `defs`.
#[must_use]
pub fn poll_block_size(defs: &[RegisterDef]) -> u16 {
    defs.iter().map(|d| d.number + d.count - 1).max().unwrap_or(0)
}

/// Find a definition by name (used by threshold writers and tests).
#[must_use]
pub fn find_conf<'a>(map: &'a RegisterMap, name: &str) -> Option<&'a ThresholdDef> {
    map.conf.iter().find(|d| d.name == name)
}

/// Find the polled register decoding to `field`.
#[must_use]
pub fn find_poll_field(map: &RegisterMap, field: Field) -> Option<&'static RegisterDef> {
    map.poll.iter().find(|d| d.field == field)
}

const fn def(
    name: &'static str,
    number: u16,
    count: u16,
    description: &'static str,
    field: Field,
) -> RegisterDef {
    RegisterDef { name, number, count, description, field }
}

const fn th(
    name: &'static str,
    number: u16,
    count: u16,
    description: &'static str,
    scale: Scale,
) -> ThresholdDef {
    ThresholdDef { name, number, count, description, scale }
}

// ============================================================================
// SMARTbox, register map revision 1
// ============================================================================

/// SMARTbox polled registers, revision 1.
pub static SMARTBOX_POLL_1: &[RegisterDef] = &[
    def("SYS_MBRV", 1, 1, "Modbus register map revision", Field::Mbrv),
    def("SYS_PCBREV", 2, 1, "PCB revision number", Field::PcbRev),
    def("SYS_CPUID", 3, 2, "Microcontroller device ID", Field::CpuId),
    def("SYS_CHIPID", 5, 8, "Chip unique device ID", Field::ChipId),
    def("SYS_FIRMVER", 13, 1, "Firmware version", Field::FirmwareVersion),
    def("SYS_UPTIME", 14, 2, "Uptime in seconds", Field::Uptime),
    def("SYS_ADDRESS", 16, 1, "MODBUS station ID", Field::AddressEcho),
    // From here on register addresses can change between firmware revisions.
    def("SYS_48V_V", 17, 1, "Incoming 48VDC voltage", Field::Incoming48V),
    def("SYS_PSU_V", 18, 1, "PSU output voltage", Field::Psu5V),
    def("SYS_PSUTEMP", 19, 1, "PSU temperature", Field::PsuTemp),
    def("SYS_PCBTEMP", 20, 1, "PCB temperature", Field::PcbTemp),
    def("SYS_OUTTEMP", 21, 1, "Outside temperature", Field::OutsideTemp),
    def("SYS_STATUS", 22, 1, "System status code", Field::Status),
    def("SYS_LIGHTS", 23, 1, "LED state codes", Field::Lights),
    // Additional sensor inputs, some not yet allocated to A/D inputs.
    def("SYS_SENSE01", 24, 1, "Sensor 1 - usage TBD", Field::SenseTemp(1)),
    def("SYS_SENSE02", 25, 1, "Sensor 2 - usage TBD", Field::SenseTemp(2)),
    def("SYS_SENSE03", 26, 1, "Sensor 3 - usage TBD", Field::SenseTemp(3)),
    def("SYS_SENSE04", 27, 1, "Sensor 4 - usage TBD", Field::SenseTemp(4)),
    def("SYS_SENSE05", 28, 1, "Sensor 5 - usage TBD", Field::SenseTemp(5)),
    def("SYS_SENSE06", 29, 1, "Sensor 6 - usage TBD", Field::SenseTemp(6)),
    def("SYS_SENSE07", 30, 1, "Sensor 7 - usage TBD", Field::SenseTemp(7)),
    def("SYS_SENSE08", 31, 1, "Sensor 8 - usage TBD", Field::SenseTemp(8)),
    def("SYS_SENSE09", 32, 1, "Sensor 9 - usage TBD", Field::SenseTemp(9)),
    def("SYS_SENSE10", 33, 1, "Sensor 10 - usage TBD", Field::SenseTemp(10)),
    def("SYS_SENSE11", 34, 1, "Sensor 11 - usage TBD", Field::SenseTemp(11)),
    def("SYS_SENSE12", 35, 1, "Sensor 12 - usage TBD", Field::SenseTemp(12)),
    // Per-port status and current.
    def("P01_STATE", 36, 1, "Port 01 state bitmap", Field::PortState(1)),
    def("P02_STATE", 37, 1, "Port 02 state bitmap", Field::PortState(2)),
    def("P03_STATE", 38, 1, "Port 03 state bitmap", Field::PortState(3)),
    def("P04_STATE", 39, 1, "Port 04 state bitmap", Field::PortState(4)),
    def("P05_STATE", 40, 1, "Port 05 state bitmap", Field::PortState(5)),
    def("P06_STATE", 41, 1, "Port 06 state bitmap", Field::PortState(6)),
    def("P07_STATE", 42, 1, "Port 07 state bitmap", Field::PortState(7)),
    def("P08_STATE", 43, 1, "Port 08 state bitmap", Field::PortState(8)),
    def("P09_STATE", 44, 1, "Port 09 state bitmap", Field::PortState(9)),
    def("P10_STATE", 45, 1, "Port 10 state bitmap", Field::PortState(10)),
    def("P11_STATE", 46, 1, "Port 11 state bitmap", Field::PortState(11)),
    def("P12_STATE", 47, 1, "Port 12 state bitmap", Field::PortState(12)),
    def("P01_CURRENT", 48, 1, "Port 01 current", Field::PortCurrent(1)),
    def("P02_CURRENT", 49, 1, "Port 02 current", Field::PortCurrent(2)),
    def("P03_CURRENT", 50, 1, "Port 03 current", Field::PortCurrent(3)),
    def("P04_CURRENT", 51, 1, "Port 04 current", Field::PortCurrent(4)),
    def("P05_CURRENT", 52, 1, "Port 05 current", Field::PortCurrent(5)),
    def("P06_CURRENT", 53, 1, "Port 06 current", Field::PortCurrent(6)),
    def("P07_CURRENT", 54, 1, "Port 07 current", Field::PortCurrent(7)),
    def("P08_CURRENT", 55, 1, "Port 08 current", Field::PortCurrent(8)),
    def("P09_CURRENT", 56, 1, "Port 09 current", Field::PortCurrent(9)),
    def("P10_CURRENT", 57, 1, "Port 10 current", Field::PortCurrent(10)),
    def("P11_CURRENT", 58, 1, "Port 11 current", Field::PortCurrent(11)),
    def("P12_CURRENT", 59, 1, "Port 12 current", Field::PortCurrent(12)),
];

/// SMARTbox threshold registers, revision 1 (not polled).
///
/// Four-word blocks are (alarm-high, warning-high, warning-low, alarm-low)
/// in the sensor's raw units; port current trips are a single word.
pub static SMARTBOX_CONF_1: &[ThresholdDef] = &[
    th("SYS_48V_V_TH", 1001, 4, "Incoming 48VDC voltage AH, WH, WL, AL", Scale::Volts),
    th("SYS_PSU_V_TH", 1005, 4, "PSU output voltage AH, WH, WL, AL", Scale::Volts),
    th("SYS_PSUTEMP_TH", 1009, 4, "PSU temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_PCBTEMP_TH", 1013, 4, "PCB temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_OUTTEMP_TH", 1017, 4, "Outside temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE01_TH", 1021, 4, "Sensor 1 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE02_TH", 1025, 4, "Sensor 2 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE03_TH", 1029, 4, "Sensor 3 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE04_TH", 1033, 4, "Sensor 4 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE05_TH", 1037, 4, "Sensor 5 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE06_TH", 1041, 4, "Sensor 6 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE07_TH", 1045, 4, "Sensor 7 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE08_TH", 1049, 4, "Sensor 8 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE09_TH", 1053, 4, "Sensor 9 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE10_TH", 1057, 4, "Sensor 10 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE11_TH", 1061, 4, "Sensor 11 AH, WH, WL, AL", Scale::Temperature),
    th("SYS_SENSE12_TH", 1065, 4, "Sensor 12 AH, WH, WL, AL", Scale::Temperature),
    // No hysteresis or low-current limits for FEM currents, just one ADC value.
    th("P01_CURRENT_TH", 1069, 1, "Port 01 current trip threshold", Scale::MilliAmps),
    th("P02_CURRENT_TH", 1070, 1, "Port 02 current trip threshold", Scale::MilliAmps),
    th("P03_CURRENT_TH", 1071, 1, "Port 03 current trip threshold", Scale::MilliAmps),
    th("P04_CURRENT_TH", 1072, 1, "Port 04 current trip threshold", Scale::MilliAmps),
    th("P05_CURRENT_TH", 1073, 1, "Port 05 current trip threshold", Scale::MilliAmps),
    th("P06_CURRENT_TH", 1074, 1, "Port 06 current trip threshold", Scale::MilliAmps),
    th("P07_CURRENT_TH", 1075, 1, "Port 07 current trip threshold", Scale::MilliAmps),
    th("P08_CURRENT_TH", 1076, 1, "Port 08 current trip threshold", Scale::MilliAmps),
    th("P09_CURRENT_TH", 1077, 1, "Port 09 current trip threshold", Scale::MilliAmps),
    th("P10_CURRENT_TH", 1078, 1, "Port 10 current trip threshold", Scale::MilliAmps),
    th("P11_CURRENT_TH", 1079, 1, "Port 11 current trip threshold", Scale::MilliAmps),
    th("P12_CURRENT_TH", 1080, 1, "Port 12 current trip threshold", Scale::MilliAmps),
];

static SMARTBOX_MAP_1: RegisterMap =
    RegisterMap { revision: 1, poll: SMARTBOX_POLL_1, conf: SMARTBOX_CONF_1 };

/// Sensor registers smoothed by the low-pass filter constant at
/// configuration time (voltages, temperatures, port currents).
pub static SMARTBOX_SMOOTHED_REGISTERS: &[u16] = &[
    17, 18, 19, // 48 V in, PSU out, PSU temperature
    24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, // sensor slots
    48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, // port currents
];

/// Look up the SMARTbox register map for a revision.
#[must_use]
pub fn smartbox_map(revision: u16) -> Option<&'static RegisterMap> {
    match revision {
        1 => Some(&SMARTBOX_MAP_1),
        _ => None,
    }
}

// ============================================================================
// FNDH, register map revision 1
// ============================================================================

/// FNDH polled registers, revision 1.
pub static FNDH_POLL_1: &[RegisterDef] = &[
    def("SYS_MBRV", 1, 1, "Modbus register map revision", Field::Mbrv),
    def("SYS_PCBREV", 2, 1, "PCB revision number", Field::PcbRev),
    def("SYS_CPUID", 3, 2, "Microcontroller device ID", Field::CpuId),
    def("SYS_CHIPID", 5, 8, "Chip unique device ID", Field::ChipId),
    def("SYS_FIRMVER", 13, 1, "Firmware version", Field::FirmwareVersion),
    def("SYS_UPTIME", 14, 2, "Uptime in seconds", Field::Uptime),
    def("SYS_ADDRESS", 16, 1, "MODBUS station ID", Field::AddressEcho),
    def("SYS_48V1_V", 17, 1, "48VDC rail 1 voltage", Field::Psu48V1Voltage),
    def("SYS_48V2_V", 18, 1, "48VDC rail 2 voltage", Field::Psu48V2Voltage),
    def("SYS_48V_I", 19, 1, "Total 48VDC bus current", Field::Psu48Current),
    def("SYS_48V1_TEMP", 20, 1, "48VDC rail 1 temperature", Field::Psu48V1Temp),
    def("SYS_48V2_TEMP", 21, 1, "48VDC rail 2 temperature", Field::Psu48V2Temp),
    def("SYS_PANELTEMP", 22, 1, "Panel temperature", Field::PanelTemp),
    def("SYS_FNCBTEMP", 23, 1, "FNCB board temperature", Field::FncbTemp),
    def("SYS_HUMIDITY", 24, 1, "FNCB relative humidity", Field::Humidity),
    def("SYS_STATUS", 25, 1, "System status code", Field::Status),
    def("SYS_LIGHTS", 26, 1, "LED state codes", Field::Lights),
    // 28 PDoC port state bitmaps.
    def("P01_STATE", 35, 1, "Port 01 state bitmap", Field::PortState(1)),
    def("P02_STATE", 36, 1, "Port 02 state bitmap", Field::PortState(2)),
    def("P03_STATE", 37, 1, "Port 03 state bitmap", Field::PortState(3)),
    def("P04_STATE", 38, 1, "Port 04 state bitmap", Field::PortState(4)),
    def("P05_STATE", 39, 1, "Port 05 state bitmap", Field::PortState(5)),
    def("P06_STATE", 40, 1, "Port 06 state bitmap", Field::PortState(6)),
    def("P07_STATE", 41, 1, "Port 07 state bitmap", Field::PortState(7)),
    def("P08_STATE", 42, 1, "Port 08 state bitmap", Field::PortState(8)),
    def("P09_STATE", 43, 1, "Port 09 state bitmap", Field::PortState(9)),
    def("P10_STATE", 44, 1, "Port 10 state bitmap", Field::PortState(10)),
    def("P11_STATE", 45, 1, "Port 11 state bitmap", Field::PortState(11)),
    def("P12_STATE", 46, 1, "Port 12 state bitmap", Field::PortState(12)),
    def("P13_STATE", 47, 1, "Port 13 state bitmap", Field::PortState(13)),
    def("P14_STATE", 48, 1, "Port 14 state bitmap", Field::PortState(14)),
    def("P15_STATE", 49, 1, "Port 15 state bitmap", Field::PortState(15)),
    def("P16_STATE", 50, 1, "Port 16 state bitmap", Field::PortState(16)),
    def("P17_STATE", 51, 1, "Port 17 state bitmap", Field::PortState(17)),
    def("P18_STATE", 52, 1, "Port 18 state bitmap", Field::PortState(18)),
    def("P19_STATE", 53, 1, "Port 19 state bitmap", Field::PortState(19)),
    def("P20_STATE", 54, 1, "Port 20 state bitmap", Field::PortState(20)),
    def("P21_STATE", 55, 1, "Port 21 state bitmap", Field::PortState(21)),
    def("P22_STATE", 56, 1, "Port 22 state bitmap", Field::PortState(22)),
    def("P23_STATE", 57, 1, "Port 23 state bitmap", Field::PortState(23)),
    def("P24_STATE", 58, 1, "Port 24 state bitmap", Field::PortState(24)),
    def("P25_STATE", 59, 1, "Port 25 state bitmap", Field::PortState(25)),
    def("P26_STATE", 60, 1, "Port 26 state bitmap", Field::PortState(26)),
    def("P27_STATE", 61, 1, "Port 27 state bitmap", Field::PortState(27)),
    def("P28_STATE", 62, 1, "Port 28 state bitmap", Field::PortState(28)),
];

/// FNDH threshold registers, revision 1 (not polled).
pub static FNDH_CONF_1: &[ThresholdDef] = &[
    th("SYS_48V1_V_TH", 1001, 4, "48VDC rail 1 voltage AH, WH, WL, AL", Scale::Volts),
    th("SYS_48V2_V_TH", 1005, 4, "48VDC rail 2 voltage AH, WH, WL, AL", Scale::Volts),
    th("SYS_48V_I_TH", 1009, 4, "48VDC bus current AH, WH, WL, AL", Scale::Amps),
    th("SYS_48V1_TEMP_TH", 1013, 4, "48VDC rail 1 temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_48V2_TEMP_TH", 1017, 4, "48VDC rail 2 temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_PANELTEMP_TH", 1021, 4, "Panel temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_FNCBTEMP_TH", 1025, 4, "FNCB temperature AH, WH, WL, AL", Scale::Temperature),
    th("SYS_HUMIDITY_TH", 1029, 4, "FNCB humidity AH, WH, WL, AL", Scale::None),
];

static FNDH_MAP_1: RegisterMap = RegisterMap { revision: 1, poll: FNDH_POLL_1, conf: FNDH_CONF_1 };

/// Look up the FNDH register map for a revision.
#[must_use]
pub fn fndh_map(revision: u16) -> Option<&'static RegisterMap> {
    match revision {
        1 => Some(&FNDH_MAP_1),
        _ => None,
    }
}

// ============================================================================
// FNCC (communications microcontroller)
// ============================================================================

/// FNCC polled registers. Revisions 1 and 3 share this map (3 was shipped
/// by a firmware release that bumped the revision without moving anything).
pub static FNCC_POLL_1: &[RegisterDef] = &[
    def("SYS_MBRV", 1, 1, "Modbus register map revision", Field::Mbrv),
    def("SYS_PCBREV", 2, 1, "PCB revision number", Field::PcbRev),
    def("SYS_CPUID", 3, 2, "Microcontroller device ID", Field::CpuId),
    def("SYS_CHIPID", 5, 8, "Chip unique device ID", Field::ChipId),
    def("SYS_FIRMVER", 13, 1, "Firmware version", Field::FirmwareVersion),
    def("SYS_UPTIME", 14, 2, "Uptime in seconds", Field::Uptime),
    def("SYS_ADDRESS", 16, 1, "MODBUS station ID", Field::AddressEcho),
    def("SYS_STATUS", 17, 1, "FNCC status", Field::FnccStatus),
    def("FIELD_NODE_NUMBER", 18, 1, "Value set on FNDH 4-digit numeric switch", Field::FieldNodeNumber),
];

static FNCC_MAP_1: RegisterMap = RegisterMap { revision: 1, poll: FNCC_POLL_1, conf: &[] };
static FNCC_MAP_3: RegisterMap = RegisterMap { revision: 3, poll: FNCC_POLL_1, conf: &[] };

/// Look up the FNCC register map for a revision.
#[must_use]
pub fn fncc_map(revision: u16) -> Option<&'static RegisterMap> {
    match revision {
        1 => Some(&FNCC_MAP_1),
        3 => Some(&FNCC_MAP_3),
        _ => None,
    }
}

// ============================================================================
// Weather station (SMARTbox variant)
// ============================================================================

/// Weather station polled registers, revision 1.
///
/// The seven multi-mode channels each expose an instantaneous ADU sample,
/// an event counter, and the deciseconds elapsed since the counter was last
/// read (and reset). COUNT and PERIOD registers are read together in the
/// poll block so the pairs stay consistent.
pub static WEATHER_POLL_1: &[RegisterDef] = &[
    def("SYS_MBRV", 1, 1, "Modbus register map revision", Field::Mbrv),
    def("SYS_PCBREV", 2, 1, "PCB revision number", Field::PcbRev),
    def("SYS_CPUID", 3, 2, "Microcontroller device ID", Field::CpuId),
    def("SYS_CHIPID", 5, 8, "Chip unique device ID", Field::ChipId),
    def("SYS_FIRMVER", 13, 1, "Firmware version", Field::FirmwareVersion),
    def("SYS_UPTIME", 14, 2, "Uptime in seconds", Field::Uptime),
    def("SYS_ADDRESS", 16, 1, "MODBUS station ID", Field::AddressEcho),
    def("SYS_48V_V", 17, 1, "Incoming 48VDC voltage", Field::Incoming48V),
    def("SYS_PSU_V", 18, 1, "PSU output voltage", Field::Psu5V),
    def("SYS_PSUTEMP", 19, 1, "PSU temperature", Field::PsuTemp),
    def("SYS_PCBTEMP", 20, 1, "PCB temperature", Field::PcbTemp),
    def("SYS_OUTTEMP", 21, 1, "Outside temperature", Field::OutsideTemp),
    def("SYS_STATUS", 22, 1, "System status code", Field::Status),
    def("SYS_LIGHTS", 23, 1, "LED state codes", Field::Lights),
    def("SAMPLE_1", 24, 1, "Sensor 1 - raw ADU", Field::Sample(1)),
    def("SAMPLE_2", 25, 1, "Sensor 2 - raw ADU", Field::Sample(2)),
    def("SAMPLE_3", 26, 1, "Sensor 3 - raw ADU", Field::Sample(3)),
    def("SAMPLE_4", 27, 1, "Sensor 4 - raw ADU", Field::Sample(4)),
    def("SAMPLE_5", 28, 1, "Sensor 5 - raw ADU", Field::Sample(5)),
    def("SAMPLE_6", 29, 1, "Sensor 6 - raw ADU", Field::Sample(6)),
    def("SAMPLE_7", 30, 1, "Sensor 7 - raw ADU", Field::Sample(7)),
    def("COUNT_1", 31, 1, "Counter of sensor 1 events", Field::Count(1)),
    def("COUNT_2", 32, 1, "Counter of sensor 2 events", Field::Count(2)),
    def("COUNT_3", 33, 1, "Counter of sensor 3 events", Field::Count(3)),
    def("COUNT_4", 34, 1, "Counter of sensor 4 events", Field::Count(4)),
    def("COUNT_5", 35, 1, "Counter of sensor 5 events", Field::Count(5)),
    def("COUNT_6", 36, 1, "Counter of sensor 6 events", Field::Count(6)),
    def("COUNT_7", 37, 1, "Counter of sensor 7 events", Field::Count(7)),
    def("PERIOD_1", 38, 1, "Deciseconds since last COUNT_1 read", Field::Period(1)),
    def("PERIOD_2", 39, 1, "Deciseconds since last COUNT_2 read", Field::Period(2)),
    def("PERIOD_3", 40, 1, "Deciseconds since last COUNT_3 read", Field::Period(3)),
    def("PERIOD_4", 41, 1, "Deciseconds since last COUNT_4 read", Field::Period(4)),
    def("PERIOD_5", 42, 1, "Deciseconds since last COUNT_5 read", Field::Period(5)),
    def("PERIOD_6", 43, 1, "Deciseconds since last COUNT_6 read", Field::Period(6)),
    def("PERIOD_7", 44, 1, "Deciseconds since last COUNT_7 read", Field::Period(7)),
];

/// Weather station channel configuration registers, revision 1.
///
/// Each block is (mode, rising edge, falling edge, hold time ms).
pub static WEATHER_CONF_1: &[ThresholdDef] = &[
    th("SENSOR_1_CONF", 1001, 4, "Sensor 1: mode, rise, fall, hold", Scale::None),
    th("SENSOR_2_CONF", 1005, 4, "Sensor 2: mode, rise, fall, hold", Scale::None),
    th("SENSOR_3_CONF", 1009, 4, "Sensor 3: mode, rise, fall, hold", Scale::None),
    th("SENSOR_4_CONF", 1013, 4, "Sensor 4: mode, rise, fall, hold", Scale::None),
    th("SENSOR_5_CONF", 1017, 4, "Sensor 5: mode, rise, fall, hold", Scale::None),
    th("SENSOR_6_CONF", 1021, 4, "Sensor 6: mode, rise, fall, hold", Scale::None),
    th("SENSOR_7_CONF", 1025, 4, "Sensor 7: mode, rise, fall, hold", Scale::None),
];

static WEATHER_MAP_1: RegisterMap =
    RegisterMap { revision: 1, poll: WEATHER_POLL_1, conf: WEATHER_CONF_1 };

/// Look up the weather station register map for a revision.
#[must_use]
pub fn weather_map(revision: u16) -> Option<&'static RegisterMap> {
    match revision {
        1 => Some(&WEATHER_MAP_1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs_disjoint(defs: &[RegisterDef]) {
        let mut covered = std::collections::BTreeSet::new();
        for d in defs {
            for r in d.number..d.number + d.count {
                assert!(covered.insert(r), "{} overlaps at register {r}", d.name);
            }
        }
    }

    #[test]
    fn poll_maps_have_no_overlaps() {
        runs_disjoint(SMARTBOX_POLL_1);
        runs_disjoint(FNDH_POLL_1);
        runs_disjoint(FNCC_POLL_1);
        runs_disjoint(WEATHER_POLL_1);
    }

    #[test]
    fn poll_block_sizes() {
        assert_eq!(poll_block_size(SMARTBOX_POLL_1), 59);
        assert_eq!(poll_block_size(FNDH_POLL_1), 62);
        assert_eq!(poll_block_size(FNCC_POLL_1), 18);
        assert_eq!(poll_block_size(WEATHER_POLL_1), 44);
    }

    #[test]
    fn conf_blocks_are_contiguous() {
        // Threshold blocks are written as one multi-register run; any gap
        // would corrupt the write.
        for conf in [SMARTBOX_CONF_1, FNDH_CONF_1, WEATHER_CONF_1] {
            let mut expected = conf[0].number;
            for d in conf {
                assert_eq!(d.number, expected, "{} not contiguous", d.name);
                expected += d.count;
            }
        }
    }

    #[test]
    fn revision_lookup() {
        assert!(smartbox_map(1).is_some());
        assert!(smartbox_map(2).is_none());
        assert!(fncc_map(3).is_some());
        assert_eq!(fncc_map(3).unwrap().poll.len(), FNCC_POLL_1.len());
    }

    #[test]
    fn system_block_is_identical_everywhere() {
        // Registers 1..16 must be fixed across device types: discovery
        // reads them before it knows what is answering.
        for polls in [SMARTBOX_POLL_1, FNDH_POLL_1, FNCC_POLL_1, WEATHER_POLL_1] {
            for (a, b) in SMARTBOX_POLL_1.iter().zip(polls.iter()).take(7) {
                assert_eq!(a.name, b.name);
                assert_eq!(a.number, b.number);
                assert_eq!(a.count, b.count);
            }
        }
    }
}
