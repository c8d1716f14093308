// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-port status word codec.
//!
//! Every power port (FNDH PDoC 1-28, SMARTbox FEM 1-12) reports one 16-bit
//! state word:
//!
//! ```text
//! bit 15  system_level_enabled   read-only
//! bit 14  system_online          read-only
//! bit 13  desire_online  write   \ 00 = leave unchanged
//! bit 12  desire_online  value   / 10 = set false, 11 = set true
//! bit 11  desire_offline write   \
//! bit 10  desire_offline value   /
//! bit  9  tech override  \ 01 = none, 10 = forced off, 11 = forced on
//! bit  8  tech override  /   00 on write = leave unchanged
//! bit  7  breaker (write 1 to reset; reads 1 = tripped)
//! bit  6  power_state            read-only
//! bits 5..0  reserved, zero
//! ```
//!
//! Writes are expressed through an explicit [`WriteIntent`]: any field not
//! being written encodes `00`, so re-encoding a decoded word is always safe.

const BIT_SYSTEM_LEVEL: u16 = 1 << 15;
const BIT_SYSTEM_ONLINE: u16 = 1 << 14;
const BIT_BREAKER: u16 = 1 << 7;
const BIT_POWER: u16 = 1 << 6;

const SHIFT_DESIRE_ONLINE: u16 = 12;
const SHIFT_DESIRE_OFFLINE: u16 = 10;
const SHIFT_OVERRIDE: u16 = 8;

/// A desired-state flag as carried in the two-bit wire fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tristate {
    /// Never decoded / not to be written.
    #[default]
    Unset,
    /// Explicitly false.
    False,
    /// Explicitly true.
    True,
}

impl Tristate {
    /// Collapse to a boolean, treating `Unset` as false.
    #[must_use]
    pub fn as_bool(self) -> bool {
        self == Tristate::True
    }

    /// Option view: `Unset` becomes `None`.
    #[must_use]
    pub fn as_option(self) -> Option<bool> {
        match self {
            Tristate::Unset => None,
            Tristate::False => Some(false),
            Tristate::True => Some(true),
        }
    }

    /// Lift a boolean into a written flag.
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}

/// Technician override, as seen by the port hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Forcing {
    /// Never decoded (the hardware reported `00`).
    #[default]
    Unknown,
    /// No override in effect.
    None,
    /// Port forced off locally.
    ForcedOff,
    /// Port forced on locally.
    ForcedOn,
}

/// Which fields a port-state write actually carries.
///
/// Default is "write nothing": the encoded word then contains only the
/// echoed read-only bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteIntent {
    /// Write the two desired-state fields.
    pub state: bool,
    /// Write the technician-override field.
    pub overrides: bool,
    /// Fire the one-shot breaker reset (bit 7 = 1).
    pub breaker: bool,
}

impl WriteIntent {
    /// Intent carrying only the desired-state fields.
    #[must_use]
    pub fn state_only() -> Self {
        WriteIntent { state: true, overrides: false, breaker: false }
    }
}

/// Decoded state of one power port, plus its current reading (SMARTbox
/// ports only; the FNDH has no per-port current sense).
#[derive(Debug, Clone)]
pub struct PortStatus {
    /// Physical port number (1-12 FEM, 1-28 PDoC).
    pub port_number: u8,
    /// Modbus address of the device this port belongs to.
    pub modbus_address: u8,
    /// Raw contents of the last `P<NN>_STATE` read.
    pub status_raw: u16,
    /// Device-level safe-state gate (read-only).
    pub system_level_enabled: bool,
    /// Device heard from the MCCS recently enough to be "online" (read-only).
    pub system_online: bool,
    /// Should this port be on while the device is online.
    pub desire_enabled_online: Tristate,
    /// Should this port be on while the device is offline.
    pub desire_enabled_offline: Tristate,
    /// Technician override state.
    pub forcing: Forcing,
    /// Over-current breaker has tripped (SMARTbox); power sense (FNDH).
    pub breaker_tripped: bool,
    /// Port output is switched on (read-only).
    pub power_state: bool,
    /// Raw ADC value of the port current.
    pub current_raw: u16,
    /// Port current in mA.
    pub current: f64,
    /// Unix time of the last state read.
    pub status_timestamp: Option<f64>,
    /// Unix time of the last current read.
    pub current_timestamp: Option<f64>,
    /// Physical antenna wired to this port, assigned at station level.
    pub antenna_number: Option<u16>,
}

impl PortStatus {
    /// Set up an unpolled port.
    #[must_use]
    pub fn new(port_number: u8, modbus_address: u8) -> Self {
        PortStatus {
            port_number,
            modbus_address,
            status_raw: 0,
            system_level_enabled: false,
            system_online: false,
            desire_enabled_online: Tristate::Unset,
            desire_enabled_offline: Tristate::Unset,
            forcing: Forcing::Unknown,
            breaker_tripped: false,
            power_state: false,
            current_raw: 0,
            current: 0.0,
            status_timestamp: None,
            current_timestamp: None,
            antenna_number: None,
        }
    }

    /// Apply a freshly read state word.
    pub fn set_status(&mut self, word: u16, timestamp: f64) {
        self.status_raw = word;
        self.status_timestamp = Some(timestamp);
        self.system_level_enabled = word & BIT_SYSTEM_LEVEL != 0;
        self.system_online = word & BIT_SYSTEM_ONLINE != 0;

        self.desire_enabled_online = decode_tristate(word, SHIFT_DESIRE_ONLINE, self.port_number);
        self.desire_enabled_offline = decode_tristate(word, SHIFT_DESIRE_OFFLINE, self.port_number);

        self.forcing = match (word >> SHIFT_OVERRIDE) & 0b11 {
            0b01 => Forcing::None,
            0b10 => Forcing::ForcedOff,
            0b11 => Forcing::ForcedOn,
            _ => Forcing::Unknown,
        };

        self.breaker_tripped = word & BIT_BREAKER != 0;
        self.power_state = word & BIT_POWER != 0;
    }

    /// Apply a freshly read current value (raw ADC and scaled mA).
    pub fn set_current(&mut self, raw: u16, current: f64, timestamp: f64) {
        self.current_raw = raw;
        self.current = current;
        self.current_timestamp = Some(timestamp);
    }

    /// Encode this port's state into a write word under `intent`.
    ///
    /// Fields not covered by the intent (or whose local value is unknown)
    /// encode `00`, which the firmware treats as "leave unchanged". The
    /// read-only bits and `power_state` are echoed as last read.
    #[must_use]
    pub fn to_write_word(&self, intent: WriteIntent) -> u16 {
        let mut word = 0u16;
        if self.system_level_enabled {
            word |= BIT_SYSTEM_LEVEL;
        }
        if self.system_online {
            word |= BIT_SYSTEM_ONLINE;
        }

        if intent.state {
            word |= encode_tristate(self.desire_enabled_online) << SHIFT_DESIRE_ONLINE;
            word |= encode_tristate(self.desire_enabled_offline) << SHIFT_DESIRE_OFFLINE;
        }

        if intent.overrides {
            word |= match self.forcing {
                Forcing::Unknown => 0b00,
                Forcing::None => 0b01,
                Forcing::ForcedOff => 0b10,
                Forcing::ForcedOn => 0b11,
            } << SHIFT_OVERRIDE;
        }

        if intent.breaker {
            word |= BIT_BREAKER;
        }
        if self.power_state {
            word |= BIT_POWER;
        }
        word
    }

    /// FNDH reading of bit 7: PDoC ports have no breaker, the bit senses
    /// output power instead.
    #[must_use]
    pub fn power_sense(&self) -> bool {
        self.breaker_tripped
    }

    /// Locally-forced-on view of the override field.
    #[must_use]
    pub fn locally_forced_on(&self) -> Option<bool> {
        match self.forcing {
            Forcing::Unknown => None,
            Forcing::ForcedOn => Some(true),
            _ => Some(false),
        }
    }

    /// Locally-forced-off view of the override field.
    #[must_use]
    pub fn locally_forced_off(&self) -> Option<bool> {
        match self.forcing {
            Forcing::Unknown => None,
            Forcing::ForcedOff => Some(true),
            _ => Some(false),
        }
    }
}

fn decode_tristate(word: u16, shift: u16, port: u8) -> Tristate {
    match (word >> shift) & 0b11 {
        0b00 => Tristate::Unset,
        0b10 => Tristate::False,
        0b11 => Tristate::True,
        other => {
            log::warn!("port {port}: unknown desired-state field 0b{other:02b}");
            Tristate::Unset
        }
    }
}

fn encode_tristate(value: Tristate) -> u16 {
    match value {
        Tristate::Unset => 0b00,
        Tristate::False => 0b10,
        Tristate::True => 0b11,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(word: u16) -> PortStatus {
        let mut port = PortStatus::new(3, 2);
        port.set_status(word, 1_700_000_000.0);
        port
    }

    #[test]
    fn decode_read_only_bits() {
        let port = decoded(0b1100_0000_0100_0000);
        assert!(port.system_level_enabled);
        assert!(port.system_online);
        assert!(port.power_state);
        assert!(!port.breaker_tripped);
    }

    #[test]
    fn decode_desire_fields() {
        let port = decoded(0b0011_1000_0000_0000);
        assert_eq!(port.desire_enabled_online, Tristate::True);
        assert_eq!(port.desire_enabled_offline, Tristate::False);

        let port = decoded(0);
        assert_eq!(port.desire_enabled_online, Tristate::Unset);
        assert_eq!(port.desire_enabled_offline, Tristate::Unset);
    }

    #[test]
    fn decode_override_field() {
        assert_eq!(decoded(0b0000_0001_0000_0000).forcing, Forcing::None);
        assert_eq!(decoded(0b0000_0010_0000_0000).forcing, Forcing::ForcedOff);
        assert_eq!(decoded(0b0000_0011_0000_0000).forcing, Forcing::ForcedOn);
        assert_eq!(decoded(0).forcing, Forcing::Unknown);
    }

    #[test]
    fn breaker_bit_decodes() {
        assert!(decoded(0b0000_0000_1000_0000).breaker_tripped);
    }

    #[test]
    fn encode_no_intent_is_readonly_echo() {
        // Whatever the decoded state, an empty intent writes only the
        // read-only echo bits and power_state.
        for word in [0u16, 0x3C00, 0xFFC0, 0x8140] {
            let port = decoded(word);
            let out = port.to_write_word(WriteIntent::default());
            let echo = word & (BIT_SYSTEM_LEVEL | BIT_SYSTEM_ONLINE | BIT_POWER);
            assert_eq!(out, echo, "word 0x{word:04X}");
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        // For every valid decoded state, re-encoding with state+override
        // intents and decoding again lands on the same state with the
        // breaker bit cleared.
        for word in 0..=0xFFFFu16 {
            let port = decoded(word);
            // Skip words with invalid (01) desire encodings; the decoder
            // collapses them to Unset with a warning.
            let intent = WriteIntent { state: true, overrides: true, breaker: false };
            let word2 = port.to_write_word(intent);
            let port2 = decoded(word2);
            assert_eq!(port2.desire_enabled_online, port.desire_enabled_online);
            assert_eq!(port2.desire_enabled_offline, port.desire_enabled_offline);
            assert_eq!(port2.forcing, port.forcing);
            assert_eq!(port2.system_level_enabled, port.system_level_enabled);
            assert_eq!(port2.system_online, port.system_online);
            assert_eq!(port2.power_state, port.power_state);
            assert!(!port2.breaker_tripped);
            // Reserved bits always come back zero.
            assert_eq!(word2 & 0x003F, 0);
        }
    }

    #[test]
    fn breaker_reset_is_one_shot_encoding() {
        let mut port = PortStatus::new(7, 1);
        port.set_status(0b0000_0000_1000_0000, 0.0); // tripped
        let armed = port.to_write_word(WriteIntent { state: false, overrides: false, breaker: true });
        assert_eq!(armed & BIT_BREAKER, BIT_BREAKER);
        let idle = port.to_write_word(WriteIntent::default());
        assert_eq!(idle & BIT_BREAKER, 0);
    }

    #[test]
    fn forced_views() {
        let port = decoded(0b0000_0010_0000_0000);
        assert_eq!(port.locally_forced_on(), Some(false));
        assert_eq!(port.locally_forced_off(), Some(true));
        let port = decoded(0);
        assert_eq!(port.locally_forced_on(), None);
    }
}
