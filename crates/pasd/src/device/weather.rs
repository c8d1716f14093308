// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The weather station: a SMARTbox variant with seven multi-mode analog
//! channels.
//!
//! Each channel exposes three polled registers: `SAMPLE_N` (instantaneous
//! raw ADU), `COUNT_N` (edge counter or stabilised value, depending on the
//! configured mode), and `PERIOD_N` (deciseconds since `COUNT_N` was last
//! read and reset).
//!
//! # Edge detection
//!
//! From the "low" state the channel firmware runs:
//!
//! 1. wait for ADU > rising edge threshold
//! 2. wait the hold time
//! 3. still above? transition to high, else back to 1
//! 4. wait for ADU < falling edge threshold
//! 5. wait the hold time
//! 6. still below? transition to low, else back to 4
//! 7. back to 1
//!
//! The channel assignments for the deployed sensor head are fixed: rain
//! (falling edge), wind speed (rising edge), wind direction (stabilised),
//! temperature and light (raw).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::command::envelope;
use crate::transport::Connection;

use super::registers::{self, Field, RegisterMap};
use super::scale::Scale;
use super::status::StatusCode;
use super::{decode_sys_field, unix_now, word_at, DeviceError, DeviceResult, Lights, SysBlock};

/// Cap on accumulated counter history, in seconds of summed periods.
pub const MAX_HISTORY_SECONDS: f64 = 3600.0;

/// Rain gauge calibration: millimetres of rain per bucket tip.
pub const MM_PER_COUNT: f64 = 0.2794;

/// Anemometer calibration: km/h of wind per count per second.
pub const KPH_PER_CPS: f64 = 2.400;

/// Wind vane decode table: `(ADU boundary, azimuth east of north)`.
/// An ADU below the first boundary or above the last is an open or shorted
/// vane and decodes to `None`.
pub static WIND_DIRS: &[(u16, Option<f64>)] = &[
    (500, None),
    (789, Some(112.5)),
    (912, Some(67.5)),
    (1088, Some(90.0)),
    (1431, Some(157.5)),
    (1817, Some(135.0)),
    (2107, Some(202.5)),
    (2472, Some(180.0)),
    (2823, Some(22.5)),
    (3120, Some(45.0)),
    (3358, Some(247.5)),
    (3477, Some(225.0)),
    (3641, Some(337.5)),
    (3761, Some(0.0)),
    (3848, Some(292.5)),
    (3942, Some(315.0)),
    (4041, Some(270.0)),
    (4095, None),
];

/// Thermistor table 1: degrees C x 100 on 256-ADU boundaries, end points
/// tweaked to give out-of-range values.
static TEMPS1: &[i32; 16] =
    &[20000, 12068, 9470, 8004, 6957, 6120, 5406, 4765, 4168, 3592, 3020, 2430, 1798, 1083, 201, -20000];

/// Thermistor table 2: delta degrees C x 100 per segment.
static TEMPS2: &[i32; 16] = &[0, 2598, 1466, 1047, 837, 714, 641, 597, 576, 572, 590, 632, 715, 882, 1294, 0];

/// Channel operating mode, the first word of the channel's CONF block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorMode {
    /// Raw ADC sampling; `COUNT_N`/`PERIOD_N` do nothing.
    #[default]
    Raw,
    /// Count rising edges.
    RisingEdges,
    /// Count falling edges.
    FallingEdges,
    /// Count both edges.
    BothEdges,
    /// `COUNT_N` carries the raw ADU, valid only while jitter stayed under
    /// the rising-edge threshold for the hold time.
    Stabilised,
}

impl SensorMode {
    fn as_word(self) -> u16 {
        match self {
            SensorMode::Raw => 0,
            SensorMode::RisingEdges => 1,
            SensorMode::FallingEdges => 2,
            SensorMode::BothEdges => 3,
            SensorMode::Stabilised => 4,
        }
    }

    fn counts_edges(self) -> bool {
        matches!(self, SensorMode::RisingEdges | SensorMode::FallingEdges | SensorMode::BothEdges)
    }
}

/// One of the seven multipurpose sensor channels.
#[derive(Debug, Clone)]
pub struct WeatherSensor {
    /// Channel number, 1-7.
    pub sid: u8,
    /// Operating mode.
    pub mode: SensorMode,
    /// ADU must exceed this to count as a rising edge (also the jitter
    /// bound in stabilised mode).
    pub rising_edge: u16,
    /// ADU must fall below this to count as a falling edge.
    pub falling_edge: u16,
    /// Debounce hold time in milliseconds.
    pub hold_time_ms: u16,
    /// Last `SAMPLE_N` value.
    pub sample: u16,
    /// Last `COUNT_N` value.
    pub count: u16,
    /// Last `PERIOD_N` value (deciseconds).
    pub period: u16,
    /// Rolling `(count, period)` history, capped at
    /// [`MAX_HISTORY_SECONDS`] of summed periods.
    history: VecDeque<(u16, u16)>,
}

impl WeatherSensor {
    fn new(sid: u8, mode: SensorMode, rising_edge: u16, falling_edge: u16, hold_time_ms: u16) -> Self {
        WeatherSensor {
            sid,
            mode,
            rising_edge,
            falling_edge,
            hold_time_ms,
            sample: 0,
            count: 0,
            period: 0,
            history: VecDeque::new(),
        }
    }

    /// Fold the most recent `(count, period)` pair into the history.
    pub fn push_reading(&mut self) {
        if self.mode.counts_edges() {
            self.history.push_back((self.count, self.period));
            let total: f64 = self.history.iter().map(|&(_, p)| f64::from(p)).sum::<f64>() * 0.1;
            if total >= MAX_HISTORY_SECONDS {
                self.history.pop_front();
            }
        }
    }

    /// The channel value for raw (mode 0) or stabilised (mode 4) channels.
    #[must_use]
    pub fn value(&self) -> Option<u16> {
        match self.mode {
            SensorMode::Raw => Some(self.sample),
            SensorMode::Stabilised => Some(self.count),
            _ => {
                log::error!("sensor {}: value() called in edge-counting mode", self.sid);
                None
            }
        }
    }

    /// Edge rate in counts per second, from the most recent pair.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        if !self.mode.counts_edges() {
            log::error!("sensor {}: rate() called outside edge-counting mode", self.sid);
            return None;
        }
        if self.period == 0 {
            return Some(0.0);
        }
        Some(10.0 * f64::from(self.count) / f64::from(self.period))
    }

    /// Total `(counts, seconds)` over the accumulated history.
    #[must_use]
    pub fn averaged(&self) -> Option<(u32, f64)> {
        if !self.mode.counts_edges() {
            return None;
        }
        let counts: u32 = self.history.iter().map(|&(c, _)| u32::from(c)).sum();
        let seconds: f64 = self.history.iter().map(|&(_, p)| f64::from(p)).sum::<f64>() / 10.0;
        Some((counts, seconds))
    }

    /// The channel's 4-word CONF block: (mode, rise, fall, hold ms).
    #[must_use]
    pub fn config_words(&self) -> [u16; 4] {
        [self.mode.as_word(), self.rising_edge, self.falling_edge, self.hold_time_ms]
    }
}

/// The weather station on the station bus.
pub struct Weather {
    conn: Arc<Connection>,
    /// Modbus station address.
    pub modbus_address: u8,
    map: Option<&'static RegisterMap>,
    /// Common system block from the last poll.
    pub sys: SysBlock,
    /// Incoming 48 VDC voltage (Volts).
    pub incoming_voltage: f64,
    /// 5 V PSU output voltage (Volts).
    pub psu_voltage: f64,
    /// PSU temperature (deg C).
    pub psu_temp: f64,
    /// PCB temperature (deg C).
    pub pcb_temp: f64,
    /// Outside temperature sensor on the box itself (deg C).
    pub outside_temp: f64,
    /// System status from the last poll.
    pub status: StatusCode,
    /// Service LED and indicator state from the last poll.
    pub lights: Lights,
    /// The seven sensor channels, index 0 = channel 1.
    pub sensors: [WeatherSensor; 7],
}

impl Weather {
    /// Set up an unpolled weather station with the deployed sensor-head
    /// channel assignments.
    #[must_use]
    pub fn new(conn: Arc<Connection>, modbus_address: u8) -> Self {
        Weather {
            conn,
            modbus_address,
            map: None,
            sys: SysBlock::default(),
            incoming_voltage: 0.0,
            psu_voltage: 0.0,
            psu_temp: 0.0,
            pcb_temp: 0.0,
            outside_temp: 0.0,
            status: StatusCode::Unknown,
            lights: Lights::default(),
            sensors: [
                WeatherSensor::new(1, SensorMode::FallingEdges, 3800, 800, 100), // rain gauge
                WeatherSensor::new(2, SensorMode::RisingEdges, 3800, 800, 20),   // anemometer
                WeatherSensor::new(3, SensorMode::Stabilised, 10, 0, 100),       // wind vane
                WeatherSensor::new(4, SensorMode::Raw, 0, 0, 0),                 // thermistor
                WeatherSensor::new(5, SensorMode::Raw, 0, 0, 0),                 // light sensor
                WeatherSensor::new(6, SensorMode::Raw, 0, 0, 0),                 // unused
                WeatherSensor::new(7, SensorMode::Raw, 0, 0, 0),                 // unused
            ],
        }
    }

    /// Sensor channel by 1-based channel number.
    #[must_use]
    pub fn sensor(&self, sid: u8) -> &WeatherSensor {
        &self.sensors[(sid - 1) as usize]
    }

    fn sensor_mut(&mut self, sid: u8) -> &mut WeatherSensor {
        &mut self.sensors[(sid - 1) as usize]
    }

    /// Read the whole POLL block in one transaction and decode every field.
    pub fn poll_data(&mut self) -> DeviceResult<()> {
        let poll = self.map.map_or(registers::WEATHER_POLL_1, |m| m.poll);
        let block = registers::poll_block_size(poll);
        let values = self.conn.read_registers(self.modbus_address, 1, block)?;
        let read_timestamp = unix_now();

        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::weather_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);

        for def in map.poll {
            if decode_sys_field(&mut self.sys, def, &values) {
                continue;
            }
            let raw = word_at(&values, def);
            match def.field {
                Field::Incoming48V => self.incoming_voltage = Scale::Volts.apply(raw),
                Field::Psu5V => self.psu_voltage = Scale::Volts.apply(raw),
                Field::PsuTemp => self.psu_temp = Scale::Temperature.apply(raw),
                Field::PcbTemp => self.pcb_temp = Scale::Temperature.apply(raw),
                Field::OutsideTemp => self.outside_temp = Scale::Temperature.apply(raw),
                Field::Status => self.status = StatusCode::from_raw(raw),
                Field::Lights => self.lights = Lights::from_raw(raw),
                Field::Sample(n) => self.sensor_mut(n).sample = raw,
                Field::Count(n) => self.sensor_mut(n).count = raw,
                Field::Period(n) => {
                    // PERIOD follows COUNT in the map, so the pair is
                    // complete once the period lands.
                    let sensor = self.sensor_mut(n);
                    sensor.period = raw;
                    sensor.push_reading();
                }
                _ => {}
            }
        }
        self.sys.readtime = Some(read_timestamp);
        Ok(())
    }

    /// Quick liveness check: read the first 16 registers and return the
    /// uptime in seconds.
    pub fn read_uptime(&mut self) -> DeviceResult<u32> {
        let values = self.conn.read_registers(self.modbus_address, 1, 16)?;
        let mbrv = values[0];
        if let Some(pinned) = self.map {
            if pinned.revision != mbrv {
                return Err(DeviceError::MapUnknown(mbrv));
            }
        }
        let map = registers::weather_map(mbrv).ok_or(DeviceError::MapUnknown(mbrv))?;
        self.map = Some(map);
        self.sys.mbrv = mbrv;
        self.sys.pcbrv = values[1];
        self.sys.uptime = crate::transport::frame::words_to_u32(values[13], values[14]);
        Ok(self.sys.uptime)
    }

    /// Write every channel's 4-word CONF block, then `SYS_STATUS <- 1` to
    /// leave UNINITIALISED.
    pub fn configure(&mut self) -> DeviceResult<()> {
        let map = self.map.ok_or_else(|| {
            DeviceError::Config("no register map, poll the device first".into())
        })?;
        for sensor in &self.sensors {
            let name = format!("SENSOR_{}_CONF", sensor.sid);
            let def = registers::find_conf(map, &name)
                .ok_or_else(|| DeviceError::Config(format!("map has no {name}")))?;
            self.conn.write_multiple_registers(
                self.modbus_address,
                def.number,
                &sensor.config_words(),
            )?;
        }
        let status_reg = registers::find_poll_field(map, Field::Status)
            .ok_or_else(|| DeviceError::Config("map has no SYS_STATUS register".into()))?;
        self.conn.write_register(self.modbus_address, status_reg.number, 1)?;
        Ok(())
    }

    /// Reset the microcontroller through the command envelope.
    pub fn reset(&self) -> Result<(), crate::command::CommandError> {
        envelope::reset_microcontroller(&self.conn, self.modbus_address)
    }

    /// Rapid-sample `reglist` every `interval_ms` milliseconds until the
    /// on-device buffer fills, then read it back de-interleaved.
    pub fn get_sample(
        &self,
        interval_ms: u32,
        reglist: &[u16],
    ) -> Result<std::collections::BTreeMap<u16, Vec<u16>>, crate::command::CommandError> {
        crate::command::sampling::get_sample(
            &self.conn,
            self.modbus_address,
            interval_ms,
            reglist,
            std::time::Duration::from_millis(500),
        )
    }

    // ------------------------------------------------------------------
    // Derived quantities
    // ------------------------------------------------------------------

    /// Wind direction as a compass bearing (0 = north, 90 = east), from
    /// the stabilised vane channel. `None` for an open or shorted vane.
    #[must_use]
    pub fn wind_dir(&self) -> Option<f64> {
        let v = self.sensor(3).value()?;
        for &(boundary, azimuth) in WIND_DIRS {
            if v < boundary {
                return azimuth;
            }
        }
        None
    }

    /// Rolling average rainfall in mm/hour over the accumulated history.
    #[must_use]
    pub fn rain_avg(&self) -> Option<f64> {
        let (counts, seconds) = self.sensor(1).averaged()?;
        if seconds == 0.0 {
            return None;
        }
        Some(3600.0 * MM_PER_COUNT * f64::from(counts) / seconds)
    }

    /// Instantaneous wind speed in km/hour from the anemometer channel.
    #[must_use]
    pub fn wind_speed(&self) -> Option<f64> {
        let cps = self.sensor(2).rate()?;
        Some(KPH_PER_CPS * cps)
    }

    /// Air temperature in degrees C, from the two-table piecewise-linear
    /// decode of the 12-bit thermistor ADU.
    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        let v = u32::from(self.sensor(4).value()?);
        let index = ((v & 0x0F00) >> 8) as usize;
        let delta = (TEMPS2[index] * (v & 0x00FF) as i32 + 0x80) >> 8;
        Some(f64::from(TEMPS1[index] - delta) / 100.0)
    }

    /// Ambient light level in Lux, assuming the nominal 1.5k pull-up.
    #[must_use]
    pub fn light(&self) -> Option<f64> {
        let v = self.sensor(5).value()?;
        Some(114_400.0 - (f64::from(v) / 4095.0 * 114_400.0))
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = self.sys.readtime.map_or(f64::NAN, |t| unix_now() - t);
        writeln!(f, "Weather at address: {} as of {age:.0}s ago:", self.modbus_address)?;
        writeln!(f, "    Status: {} ({})", self.status.as_i8(), self.status)?;
        match self.wind_dir() {
            Some(d) => writeln!(f, "    Wind direction: {d:.1} degrees E of N")?,
            None => writeln!(f, "    Wind direction: ?")?,
        }
        match self.wind_speed() {
            Some(s) => writeln!(f, "    Wind speed: {s:.4} km/hour")?,
            None => writeln!(f, "    Wind speed: ?")?,
        }
        match self.rain_avg() {
            Some(r) => writeln!(f, "    Rain: {r:.4} mm/hour")?,
            None => writeln!(f, "    Rain: ?")?,
        }
        match self.temperature() {
            Some(t) => writeln!(f, "    Temperature: {t:.2} degC")?,
            None => writeln!(f, "    Temperature: ?")?,
        }
        match self.light() {
            Some(l) => write!(f, "    Light: {l:.4} Lux"),
            None => write!(f, "    Light: ?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_sensor(sid: u8) -> WeatherSensor {
        WeatherSensor::new(sid, SensorMode::Raw, 0, 0, 0)
    }

    #[test]
    fn wind_direction_table_lookup() {
        let mut sensors: Vec<WeatherSensor> = (1..=7).map(raw_sensor).collect();
        sensors[2].mode = SensorMode::Stabilised;

        let mut check = |adu: u16, expected: Option<f64>| {
            sensors[2].count = adu;
            let v = sensors[2].value().unwrap();
            let mut result = None;
            for &(boundary, azimuth) in WIND_DIRS {
                if v < boundary {
                    result = azimuth;
                    break;
                }
            }
            assert_eq!(result, expected, "ADU {adu}");
        };

        check(100, None); // open circuit
        check(600, Some(112.5));
        check(3700, Some(0.0));
        check(4000, Some(270.0));
        check(4095, None); // shorted
    }

    #[test]
    fn edge_rate_and_average() {
        let mut s = WeatherSensor::new(2, SensorMode::RisingEdges, 3800, 800, 20);
        s.count = 30;
        s.period = 150; // 15 s
        assert_eq!(s.rate(), Some(2.0));
        s.push_reading();
        s.count = 10;
        s.period = 50; // 5 s
        s.push_reading();
        assert_eq!(s.averaged(), Some((40, 20.0)));
    }

    #[test]
    fn zero_period_rate_is_zero() {
        let mut s = WeatherSensor::new(1, SensorMode::FallingEdges, 3800, 800, 100);
        s.count = 5;
        s.period = 0;
        assert_eq!(s.rate(), Some(0.0));
    }

    #[test]
    fn history_capped_by_total_period() {
        let mut s = WeatherSensor::new(1, SensorMode::FallingEdges, 3800, 800, 100);
        // Each reading covers 1000 s; the 3600 s cap keeps the window from
        // growing past four entries.
        for _ in 0..10 {
            s.count = 1;
            s.period = 10_000;
            s.push_reading();
        }
        let (_, seconds) = s.averaged().unwrap();
        assert!(seconds <= MAX_HISTORY_SECONDS + 1000.0);
        assert!(s.history.len() <= 4);
    }

    #[test]
    fn value_rejected_in_edge_mode() {
        let s = WeatherSensor::new(1, SensorMode::FallingEdges, 3800, 800, 100);
        assert_eq!(s.value(), None);
        let s = raw_sensor(4);
        assert_eq!(s.rate(), None);
    }

    #[test]
    fn thermistor_decode_reference_points() {
        let mut sensors: Vec<WeatherSensor> = (1..=7).map(raw_sensor).collect();
        // ADU 0x000 sits on the tweaked lower boundary: 200.00 degC.
        sensors[3].sample = 0x0000;
        let v = u32::from(sensors[3].value().unwrap());
        let index = ((v & 0x0F00) >> 8) as usize;
        let delta = (TEMPS2[index] * (v & 0xFF) as i32 + 0x80) >> 8;
        assert_eq!(f64::from(TEMPS1[index] - delta) / 100.0, 200.0);

        // Mid-segment value interpolates between the table points.
        sensors[3].sample = 0x0480;
        let v = u32::from(sensors[3].value().unwrap());
        let index = ((v & 0x0F00) >> 8) as usize;
        assert_eq!(index, 4);
        let delta = (TEMPS2[index] * (v & 0xFF) as i32 + 0x80) >> 8;
        let temp = f64::from(TEMPS1[index] - delta) / 100.0;
        assert!(temp < 69.57 && temp > 61.20, "temp {temp}");
    }

    #[test]
    fn light_scale_endpoints() {
        let full = 114_400.0 - (0.0 / 4095.0 * 114_400.0);
        assert_eq!(full, 114_400.0);
        let dark = 114_400.0 - (4095.0 / 4095.0 * 114_400.0);
        assert_eq!(dark, 0.0);
    }

    #[test]
    fn config_words_layout() {
        let s = WeatherSensor::new(2, SensorMode::RisingEdges, 3800, 800, 20);
        assert_eq!(s.config_words(), [1, 3800, 800, 20]);
    }
}

#[cfg(test)]
mod poll_tests {
    use super::*;
    use crate::transport::{loopback_pair, RegisterView};
    use std::time::Duration;

    /// Serve one poll read from a hand-built weather register block.
    #[test]
    fn poll_decodes_derived_quantities() {
        let (master, slave) = loopback_pair();
        let slave_conn = Connection::new(Box::new(slave));

        let server = std::thread::spawn(move || {
            let mut view = RegisterView::new();
            for regnum in 1..=44u16 {
                view.insert(regnum, 0);
            }
            view.insert(1, 1); // SYS_MBRV
            view.insert(2, 1); // SYS_PCBREV
            view.insert(17, 4790); // 48 V in
            view.insert(22, 0); // SYS_STATUS = OK
            view.insert(31, 5); // COUNT_1: 5 rain tips
            view.insert(38, 600); // PERIOD_1: 60 s
            view.insert(32, 30); // COUNT_2: 30 anemometer pulses
            view.insert(39, 150); // PERIOD_2: 15 s
            view.insert(33, 3700); // COUNT_3: stabilised vane ADU, due north
            view.insert(27, 0x0480); // SAMPLE_4: thermistor ADU
            view.insert(28, 2047); // SAMPLE_5: light ADU, roughly half scale
            slave_conn.listen_for_packet(44, &mut view, Duration::from_secs(2), None);
        });

        let conn = Arc::new(Connection::new(Box::new(master)));
        let mut weather = Weather::new(conn, 44);
        weather.poll_data().unwrap();
        server.join().unwrap();

        assert_eq!(weather.sys.mbrv, 1);
        assert_eq!(weather.incoming_voltage, 47.9);
        assert_eq!(weather.status, StatusCode::Ok);

        assert_eq!(weather.wind_dir(), Some(0.0));
        // 30 counts over 15 s = 2 cps -> 4.8 km/h.
        assert_eq!(weather.wind_speed(), Some(4.8));
        // 5 tips over 60 s -> 3600 * 0.2794 * 5 / 60 mm/h.
        let rain = weather.rain_avg().unwrap();
        assert!((rain - 83.82).abs() < 1e-9, "rain {rain}");
        // ADU 0x480: segment 4 of the thermistor tables.
        let temp = weather.temperature().unwrap();
        assert!((temp - 65.38).abs() < 1e-9, "temp {temp}");
        let light = weather.light().unwrap();
        assert!((light - 57213.97).abs() < 0.01, "light {light}");
    }
}
