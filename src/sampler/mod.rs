//! # Sampler Module
//!
//! The record producer: folds the latest reading from each data source
//! (satellite fix, temperature probe, auxiliary bus value, link signal
//! strength) into one [`Record`] per sampling tick, timestamped by the
//! clock authority.
//!
//! Source feeds push readings in whenever they have one; the sampler keeps
//! only the most recent value per source together with the epoch at which
//! it was read. At sample time, a source that is missing, invalid, or older
//! than the staleness threshold sets its error bit in the record instead of
//! blocking the snapshot — a record is produced on every tick regardless.

use std::sync::Arc;

use tracing::trace;

use crate::clock::{ClockAuthority, TimeSource};
use crate::record::{Record, ERR_GPS_NO_FIX, ERR_STORAGE_FAIL, ERR_TEMP_FAIL};

/// Narrow interface from the satellite receiver: one decoded fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    /// Ground speed, km/h
    pub speed: f64,
    /// UTC time carried by the fix, epoch milliseconds (0 when absent)
    pub utc_time_ms: u64,
    /// Fix quality was good enough to trust position and time
    pub valid: bool,
}

struct Timestamped<T> {
    value: T,
    read_at_ms: u64,
}

/// Assembles measurement snapshots from the latest source readings.
pub struct Sampler {
    clock: Arc<ClockAuthority>,
    stale_after_ms: u64,
    gps: Option<Timestamped<GpsFix>>,
    temp: Option<Timestamped<f32>>,
    aux: Option<Timestamped<f32>>,
    rssi: i32,
    storage_fault: bool,
}

impl Sampler {
    pub fn new(clock: Arc<ClockAuthority>, stale_after_ms: u64) -> Self {
        Self {
            clock,
            stale_after_ms,
            gps: None,
            temp: None,
            aux: None,
            rssi: 0,
            storage_fault: false,
        }
    }

    /// Feed a decoded satellite fix. A valid fix carrying time also
    /// calibrates the clock at GPS precedence.
    pub fn update_gps(&mut self, fix: GpsFix) {
        if fix.valid && fix.utc_time_ms > 0 {
            self.clock.update_from_source(fix.utc_time_ms, TimeSource::Gps);
        }
        let read_at_ms = self.clock.now().epoch_ms;
        trace!(valid = fix.valid, "gps fix updated");
        self.gps = Some(Timestamped { value: fix, read_at_ms });
    }

    /// Feed a temperature reading, Celsius.
    pub fn update_temp(&mut self, temp: f32) {
        self.temp = Some(Timestamped {
            value: temp,
            read_at_ms: self.clock.now().epoch_ms,
        });
    }

    /// Feed an auxiliary bus-derived value.
    pub fn update_aux(&mut self, value: f32) {
        self.aux = Some(Timestamped {
            value,
            read_at_ms: self.clock.now().epoch_ms,
        });
    }

    /// Feed the current link signal strength, dBm.
    pub fn update_rssi(&mut self, rssi: i32) {
        self.rssi = rssi;
    }

    /// Flag (or clear) a storage fault observed since the last sample.
    pub fn set_storage_fault(&mut self, faulted: bool) {
        self.storage_fault = faulted;
    }

    fn is_fresh<T>(&self, reading: &Timestamped<T>, now_ms: u64) -> bool {
        now_ms.saturating_sub(reading.read_at_ms) <= self.stale_after_ms
    }

    /// Produce one snapshot of the current source state.
    pub fn sample(&self) -> Record {
        let now = self.clock.now();
        let mut error_code = 0u8;

        let (lat, lon, alt, speed, last_gps_ts) = match &self.gps {
            Some(reading) if reading.value.valid && self.is_fresh(reading, now.epoch_ms) => {
                let fix = reading.value;
                (fix.lat, fix.lon, fix.alt, fix.speed, reading.read_at_ms)
            }
            Some(reading) => {
                error_code |= ERR_GPS_NO_FIX;
                let fix = reading.value;
                (fix.lat, fix.lon, fix.alt, fix.speed, reading.read_at_ms)
            }
            None => {
                error_code |= ERR_GPS_NO_FIX;
                (0.0, 0.0, 0.0, 0.0, 0)
            }
        };

        let (temp, last_temp_ts) = match &self.temp {
            Some(reading) if self.is_fresh(reading, now.epoch_ms) => {
                (reading.value, reading.read_at_ms)
            }
            Some(reading) => {
                error_code |= ERR_TEMP_FAIL;
                (reading.value, reading.read_at_ms)
            }
            None => {
                error_code |= ERR_TEMP_FAIL;
                (0.0, 0)
            }
        };

        let (aux_value, last_aux_ts) = match &self.aux {
            Some(reading) => (reading.value, reading.read_at_ms),
            None => (0.0, 0),
        };

        if self.storage_fault {
            error_code |= ERR_STORAGE_FAIL;
        }

        Record {
            ts: now.epoch_ms,
            ts_source: now.source,
            lat,
            lon,
            alt,
            speed,
            temp,
            aux_value,
            last_gps_ts,
            last_temp_ts,
            last_aux_ts,
            error_code,
            delivered: false,
            rssi: self.rssi,
        }
    }
}
