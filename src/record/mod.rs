//! # Record Module
//!
//! The measurement snapshot value type shared by the producer, the
//! store-and-forward buffer, and the delivery path.
//!
//! Records are immutable once written; the only field ever mutated after
//! creation is `delivered`, set by the delivery coordinator once the remote
//! collector has confirmed the batch. Records cross task boundaries by
//! value, never by reference.
//!
//! On flash each record is one self-describing JSON line (JSONL), which is
//! what makes corrupt-line skipping and FIFO prefix removal line-oriented
//! operations.

use serde::{Deserialize, Serialize};

use crate::clock::TimeSource;
use crate::error::Result;

/// GPS reported no valid fix when the record was produced
pub const ERR_GPS_NO_FIX: u8 = 1 << 0;
/// Temperature probe read failed or was stale
pub const ERR_TEMP_FAIL: u8 = 1 << 1;
/// Storage medium fault observed during this sampling period
pub const ERR_STORAGE_FAIL: u8 = 1 << 2;
/// Last delivery attempt failed
pub const ERR_TRANSPORT_FAIL: u8 = 1 << 3;

/// One telemetry measurement snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Timestamp, epoch milliseconds
    pub ts: u64,
    /// Clock source that produced `ts`
    pub ts_source: TimeSource,
    /// Latitude, decimal degrees
    pub lat: f64,
    /// Longitude, decimal degrees
    pub lon: f64,
    /// Altitude, meters
    pub alt: f64,
    /// Ground speed, km/h
    pub speed: f64,
    /// Ambient temperature, Celsius
    pub temp: f32,
    /// Auxiliary bus-derived value (e.g. wheel speed off the vehicle bus)
    pub aux_value: f32,
    /// Timestamp of the last valid GPS fix
    pub last_gps_ts: u64,
    /// Timestamp of the last temperature read
    pub last_temp_ts: u64,
    /// Timestamp of the last auxiliary bus frame
    pub last_aux_ts: u64,
    /// Error-condition bitmask (`ERR_*` constants)
    pub error_code: u8,
    /// Confirmed received by the remote collector
    pub delivered: bool,
    /// Link signal strength, dBm
    pub rssi: i32,
}

impl Record {
    /// Serialize to one JSONL frame (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one stored JSONL frame.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::record_at;
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let record = record_at(1_763_700_000_000);
        let line = record.to_line().unwrap();

        // One frame, one line
        assert!(!line.contains('\n'));

        let parsed = Record::from_line(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_line_is_self_describing() {
        let line = record_at(1_763_700_000_000).to_line().unwrap();
        for key in ["\"ts\"", "\"ts_source\"", "\"lat\"", "\"error_code\"", "\"delivered\""] {
            assert!(line.contains(key), "missing {} in {}", key, line);
        }
    }

    #[test]
    fn test_garbage_line_fails_to_parse() {
        assert!(Record::from_line("{\"ts\": 12, truncated").is_err());
        assert!(Record::from_line("").is_err());
    }

    #[test]
    fn test_error_bits_are_distinct() {
        let bits = [ERR_GPS_NO_FIX, ERR_TEMP_FAIL, ERR_STORAGE_FAIL, ERR_TRANSPORT_FAIL];
        let mut mask = 0u8;
        for bit in bits {
            assert_eq!(mask & bit, 0, "overlapping error bit {:#b}", bit);
            mask |= bit;
        }
    }
}
