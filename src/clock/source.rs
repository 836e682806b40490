//! Time source tags and their precedence ordering.

use serde::{Deserialize, Serialize};

/// Where a timestamp (or the active clock calibration) came from.
///
/// Discriminants double as precedence ranks: a source may only displace the
/// active calibration when its rank is equal or higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TimeSource {
    /// Uncalibrated local uptime counter
    Local = 0,
    /// Network time (SNTP)
    Network = 1,
    /// Satellite-derived time, optionally phase-locked to the timing pulse
    Gps = 2,
}

impl TimeSource {
    /// Recover a tag from its stored rank; unknown ranks degrade to `Local`.
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            2 => TimeSource::Gps,
            1 => TimeSource::Network,
            _ => TimeSource::Local,
        }
    }
}

impl std::fmt::Display for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeSource::Local => write!(f, "local"),
            TimeSource::Network => write!(f, "network"),
            TimeSource::Gps => write!(f, "gps"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_ordering() {
        assert!(TimeSource::Gps > TimeSource::Network);
        assert!(TimeSource::Network > TimeSource::Local);
    }

    #[test]
    fn test_rank_round_trip() {
        for source in [TimeSource::Local, TimeSource::Network, TimeSource::Gps] {
            assert_eq!(TimeSource::from_rank(source as u8), source);
        }
    }

    #[test]
    fn test_unknown_rank_degrades_to_local() {
        assert_eq!(TimeSource::from_rank(7), TimeSource::Local);
    }

    #[test]
    fn test_serde_tags() {
        assert_eq!(serde_json::to_string(&TimeSource::Gps).unwrap(), "\"gps\"");
        let parsed: TimeSource = serde_json::from_str("\"network\"").unwrap();
        assert_eq!(parsed, TimeSource::Network);
    }
}
