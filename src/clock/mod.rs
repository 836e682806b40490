//! # Clock Authority Module
//!
//! Maintains the best current wall-clock estimate from multiple time
//! sources: a satellite receiver (optionally phase-locked to its periodic
//! timing pulse), network time, and the device's own uptime counter.
//!
//! The estimate is a calibration point `(epoch_ms, uptime_ms)` plus a source
//! tag. Between calibrations the wall clock advances off the cheap monotonic
//! uptime counter, so `now()` never blocks and never goes backwards between
//! two calls that share a calibration.
//!
//! All state lives in atomics because `update_from_pulse` runs on the
//! timing-pulse edge (an interrupt context on the device): it must complete
//! in bounded time, allocation-free, and cannot take a blocking mutex.

pub mod source;

pub use source::TimeSource;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

/// A wall-clock reading: best epoch estimate plus the source that produced
/// the active calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    /// Epoch milliseconds (absolute when synchronized, raw uptime otherwise)
    pub epoch_ms: u64,
    /// Source of the active calibration
    pub source: TimeSource,
}

/// Tuning knobs for the pulse discipline and source sanity checks.
#[derive(Debug, Clone, Copy)]
pub struct ClockSettings {
    /// Candidate epochs below this value are rejected outright (guards
    /// against default-valued or corrupted GPS/NTP data)
    pub sanity_floor_ms: u64,
    /// Nominal timing-pulse period
    pub pulse_interval_ms: u64,
    /// Accepted deviation around the nominal period for pulse discipline
    pub pulse_tolerance_ms: u64,
    /// A GPS epoch arriving within this window after a pulse edge is
    /// calibrated against that edge instead of the arrival time
    pub gps_pulse_align_ms: u64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            sanity_floor_ms: 1_763_651_027_000,
            pulse_interval_ms: 1000,
            pulse_tolerance_ms: 100,
            gps_pulse_align_ms: 900,
        }
    }
}

/// Arbitrates between time sources and serves epoch estimates.
///
/// Single instance per device; share via `Arc`. Readers (`now`,
/// `is_synchronized`) are wait-free. Writers are the source-update task and
/// the pulse edge; the pulse path only nudges an already-valid calibration.
pub struct ClockAuthority {
    settings: ClockSettings,
    /// Monotonic origin for the uptime counter
    boot: Instant,

    /// Epoch milliseconds at the calibration point
    base_epoch_ms: AtomicU64,
    /// Local uptime milliseconds at the calibration point
    base_uptime_ms: AtomicU64,
    /// True once any valid calibration has occurred
    valid: AtomicBool,
    /// Rank of the source that produced the active calibration
    source: AtomicU8,
    /// Uptime of the most recent pulse edge
    last_pulse_uptime_ms: AtomicU64,
}

impl std::fmt::Debug for ClockAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockAuthority")
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .field("source", &self.active_source())
            .finish_non_exhaustive()
    }
}

impl ClockAuthority {
    /// Create an unsynchronized clock. `now()` degrades to raw uptime until
    /// the first valid source update arrives.
    pub fn new(settings: ClockSettings) -> Self {
        Self {
            settings,
            boot: Instant::now(),
            base_epoch_ms: AtomicU64::new(0),
            base_uptime_ms: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            source: AtomicU8::new(TimeSource::Local as u8),
            last_pulse_uptime_ms: AtomicU64::new(0),
        }
    }

    /// Milliseconds since construction; the monotonic counter everything
    /// else is measured against.
    fn uptime_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    /// Handle one edge of the periodic timing pulse.
    ///
    /// If a calibration is already active and the delta since the
    /// calibration point falls within the tolerance window around the
    /// nominal interval, the calibration advances by exactly one interval.
    /// This keeps the estimate phase-locked to the pulse between full fixes
    /// and smooths inter-fix jitter. No allocation, no locks.
    pub fn update_from_pulse(&self) {
        self.pulse_at(self.uptime_ms());
    }

    fn pulse_at(&self, now_uptime: u64) {
        self.last_pulse_uptime_ms.store(now_uptime, Ordering::Release);

        if !self.valid.load(Ordering::Acquire) {
            return;
        }

        let base_uptime = self.base_uptime_ms.load(Ordering::Acquire);
        let delta = now_uptime.saturating_sub(base_uptime);
        let lo = self.settings.pulse_interval_ms - self.settings.pulse_tolerance_ms;
        let hi = self.settings.pulse_interval_ms + self.settings.pulse_tolerance_ms;

        if delta > lo && delta < hi {
            let epoch = self.base_epoch_ms.load(Ordering::Acquire);
            self.base_epoch_ms
                .store(epoch + self.settings.pulse_interval_ms, Ordering::Release);
            self.base_uptime_ms.store(now_uptime, Ordering::Release);
        }
    }

    /// Offer a candidate epoch from a time source.
    ///
    /// Rejected when below the sanity floor. Accepted when the source ranks
    /// equal to or higher than the active calibration's source (or when no
    /// calibration exists). Disagreement between sources is resolved purely
    /// by precedence, never by averaging.
    ///
    /// Returns `true` when the calibration point was replaced.
    pub fn update_from_source(&self, epoch_ms: u64, source: TimeSource) -> bool {
        self.source_update_at(epoch_ms, source, self.uptime_ms())
    }

    fn source_update_at(&self, epoch_ms: u64, source: TimeSource, now_uptime: u64) -> bool {
        if epoch_ms < self.settings.sanity_floor_ms {
            warn!(
                epoch_ms,
                source = %source,
                "rejected time update below sanity floor"
            );
            return false;
        }

        if self.valid.load(Ordering::Acquire) && source < self.active_source() {
            debug!(
                candidate = %source,
                active = %self.active_source(),
                "ignoring lower-precedence time update"
            );
            return false;
        }

        // GPS epochs usually arrive a few hundred ms after the pulse edge
        // they describe; calibrate against the edge when it is fresh.
        let cal_uptime = if source == TimeSource::Gps {
            let last_pulse = self.last_pulse_uptime_ms.load(Ordering::Acquire);
            if last_pulse > 0
                && now_uptime.saturating_sub(last_pulse) < self.settings.gps_pulse_align_ms
            {
                last_pulse
            } else {
                now_uptime
            }
        } else {
            now_uptime
        };

        self.base_epoch_ms.store(epoch_ms, Ordering::Release);
        self.base_uptime_ms.store(cal_uptime, Ordering::Release);
        self.source.store(source as u8, Ordering::Release);
        self.valid.store(true, Ordering::Release);

        debug!(epoch_ms, source = %source, "clock calibrated");
        true
    }

    /// Current best epoch estimate and the active source tag.
    ///
    /// Pure read; never blocks. When no calibration exists the raw uptime
    /// counter is returned tagged `Local` — useful only for relative
    /// ordering, not for anything needing a presentable date.
    pub fn now(&self) -> ClockReading {
        self.now_at(self.uptime_ms())
    }

    fn now_at(&self, now_uptime: u64) -> ClockReading {
        if self.valid.load(Ordering::Acquire) {
            let base_epoch = self.base_epoch_ms.load(Ordering::Acquire);
            let base_uptime = self.base_uptime_ms.load(Ordering::Acquire);
            ClockReading {
                epoch_ms: base_epoch + now_uptime.saturating_sub(base_uptime),
                source: self.active_source(),
            }
        } else {
            ClockReading {
                epoch_ms: now_uptime,
                source: TimeSource::Local,
            }
        }
    }

    /// True once any valid calibration has occurred.
    ///
    /// Callers that need an absolute, presentable date (archive filenames)
    /// must check this first and defer otherwise.
    pub fn is_synchronized(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Source of the active calibration (`Local` before first sync).
    pub fn active_source(&self) -> TimeSource {
        TimeSource::from_rank(self.source.load(Ordering::Acquire))
    }
}
