//! # Telelog Library
//!
//! Store-and-forward telemetry logger for intermittently connected devices.
//!
//! This library provides the core functionality for collecting time-stamped
//! measurements, persisting them power-loss-safely on flash, and forwarding
//! them to a remote collector once connectivity returns — without losing
//! records, even when wall-clock time itself is intermittently unavailable.

pub mod bus;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod record;
pub mod sampler;
pub mod storage;
