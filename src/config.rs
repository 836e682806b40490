//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub clock: ClockConfig,
    pub delivery: DeliveryConfig,
    pub sampler: SamplerConfig,
    pub bus: BusConfig,
}

/// Storage medium configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_pending_file")]
    pub pending_file: String,

    #[serde(default = "default_archive_max_bytes")]
    pub archive_max_bytes: u64,

    #[serde(default = "default_recovery_cooldown_ms")]
    pub recovery_cooldown_ms: u64,
}

/// Clock authority configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClockConfig {
    #[serde(default = "default_sanity_floor_ms")]
    pub sanity_floor_ms: u64,

    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,

    #[serde(default = "default_pulse_tolerance_ms")]
    pub pulse_tolerance_ms: u64,

    #[serde(default = "default_gps_pulse_align_ms")]
    pub gps_pulse_align_ms: u64,
}

/// Delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Sampler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SamplerConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Auxiliary bus signal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_frame_id")]
    pub frame_id: u32,

    #[serde(default = "default_start_bit")]
    pub start_bit: usize,

    #[serde(default = "default_bit_length")]
    pub bit_length: usize,

    #[serde(default = "default_big_endian")]
    pub big_endian: bool,

    #[serde(default = "default_factor")]
    pub factor: f64,
}

// Default value functions
fn default_data_dir() -> String { "./data".to_string() }
fn default_pending_file() -> String { "pending.jsonl".to_string() }
fn default_archive_max_bytes() -> u64 { 5 * 1024 * 1024 }
fn default_recovery_cooldown_ms() -> u64 { 10_000 }

fn default_sanity_floor_ms() -> u64 { 1_763_651_027_000 }
fn default_pulse_interval_ms() -> u64 { 1000 }
fn default_pulse_tolerance_ms() -> u64 { 100 }
fn default_gps_pulse_align_ms() -> u64 { 900 }

fn default_endpoint() -> String { "127.0.0.1:9000".to_string() }
fn default_max_batch() -> usize { 50 }
fn default_flush_interval_ms() -> u64 { 5000 }

fn default_sample_interval_ms() -> u64 { 1000 }
fn default_stale_after_ms() -> u64 { 5000 }

fn default_frame_id() -> u32 { 0x123 }
fn default_start_bit() -> usize { 0 }
fn default_bit_length() -> usize { 16 }
fn default_big_endian() -> bool { true }
fn default_factor() -> f64 { 0.01 }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.storage.data_dir.is_empty() {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("storage data_dir cannot be empty")
            ));
        }

        if self.storage.pending_file.is_empty() {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("storage pending_file cannot be empty")
            ));
        }

        // 4KiB is already below one flash block; anything smaller would
        // rotate on nearly every write
        if self.storage.archive_max_bytes < 4096 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("archive_max_bytes must be at least 4096")
            ));
        }

        if self.storage.recovery_cooldown_ms > 600_000 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("recovery_cooldown_ms must be at most 600000")
            ));
        }

        if self.clock.pulse_interval_ms == 0 || self.clock.pulse_interval_ms > 60_000 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("pulse_interval_ms must be between 1 and 60000")
            ));
        }

        if self.clock.pulse_tolerance_ms >= self.clock.pulse_interval_ms {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("pulse_tolerance_ms must be less than pulse_interval_ms")
            ));
        }

        if self.clock.sanity_floor_ms == 0 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("sanity_floor_ms must be greater than 0")
            ));
        }

        if self.delivery.endpoint.is_empty() {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("delivery endpoint cannot be empty")
            ));
        }

        if self.delivery.max_batch == 0 || self.delivery.max_batch > 1000 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("max_batch must be between 1 and 1000")
            ));
        }

        if self.delivery.flush_interval_ms == 0 || self.delivery.flush_interval_ms > 600_000 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("flush_interval_ms must be between 1 and 600000")
            ));
        }

        if self.sampler.sample_interval_ms == 0 || self.sampler.sample_interval_ms > 60_000 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("sample_interval_ms must be between 1 and 60000")
            ));
        }

        if self.sampler.stale_after_ms == 0 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("stale_after_ms must be greater than 0")
            ));
        }

        if self.bus.bit_length == 0 || self.bus.bit_length > 64 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("bus bit_length must be between 1 and 64")
            ));
        }

        // 8-byte frames: any addressed bit must fit
        if self.bus.start_bit + self.bus.bit_length > 64 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("bus signal must fit within a 64-bit frame")
            ));
        }

        if self.bus.factor == 0.0 {
            return Err(crate::error::TelelogError::Config(
                toml::de::Error::custom("bus factor cannot be zero")
            ));
        }

        Ok(())
    }
}
