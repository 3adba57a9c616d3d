//! Runtime configuration.
//!
//! Defaults cover the common deployment; environment variables override the
//! host-specific pieces. The collector address comes from the command line,
//! not from here.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

/// Sensor bus and compensation settings.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// I2C device node the SGP30 hangs off.
    pub i2c_device: String,
    /// Optional absolute humidity (mg/m³) for on-chip compensation.
    /// Unset leaves compensation off.
    pub absolute_humidity_mg_m3: Option<u32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_device: "/dev/i2c-1".to_string(),
            absolute_humidity_mg_m3: None,
        }
    }
}

/// Measurement cadence. The IAQ algorithm expects approximately 1 Hz.
#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    pub interval: Duration,
    /// Log a counter summary every this many cycles; 0 disables it.
    pub stats_interval_cycles: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            stats_interval_cycles: 300,
        }
    }
}

/// Baseline persistence policy.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub store_path: PathBuf,
    /// Persist every this many cycles (hourly at 1 Hz).
    pub persist_interval_cycles: u64,
    /// Stored baselines older than this are discarded at startup.
    pub max_age: Duration,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("/var/lib/aircast/baseline"),
            persist_interval_cycles: 3600,
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    pub sensor: SensorConfig,
    pub sampling: SamplingConfig,
    pub baseline: BaselineConfig,
}

impl SystemConfig {
    /// Defaults with environment overrides applied:
    ///
    /// ```bash
    /// export AIRCAST_I2C_DEV="/dev/i2c-3"
    /// export AIRCAST_BASELINE_PATH="/data/aircast/baseline"
    /// export AIRCAST_HUMIDITY_MG_M3="11200"
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(device) = env::var("AIRCAST_I2C_DEV") {
            config.sensor.i2c_device = device;
        }
        if let Ok(path) = env::var("AIRCAST_BASELINE_PATH") {
            config.baseline.store_path = PathBuf::from(path);
        }
        if let Ok(humidity) = env::var("AIRCAST_HUMIDITY_MG_M3") {
            match humidity.parse::<u32>() {
                Ok(mg) => config.sensor.absolute_humidity_mg_m3 = Some(mg),
                Err(_) => warn!(
                    "ignoring AIRCAST_HUMIDITY_MG_M3={:?}: not a number",
                    humidity
                ),
            }
        }

        config
    }
}
