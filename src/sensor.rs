//! SGP30 access behind a narrow client interface.
//!
//! The driver crate owns the I2C transaction details; this module maps its
//! surface onto the handful of operations the measurement loop needs, so the
//! loop and the baseline logic can be exercised against scripted fakes.

use std::fmt::Debug;
use std::thread;
use std::time::Duration;

use linux_embedded_hal::{Delay, I2cdev};
use log::{info, warn};
use sgp30::{Baseline, Humidity, ProductType, Sgp30};
use thiserror::Error;

use crate::shutdown::ShutdownFlag;

/// Default I2C address of the SGP30.
pub const SGP30_I2C_ADDRESS: u8 = 0x58;

/// Oldest feature set the IAQ algorithm supports.
const MIN_FEATURE_SET_VERSION: u8 = 0x20;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor transaction failed: {0}")]
    Bus(String),
    #[error("sensor feature set 0x{0:02x} is unsupported")]
    UnsupportedFeatureSet(u8),
}

impl SensorError {
    fn bus<E: Debug>(err: E) -> Self {
        SensorError::Bus(format!("{:?}", err))
    }
}

/// Uncalibrated gas signals, used by the IAQ algorithm internally.
#[derive(Debug, Clone, Copy)]
pub struct RawSignals {
    pub ethanol: u16,
    pub h2: u16,
}

/// Derived indoor air-quality values.
#[derive(Debug, Clone, Copy)]
pub struct IaqMeasurement {
    pub tvoc_ppb: u16,
    pub co2eq_ppm: u16,
}

#[derive(Debug, Clone)]
pub struct SensorIdentity {
    pub product: String,
    pub feature_set_version: u8,
}

/// The driver capability surface consumed by the rest of the program.
///
/// Every operation maps to one sensor transaction and fails independently;
/// none of them retries on its own.
pub trait SensorClient {
    /// Presence and compatibility check. Distinguishes an incompatible
    /// feature set from a generic bus failure.
    fn probe(&mut self) -> Result<(), SensorError>;

    fn identify(&mut self) -> Result<SensorIdentity, SensorError>;

    fn serial_id(&mut self) -> Result<u64, SensorError>;

    fn read_raw(&mut self) -> Result<RawSignals, SensorError>;

    /// Starts the IAQ engine. Must run once, before any baseline restore.
    fn init_iaq(&mut self) -> Result<(), SensorError>;

    fn read_iaq(&mut self) -> Result<IaqMeasurement, SensorError>;

    fn get_baseline(&mut self) -> Result<u32, SensorError>;

    fn set_baseline(&mut self, value: u32) -> Result<(), SensorError>;

    fn set_absolute_humidity(&mut self, mg_per_m3: u32) -> Result<(), SensorError>;
}

/// Production client over the Linux I2C bus.
pub struct Sgp30Client {
    sgp: Sgp30<I2cdev, Delay>,
}

impl Sgp30Client {
    pub fn open(i2c_device: &str) -> Result<Self, SensorError> {
        let dev = I2cdev::new(i2c_device).map_err(SensorError::bus)?;
        Ok(Self {
            sgp: Sgp30::new(dev, SGP30_I2C_ADDRESS, Delay),
        })
    }

    /// Hand the bus handle back and drop it, closing the device node.
    pub fn release(self) {
        let _ = self.sgp.destroy();
    }
}

impl SensorClient for Sgp30Client {
    fn probe(&mut self) -> Result<(), SensorError> {
        self.sgp.serial().map_err(SensorError::bus)?;
        let feature_set = self.sgp.get_feature_set().map_err(SensorError::bus)?;
        let compatible = matches!(feature_set.product_type, ProductType::Sgp30)
            && feature_set.product_version >= MIN_FEATURE_SET_VERSION;
        if !compatible {
            return Err(SensorError::UnsupportedFeatureSet(
                feature_set.product_version,
            ));
        }
        Ok(())
    }

    fn identify(&mut self) -> Result<SensorIdentity, SensorError> {
        let feature_set = self.sgp.get_feature_set().map_err(SensorError::bus)?;
        Ok(SensorIdentity {
            product: format!("{:?}", feature_set.product_type),
            feature_set_version: feature_set.product_version,
        })
    }

    fn serial_id(&mut self) -> Result<u64, SensorError> {
        let serial = self.sgp.serial().map_err(SensorError::bus)?;
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&serial);
        Ok(u64::from_be_bytes(bytes))
    }

    fn read_raw(&mut self) -> Result<RawSignals, SensorError> {
        let signals = self.sgp.measure_raw_signals().map_err(SensorError::bus)?;
        Ok(RawSignals {
            ethanol: signals.ethanol,
            h2: signals.h2,
        })
    }

    fn init_iaq(&mut self) -> Result<(), SensorError> {
        self.sgp.init().map_err(SensorError::bus)
    }

    fn read_iaq(&mut self) -> Result<IaqMeasurement, SensorError> {
        let measurement = self.sgp.measure().map_err(SensorError::bus)?;
        Ok(IaqMeasurement {
            tvoc_ppb: measurement.tvoc_ppb,
            co2eq_ppm: measurement.co2eq_ppm,
        })
    }

    fn get_baseline(&mut self) -> Result<u32, SensorError> {
        let baseline = self.sgp.get_baseline().map_err(SensorError::bus)?;
        Ok(u32::from(baseline.co2eq) << 16 | u32::from(baseline.tvoc))
    }

    fn set_baseline(&mut self, value: u32) -> Result<(), SensorError> {
        let baseline = Baseline {
            co2eq: (value >> 16) as u16,
            tvoc: (value & 0xffff) as u16,
        };
        self.sgp.set_baseline(&baseline).map_err(SensorError::bus)
    }

    fn set_absolute_humidity(&mut self, mg_per_m3: u32) -> Result<(), SensorError> {
        let humidity =
            Humidity::from_f32(mg_per_m3 as f32 / 1000.0).map_err(SensorError::bus)?;
        self.sgp
            .set_humidity(Some(&humidity))
            .map_err(SensorError::bus)
    }
}

/// Block until the sensor answers a probe, retrying on a fixed backoff.
///
/// The measurement loop cannot run without a sensor, so this never gives up
/// on its own; only the shutdown flag ends the wait early. Returns `false`
/// when cancelled.
pub fn wait_until_ready(
    sensor: &mut dyn SensorClient,
    shutdown: &ShutdownFlag,
    backoff: Duration,
) -> bool {
    loop {
        if shutdown.is_set() {
            return false;
        }
        match sensor.probe() {
            Ok(()) => {
                info!("sensor probe successful");
                return true;
            }
            Err(SensorError::UnsupportedFeatureSet(version)) => {
                warn!(
                    "sensor feature set 0x{:02x} too old, need at least 0x{:02x}",
                    version, MIN_FEATURE_SET_VERSION
                );
                warn!("sensor probe failed, retrying");
            }
            Err(err) => warn!("sensor probe failed, retrying: {}", err),
        }
        thread::sleep(backoff);
    }
}
