//! Calibration baseline lifecycle.
//!
//! The SGP30 compensates long-term drift with a baseline value it converges
//! on over roughly twelve hours. Persisting that value and restoring it on
//! the next start skips most of the re-calibration, as long as the stored
//! copy is recent enough to still describe the sensor.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::sensor::SensorClient;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("baseline storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored baseline is malformed")]
    Malformed,
}

/// A previously persisted baseline and how long ago it was written.
#[derive(Debug, Clone, Copy)]
pub struct StoredBaseline {
    pub value: u32,
    pub age: Duration,
}

/// Persistence collaborator. The deployment owns the storage format; this
/// program only needs get/put semantics plus the age of the stored value.
pub trait BaselineStore {
    fn load(&self) -> Result<Option<StoredBaseline>, StoreError>;
    fn store(&mut self, value: u32) -> Result<(), StoreError>;
}

/// Baseline persisted as a hex word in a plain file; the file's modification
/// time doubles as the write timestamp.
pub struct FileBaselineStore {
    path: PathBuf,
}

impl FileBaselineStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl BaselineStore for FileBaselineStore {
    fn load(&self) -> Result<Option<StoredBaseline>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value =
            u32::from_str_radix(text.trim(), 16).map_err(|_| StoreError::Malformed)?;
        let modified = fs::metadata(&self.path)?.modified()?;
        // A modification time in the future reads as freshly written.
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        Ok(Some(StoredBaseline { value, age }))
    }

    fn store(&mut self, value: u32) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, format!("{:08x}\n", value))?;
        Ok(())
    }
}

/// Calibration lifecycle. Terminal once running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Uninitialized,
    Calibrating,
    Running,
}

/// Outcome of one persistence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    NotDue,
    Stored,
    Failed,
}

pub struct BaselineManager<S> {
    store: S,
    max_age: Duration,
    persist_interval: u64,
    state: CalibrationState,
}

impl<S: BaselineStore> BaselineManager<S> {
    pub fn new(store: S, max_age: Duration, persist_interval: u64) -> Self {
        Self {
            store,
            max_age,
            persist_interval,
            state: CalibrationState::Uninitialized,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Initialize the IAQ engine, then restore a stored baseline if one
    /// exists and is recent enough. Restoring must happen after the engine
    /// init or the driver discards the value.
    pub fn startup(&mut self, sensor: &mut dyn SensorClient) {
        match sensor.init_iaq() {
            Ok(()) => self.state = CalibrationState::Calibrating,
            Err(err) => {
                warn!("IAQ engine init failed, continuing uncalibrated: {}", err);
                return;
            }
        }

        match self.store.load() {
            Ok(Some(stored)) if stored.age <= self.max_age => {
                match sensor.set_baseline(stored.value) {
                    Ok(()) => info!(
                        "restored baseline {:#010x} written {}h ago",
                        stored.value,
                        stored.age.as_secs() / 3600
                    ),
                    Err(err) => warn!("restoring baseline failed: {}", err),
                }
            }
            Ok(Some(stored)) => info!(
                "stored baseline is {}h old, starting fresh calibration",
                stored.age.as_secs() / 3600
            ),
            Ok(None) => info!("no stored baseline, starting fresh calibration"),
            Err(err) => warn!("loading stored baseline failed: {}", err),
        }

        self.state = CalibrationState::Running;
    }

    /// Persist the current baseline when the cycle counter hits the
    /// persistence cadence. Read or write failures are logged and skipped;
    /// the next due cycle tries again.
    pub fn maybe_persist(
        &mut self,
        sensor: &mut dyn SensorClient,
        cycle: u64,
    ) -> PersistOutcome {
        if self.persist_interval == 0 || cycle % self.persist_interval != self.persist_interval - 1
        {
            return PersistOutcome::NotDue;
        }

        let value = match sensor.get_baseline() {
            Ok(value) => value,
            Err(err) => {
                warn!("reading baseline for persistence failed: {}", err);
                return PersistOutcome::Failed;
            }
        };
        match self.store.store(value) {
            Ok(()) => {
                info!("persisted baseline {:#010x} at cycle {}", value, cycle);
                PersistOutcome::Stored
            }
            Err(err) => {
                warn!("storing baseline failed: {}", err);
                PersistOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{IaqMeasurement, RawSignals, SensorError, SensorIdentity};
    use std::process;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Records baseline-related calls in order; other operations are out of
    /// scope for this module.
    #[derive(Default)]
    struct ScriptedSensor {
        init_fails: bool,
        baseline: u32,
        baseline_fails: bool,
        calls: Vec<String>,
    }

    impl SensorClient for ScriptedSensor {
        fn probe(&mut self) -> Result<(), SensorError> {
            unimplemented!()
        }
        fn identify(&mut self) -> Result<SensorIdentity, SensorError> {
            unimplemented!()
        }
        fn serial_id(&mut self) -> Result<u64, SensorError> {
            unimplemented!()
        }
        fn read_raw(&mut self) -> Result<RawSignals, SensorError> {
            unimplemented!()
        }
        fn init_iaq(&mut self) -> Result<(), SensorError> {
            self.calls.push("init".into());
            if self.init_fails {
                Err(SensorError::Bus("init".into()))
            } else {
                Ok(())
            }
        }
        fn read_iaq(&mut self) -> Result<IaqMeasurement, SensorError> {
            unimplemented!()
        }
        fn get_baseline(&mut self) -> Result<u32, SensorError> {
            self.calls.push("get".into());
            if self.baseline_fails {
                Err(SensorError::Bus("get".into()))
            } else {
                Ok(self.baseline)
            }
        }
        fn set_baseline(&mut self, value: u32) -> Result<(), SensorError> {
            self.calls.push(format!("set {:#010x}", value));
            Ok(())
        }
        fn set_absolute_humidity(&mut self, _mg_per_m3: u32) -> Result<(), SensorError> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MemStore {
        stored: Option<StoredBaseline>,
        writes: Vec<u32>,
        store_fails: bool,
    }

    impl BaselineStore for MemStore {
        fn load(&self) -> Result<Option<StoredBaseline>, StoreError> {
            Ok(self.stored)
        }
        fn store(&mut self, value: u32) -> Result<(), StoreError> {
            if self.store_fails {
                return Err(StoreError::Malformed);
            }
            self.writes.push(value);
            Ok(())
        }
    }

    #[test]
    fn startup_without_stored_baseline_never_sets() {
        let mut sensor = ScriptedSensor::default();
        let mut manager = BaselineManager::new(MemStore::default(), WEEK, 3600);
        manager.startup(&mut sensor);
        assert_eq!(sensor.calls, vec!["init"]);
        assert_eq!(manager.state(), CalibrationState::Running);
    }

    #[test]
    fn startup_restores_fresh_baseline_after_init() {
        let mut sensor = ScriptedSensor::default();
        let store = MemStore {
            stored: Some(StoredBaseline {
                value: 0x8a2b_9e10,
                age: Duration::from_secs(3600),
            }),
            ..Default::default()
        };
        let mut manager = BaselineManager::new(store, WEEK, 3600);
        manager.startup(&mut sensor);
        assert_eq!(sensor.calls, vec!["init", "set 0x8a2b9e10"]);
    }

    #[test]
    fn startup_discards_stale_baseline() {
        let mut sensor = ScriptedSensor::default();
        let store = MemStore {
            stored: Some(StoredBaseline {
                value: 1,
                age: WEEK + Duration::from_secs(1),
            }),
            ..Default::default()
        };
        let mut manager = BaselineManager::new(store, WEEK, 3600);
        manager.startup(&mut sensor);
        assert_eq!(sensor.calls, vec!["init"]);
    }

    #[test]
    fn startup_skips_restore_when_init_fails() {
        let mut sensor = ScriptedSensor {
            init_fails: true,
            ..Default::default()
        };
        let store = MemStore {
            stored: Some(StoredBaseline {
                value: 1,
                age: Duration::ZERO,
            }),
            ..Default::default()
        };
        let mut manager = BaselineManager::new(store, WEEK, 3600);
        manager.startup(&mut sensor);
        assert_eq!(sensor.calls, vec!["init"]);
        assert_eq!(manager.state(), CalibrationState::Uninitialized);
    }

    #[test]
    fn persistence_fires_exactly_on_the_hourly_cadence() {
        let mut sensor = ScriptedSensor {
            baseline: 0x1234_5678,
            ..Default::default()
        };
        let mut manager = BaselineManager::new(MemStore::default(), WEEK, 3600);
        let mut stored_at = Vec::new();
        for cycle in 0..7200u64 {
            if manager.maybe_persist(&mut sensor, cycle) == PersistOutcome::Stored {
                stored_at.push(cycle);
            }
        }
        assert_eq!(stored_at, vec![3599, 7199]);
        assert_eq!(manager.store.writes, vec![0x1234_5678, 0x1234_5678]);
    }

    #[test]
    fn persistence_skips_cycle_when_sensor_read_fails() {
        let mut sensor = ScriptedSensor {
            baseline_fails: true,
            ..Default::default()
        };
        let mut manager = BaselineManager::new(MemStore::default(), WEEK, 10);
        assert_eq!(
            manager.maybe_persist(&mut sensor, 9),
            PersistOutcome::Failed
        );
        assert!(manager.store.writes.is_empty());
    }

    #[test]
    fn persistence_reports_store_failure() {
        let mut sensor = ScriptedSensor::default();
        let store = MemStore {
            store_fails: true,
            ..Default::default()
        };
        let mut manager = BaselineManager::new(store, WEEK, 10);
        assert_eq!(
            manager.maybe_persist(&mut sensor, 9),
            PersistOutcome::Failed
        );
    }

    #[test]
    fn file_store_round_trips_and_reports_age() {
        let path = std::env::temp_dir().join(format!("aircast-baseline-{}", process::id()));
        let _ = fs::remove_file(&path);
        let mut store = FileBaselineStore::new(&path);

        assert!(store.load().unwrap().is_none());

        store.store(0xdead_beef).unwrap();
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.value, 0xdead_beef);
        assert!(stored.age < Duration::from_secs(60));

        fs::write(&path, "not a baseline\n").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed)));

        let _ = fs::remove_file(&path);
    }
}
