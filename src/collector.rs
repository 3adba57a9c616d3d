//! The measurement-and-delivery loop.
//!
//! One reading is produced and its delivery attempted per tick. Sensor
//! failures degrade the reading; only a delivery failure or the shutdown
//! flag ends the loop. The tick wait is a plain sleep, so the cadence
//! drifts by the time spent reading and sending; the sensor only needs
//! approximately 1 Hz.

use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::baseline::{BaselineManager, BaselineStore, PersistOutcome};
use crate::diagnostics::RunStats;
use crate::message::Reading;
use crate::sensor::SensorClient;
use crate::shutdown::ShutdownFlag;
use crate::stream::MessageSink;

/// Why the loop stopped. Both cases are an orderly shutdown, not a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    ConnectionClosed,
    Cancelled,
}

pub struct CollectorLoop<S> {
    baseline: BaselineManager<S>,
    interval: Duration,
    stats_interval: u64,
    stats: RunStats,
}

impl<S: BaselineStore> CollectorLoop<S> {
    pub fn new(baseline: BaselineManager<S>, interval: Duration, stats_interval: u64) -> Self {
        Self {
            baseline,
            interval,
            stats_interval,
            stats: RunStats::default(),
        }
    }

    pub fn run(
        &mut self,
        sensor: &mut dyn SensorClient,
        sink: &mut dyn MessageSink,
        shutdown: &ShutdownFlag,
    ) -> LoopExit {
        let mut cycle: u64 = 0;
        loop {
            if shutdown.is_set() {
                info!("shutdown requested, stopping after {} cycles", cycle);
                self.stats.log_summary(cycle);
                return LoopExit::Cancelled;
            }

            let mut reading = Reading::new(cycle);

            match sensor.read_raw() {
                Ok(raw) => reading.set_raw_signals(raw.ethanol, raw.h2),
                Err(err) => {
                    self.stats.raw_failures += 1;
                    warn!("reading raw signals failed: {}", err);
                }
            }

            match sensor.read_iaq() {
                Ok(iaq) => reading.set_iaq(iaq.tvoc_ppb, iaq.co2eq_ppm),
                Err(err) => {
                    self.stats.iaq_failures += 1;
                    warn!("reading IAQ values failed: {}", err);
                }
            }

            let delivery = match reading.encode() {
                Ok(frame) => sink.send(&frame),
                Err(err) => {
                    warn!("encoding reading {} failed: {}", cycle, err);
                    Ok(())
                }
            };
            if delivery.is_ok() {
                self.stats.sent += 1;
            }

            // The persistence cadence does not depend on this tick's
            // delivery outcome, so the check runs before a failed send
            // breaks the loop.
            match self.baseline.maybe_persist(sensor, cycle) {
                PersistOutcome::Stored => self.stats.baseline_persisted += 1,
                PersistOutcome::Failed => self.stats.persist_failures += 1,
                PersistOutcome::NotDue => {}
            }

            if let Err(err) = delivery {
                warn!("connection to collector lost: {}", err);
                self.stats.log_summary(cycle + 1);
                return LoopExit::ConnectionClosed;
            }

            if self.stats_interval != 0 && (cycle + 1) % self.stats_interval == 0 {
                self.stats.log_summary(cycle + 1);
            }

            thread::sleep(self.interval);
            cycle += 1;
        }
    }
}
