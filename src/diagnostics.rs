//! Per-run health counters.
//!
//! Kept deliberately cheap: plain counters owned by the measurement loop,
//! summarized to the log on a fixed cycle interval so a long-running
//! deployment shows up in journald without a metrics stack.

use log::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub sent: u64,
    pub raw_failures: u64,
    pub iaq_failures: u64,
    pub baseline_persisted: u64,
    pub persist_failures: u64,
}

impl RunStats {
    pub fn log_summary(&self, cycles: u64) {
        info!(
            "after {} cycles: sent={} raw_errs={} iaq_errs={} baseline_saved={} baseline_errs={}",
            cycles,
            self.sent,
            self.raw_failures,
            self.iaq_failures,
            self.baseline_persisted,
            self.persist_failures
        );
    }
}
