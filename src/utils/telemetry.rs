// file: src/utils/telemetry.rs
// description: timing of runs and files for the log
// reference: structured lifecycle logging with elapsed time

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Times one run or one file and logs the result when finished.
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        debug!("Starting {}", operation);
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        debug!("Finished {} in {:.2}s", self.operation, elapsed.as_secs_f64());
        elapsed
    }

    /// Logs throughput of a whole run.
    pub fn finish_run(self, files: usize, work_done: u64) -> Duration {
        let elapsed = self.elapsed();
        let seconds = elapsed.as_secs_f64();
        let rate = |amount: f64| if seconds > 0.0 { amount / seconds } else { 0.0 };
        info!(
            "Finished {}: {} files, {} work units in {:.2}s ({:.2} files/sec)",
            self.operation,
            files,
            work_done,
            seconds,
            rate(files as f64)
        );
        elapsed
    }

    pub fn warn_if_slow(&self, threshold: Duration, what: &str) {
        let elapsed = self.elapsed();
        if elapsed > threshold {
            warn!(
                "{} of {} took {:.2}s (over {:.0}s)",
                what,
                self.operation,
                elapsed.as_secs_f64(),
                threshold.as_secs_f64()
            );
        }
    }
}
