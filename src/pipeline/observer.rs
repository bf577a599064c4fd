// file: src/pipeline/observer.rs
// description: fire-and-forget run notifications delivered from the execution thread
// reference: observers must be callable from the background worker

use crate::pipeline::stage::Stage;
use crate::pipeline::worker::{RunOutcome, RunReport};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receiver of run progress. Every method defaults to a no-op.
pub trait RunObserver: Send + Sync {
    fn notify_run_started(&self, _files: usize, _work_total: u64) {}

    fn notify_file_started(&self, _path: &Path, _index: usize, _total: usize) {}

    fn notify_stage_changed(&self, _stage: Stage) {}

    fn notify_active_plugin(&self, _name: &str) {}

    fn notify_work_done(&self, _amount: u64) {}

    fn notify_run_complete(&self, _report: &RunReport) {}
}

pub type SharedObserver = Arc<dyn RunObserver>;

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Relays notifications into the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn notify_run_started(&self, files: usize, work_total: u64) {
        info!("Run started: {} files, {} work units", files, work_total);
    }

    fn notify_file_started(&self, path: &Path, index: usize, total: usize) {
        info!("[{}/{}] Processing {}", index + 1, total, path.display());
    }

    fn notify_stage_changed(&self, stage: Stage) {
        debug!("Stage: {}", stage);
    }

    fn notify_active_plugin(&self, name: &str) {
        debug!("Active plugin: {}", name);
    }

    fn notify_run_complete(&self, report: &RunReport) {
        match &report.outcome {
            RunOutcome::Completed => info!(
                "Run complete: {}/{} files, {} hook calls",
                report.files_completed, report.files_total, report.hook_calls
            ),
            RunOutcome::Aborted => warn!(
                "Run aborted after {}/{} files",
                report.files_completed, report.files_total
            ),
            RunOutcome::Failed(message) => warn!(
                "Run failed after {}/{} files: {}",
                report.files_completed, report.files_total, message
            ),
        }
    }
}
