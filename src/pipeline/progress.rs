// file: src/pipeline/progress.rs
// description: run progress counters and the terminal progress bar observer
// reference: uses indicatif for progress bars and tracks processing metrics

use crate::pipeline::observer::RunObserver;
use crate::pipeline::stage::Stage;
use crate::pipeline::worker::{RunOutcome, RunReport};
use crate::utils::logging::{format_error, format_info, format_step, format_success, format_warning};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time copy of [`RunProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub files_completed: usize,
    pub hook_calls: u64,
    pub work_done: u64,
    pub work_total: u64,
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.work_total == 0 {
            return 0.0;
        }
        (self.work_done as f64 / self.work_total as f64).min(1.0)
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

/// Counters written only by the execution thread and read by the owner.
#[derive(Debug, Default)]
pub struct RunProgress {
    files_total: AtomicUsize,
    files_completed: AtomicUsize,
    hook_calls: AtomicU64,
    work_done: AtomicU64,
    work_total: AtomicU64,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&self, files_total: usize, work_total: u64) {
        self.files_total.store(files_total, Ordering::SeqCst);
        self.work_total.store(work_total, Ordering::SeqCst);
        self.files_completed.store(0, Ordering::SeqCst);
        self.hook_calls.store(0, Ordering::SeqCst);
        self.work_done.store(0, Ordering::SeqCst);
    }

    pub(crate) fn add_work(&self, amount: u64) {
        self.work_done.fetch_add(amount, Ordering::SeqCst);
    }

    pub(crate) fn record_hook(&self) {
        self.hook_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn complete_file(&self) {
        self.files_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total.load(Ordering::SeqCst),
            files_completed: self.files_completed.load(Ordering::SeqCst),
            hook_calls: self.hook_calls.load(Ordering::SeqCst),
            work_done: self.work_done.load(Ordering::SeqCst),
            work_total: self.work_total.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Default)]
struct DetailLine {
    file: String,
    stage: Option<Stage>,
    plugin: String,
}

/// Draws a work bar plus a detail line naming the current file, stage and plugin.
pub struct ProgressBarObserver {
    main_bar: ProgressBar,
    detail_bar: ProgressBar,
    detail: Mutex<DetailLine>,
}

impl ProgressBarObserver {
    pub fn new(colored: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), colored)
    }

    /// Observer that tracks position without drawing anything.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, colored: bool) -> Self {
        let multi_progress = MultiProgress::with_draw_target(target);

        let main_bar = create_progress_bar(&multi_progress, colored);
        let detail_bar = create_detail_bar(&multi_progress);

        Self {
            main_bar,
            detail_bar,
            detail: Mutex::new(DetailLine::default()),
        }
    }

    pub fn position(&self) -> u64 {
        self.main_bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.main_bar.length()
    }

    fn update_detail_bar(&self) {
        let detail = self.detail.lock();
        let stage = detail.stage.map(Stage::name).unwrap_or("-");
        let message = format!("{} | {} | {}", detail.file, stage, detail.plugin);
        self.detail_bar.set_message(message);
    }
}

impl RunObserver for ProgressBarObserver {
    fn notify_run_started(&self, files: usize, work_total: u64) {
        self.main_bar.reset();
        self.main_bar.set_length(work_total);
        self.main_bar
            .set_message(format_info(&format!("{} files", files)));
        *self.detail.lock() = DetailLine::default();
    }

    fn notify_file_started(&self, path: &Path, index: usize, total: usize) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.detail.lock().file = format_step(index + 1, total, &name);
        self.update_detail_bar();
    }

    fn notify_stage_changed(&self, stage: Stage) {
        self.detail.lock().stage = Some(stage);
        self.update_detail_bar();
    }

    fn notify_active_plugin(&self, name: &str) {
        self.detail.lock().plugin = name.to_string();
        self.update_detail_bar();
    }

    fn notify_work_done(&self, amount: u64) {
        self.main_bar.inc(amount);
    }

    fn notify_run_complete(&self, report: &RunReport) {
        let message = match &report.outcome {
            RunOutcome::Completed => format_success(&format!(
                "Processed {} files",
                report.files_completed
            )),
            RunOutcome::Aborted => format_warning(&format!(
                "Stopped after {}/{} files",
                report.files_completed, report.files_total
            )),
            RunOutcome::Failed(reason) => format_error(reason),
        };
        self.main_bar.finish_with_message(message);
        self.detail_bar.finish_and_clear();
    }
}

fn create_progress_bar(multi_progress: &MultiProgress, colored: bool) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(0));
    if colored {
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .expect("Failed to create progress bar template")
                .progress_chars("█▓▒░"),
        );
    } else {
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta}) {msg}")
                .expect("Failed to create progress bar template")
                .progress_chars("=>-"),
        );
    }
    bar
}

fn create_detail_bar(multi_progress: &MultiProgress) -> ProgressBar {
    let bar = multi_progress.add(ProgressBar::new(0));
    let style = ProgressStyle::default_bar()
        .template("{msg}")
        .expect("Failed to create detail bar template");
    bar.set_style(style);
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_snapshot_fraction() {
        let progress = RunProgress::new();
        progress.reset(2, 8);
        progress.add_work(2);
        progress.record_hook();
        progress.complete_file();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.files_total, 2);
        assert_eq!(snapshot.files_completed, 1);
        assert_eq!(snapshot.hook_calls, 1);
        assert_eq!(snapshot.percent(), 25.0);
    }

    #[test]
    fn test_snapshot_zero_total() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.fraction(), 0.0);
    }

    #[test]
    fn test_reset_clears_previous_run() {
        let progress = RunProgress::new();
        progress.reset(1, 4);
        progress.add_work(4);
        progress.reset(3, 12);
        assert_eq!(progress.snapshot().work_done, 0);
        assert_eq!(progress.snapshot().work_total, 12);
    }

    #[test]
    fn test_progress_bar_follows_work() {
        let observer = ProgressBarObserver::hidden();
        observer.notify_run_started(2, 10);
        observer.notify_file_started(Path::new("/tmp/a.log"), 0, 2);
        observer.notify_stage_changed(Stage::Filename);
        observer.notify_active_plugin("Stage trace");
        observer.notify_work_done(3);
        observer.notify_work_done(2);

        assert_eq!(observer.length(), Some(10));
        assert_eq!(observer.position(), 5);

        observer.notify_run_complete(&RunReport {
            outcome: RunOutcome::Completed,
            files_total: 2,
            files_completed: 2,
            hook_calls: 8,
            work_done: 10,
            work_total: 10,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        });
    }
}
