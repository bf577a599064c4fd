// file: src/pipeline/processor.rs
// description: STOPPED/RUNNING state machine owning one background execution thread per run
// reference: bounded cooperative stop with an explicit operator decision on stall

use crate::config::ExecutorConfig;
use crate::error::{Result, RuntimeError};
use crate::pipeline::context::{CancelToken, RunContext, RunData};
use crate::pipeline::observer::SharedObserver;
use crate::pipeline::parser::LogParser;
use crate::pipeline::progress::{ProgressSnapshot, RunProgress};
use crate::pipeline::worker::{RunOutcome, RunPlan, RunReport, Worker};
use crate::plugin::factory::SharedFactory;
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

const THREAD_NAME: &str = "logchain-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStart {
    Started,
    /// No active plugin in the chain; nothing was touched.
    NothingToDo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Operator answer to a stop request that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallDecision {
    /// Unsafe, and not a real termination. Plugin hooks run in-process and
    /// cannot be interrupted, so the worker thread is only silenced and
    /// detached: a hook that is executing keeps executing until it returns
    /// or reaches a checkpoint, and a hook that never returns keeps its
    /// thread alive for the life of the process. The detached worker makes
    /// no further progress or observer updates. Open files and locks held
    /// by a plugin may stay that way.
    ForceTerminate,
    /// Keep the stop request pending and let the worker wind down by itself.
    Abandon,
}

struct ActiveRun {
    token: CancelToken,
    done: Receiver<RunReport>,
    handle: Option<JoinHandle<()>>,
    data: Arc<RunData>,
    started_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct Finished {
    report: Option<RunReport>,
    data: Option<Arc<RunData>>,
}

pub struct Processor {
    observer: SharedObserver,
    stop_timeout: Duration,
    debug: bool,
    progress: Arc<RunProgress>,
    active: Mutex<Option<ActiveRun>>,
    finished: Mutex<Finished>,
}

impl Processor {
    pub fn new(observer: SharedObserver, stop_timeout: Duration) -> Self {
        Self {
            observer,
            stop_timeout,
            debug: false,
            progress: Arc::new(RunProgress::new()),
            active: Mutex::new(None),
            finished: Mutex::new(Finished::default()),
        }
    }

    pub fn from_config(config: &ExecutorConfig, observer: SharedObserver) -> Self {
        Self::new(observer, config.stop_timeout())
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Starts a run over `files` with the active factories of `factories`, in order.
    pub fn run(
        &self,
        files: &[PathBuf],
        factories: &[SharedFactory],
        parser: Arc<dyn LogParser>,
    ) -> Result<RunStart> {
        let mut active = self.active.lock();
        self.reap(&mut active);
        if active.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }

        let chain: Vec<SharedFactory> = factories
            .iter()
            .filter(|factory| factory.read().is_active())
            .cloned()
            .collect();
        if chain.is_empty() {
            info!("No plugins specified, nothing to do!");
            return Ok(RunStart::NothingToDo);
        }

        let token = CancelToken::new();
        let ctx = RunContext::new(
            token.clone(),
            Arc::clone(&self.observer),
            Arc::clone(&self.progress),
            self.debug,
        );
        let data = ctx.shared_data();
        let plan = RunPlan {
            files: files.to_vec(),
            factories: chain,
            parser,
        };
        info!(
            "Starting run: {} files through {} plugins",
            plan.files.len(),
            plan.factories.len()
        );

        let (sender, done) = bounded(1);
        let worker = Worker::new(plan, ctx);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let report = worker.run();
                // the owner may have detached us after a forced stop
                let _ = sender.send(report);
            })?;

        *active = Some(ActiveRun {
            token,
            done,
            handle: Some(handle),
            data,
            started_at: Utc::now(),
        });
        Ok(RunStart::Started)
    }

    pub fn state(&self) -> ProcessorState {
        let mut active = self.active.lock();
        self.reap(&mut active);
        if active.is_some() {
            ProcessorState::Running
        } else {
            ProcessorState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    /// Requests a cooperative stop and waits for it up to the stop timeout.
    ///
    /// On timeout the run keeps its abort flag and stays RUNNING; the caller
    /// must answer with [`resolve_stall`](Self::resolve_stall).
    pub fn stop(&self) -> Result<StopOutcome> {
        let mut active = self.active.lock();
        self.reap(&mut active);
        let Some(run) = active.as_ref() else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        run.token.request_abort();
        info!("Stop requested, waiting up to {:?}", self.stop_timeout);

        match run.done.recv_timeout(self.stop_timeout) {
            Ok(report) => {
                self.retire(&mut active, report);
                Ok(StopOutcome::Stopped)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Run did not stop within {:?}; forced termination is available but unsafe",
                    self.stop_timeout
                );
                Err(RuntimeError::CancellationTimeout {
                    waited: self.stop_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let report = self.lost_report(run, "execution thread exited without a report");
                self.retire(&mut active, report);
                Ok(StopOutcome::Stopped)
            }
        }
    }

    /// Applies the operator's answer to a stalled stop and returns the resulting state.
    ///
    /// [`StallDecision::ForceTerminate`] retires the run at once, but the
    /// detached worker thread only exits at its next hook boundary or
    /// checkpoint. See its documentation for what that leaves behind.
    pub fn resolve_stall(&self, decision: StallDecision) -> ProcessorState {
        let mut active = self.active.lock();
        self.reap(&mut active);
        let Some(run) = active.as_mut() else {
            return ProcessorState::Stopped;
        };

        match decision {
            StallDecision::Abandon => {
                info!("Stop request left pending; the run will end at its next cancellation point");
                run.token.request_abort();
                ProcessorState::Running
            }
            StallDecision::ForceTerminate => {
                warn!(
                    "Forcibly terminating the run; plugin state, open files and locks may be left inconsistent"
                );
                run.token.request_kill();
                // detached: the thread exits at its next hook boundary or checkpoint
                drop(run.handle.take());

                let report = RunReport {
                    outcome: RunOutcome::Aborted,
                    ..self.lost_report(run, "")
                };
                self.observer.notify_run_complete(&report);
                self.retire(&mut active, report);
                ProcessorState::Stopped
            }
        }
    }

    /// Waits up to `timeout` for the current run to finish on its own.
    pub fn wait(&self, timeout: Duration) -> Option<RunReport> {
        let mut active = self.active.lock();
        self.reap(&mut active);
        let Some(run) = active.as_ref() else {
            return self.last_report();
        };

        match run.done.recv_timeout(timeout) {
            Ok(report) => {
                self.retire(&mut active, report.clone());
                Some(report)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                let report = self.lost_report(run, "execution thread exited without a report");
                self.retire(&mut active, report.clone());
                Some(report)
            }
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.finished.lock().report.clone()
    }

    /// Run data of the last finished run.
    pub fn last_data(&self) -> Option<Arc<RunData>> {
        self.finished.lock().data.clone()
    }

    /// Retires a run whose worker has already reported.
    fn reap(&self, active: &mut Option<ActiveRun>) {
        let Some(run) = active.as_ref() else {
            return;
        };
        match run.done.try_recv() {
            Ok(report) => self.retire(active, report),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                let report = self.lost_report(run, "execution thread exited without a report");
                self.retire(active, report);
            }
        }
    }

    fn retire(&self, active: &mut Option<ActiveRun>, report: RunReport) {
        let Some(mut run) = active.take() else {
            return;
        };
        if let Some(handle) = run.handle.take()
            && handle.join().is_err()
        {
            error!("Execution thread panicked");
        }
        let mut finished = self.finished.lock();
        finished.report = Some(report);
        finished.data = Some(run.data);
    }

    fn lost_report(&self, run: &ActiveRun, reason: &str) -> RunReport {
        let snapshot = self.progress.snapshot();
        RunReport {
            outcome: RunOutcome::Failed(reason.to_string()),
            files_total: snapshot.files_total,
            files_completed: snapshot.files_completed,
            hook_calls: snapshot.hook_calls,
            work_done: snapshot.work_done,
            work_total: snapshot.work_total,
            started_at: run.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().as_ref() {
            run.token.request_abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::RunContext;
    use crate::pipeline::observer::{NullObserver, RunObserver};
    use crate::pipeline::parser::TextLogParser;
    use crate::pipeline::stage::Stage;
    use crate::plugin::builtin::{DummyLoadFactory, StageLoad, StageTraceFactory};
    use crate::plugin::factory::{FactoryContext, FactoryCore, FactoryType, PluginFactory, share};
    use crate::plugin::instance::PluginInstance;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn inputs(temp: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = temp.path().join(format!("{}.log", i));
                fs::write(&path, "PARM, A, 1\nGPS, 2, 3\n").unwrap();
                path
            })
            .collect()
    }

    fn processor(timeout_ms: u64) -> Processor {
        Processor::new(Arc::new(NullObserver), Duration::from_millis(timeout_ms))
    }

    fn parser() -> Arc<dyn LogParser> {
        Arc::new(TextLogParser::new())
    }

    /// Counts filenames seen and sleeps in the filename hook without checkpoints.
    struct Sleeper {
        core: FactoryCore,
        pause: Duration,
        started: Arc<AtomicUsize>,
        release: Arc<AtomicBool>,
    }

    struct SleeperInstance {
        pause: Duration,
        started: Arc<AtomicUsize>,
        release: Arc<AtomicBool>,
    }

    impl PluginInstance for SleeperInstance {
        fn on_filename(&mut self, _ctx: &RunContext, _path: &Path) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let until = std::time::Instant::now() + self.pause;
            while std::time::Instant::now() < until && !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    impl PluginFactory for Sleeper {
        fn core(&self) -> &FactoryCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut FactoryCore {
            &mut self.core
        }

        fn give_instance(&self, _ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>> {
            Ok(Box::new(SleeperInstance {
                pause: self.pause,
                started: Arc::clone(&self.started),
                release: Arc::clone(&self.release),
            }))
        }
    }

    fn sleeper(pause: Duration) -> (SharedFactory, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));
        let factory = share(Box::new(Sleeper {
            core: FactoryCore::new("sleeper", "Sleeper", FactoryContext::detached()),
            pause,
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }));
        (factory, started, release)
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !condition() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(condition());
    }

    #[test]
    fn test_empty_chain_is_nothing_to_do() {
        let temp = TempDir::new().unwrap();
        let processor = processor(500);
        let files = inputs(&temp, 2);

        assert_eq!(processor.run(&files, &[], parser()).unwrap(), RunStart::NothingToDo);

        let inactive = share(Box::new(StageTraceFactory::create(FactoryContext::detached())));
        inactive.write().set_active(false);
        assert_eq!(
            processor.run(&files, &[inactive], parser()).unwrap(),
            RunStart::NothingToDo
        );

        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert!(processor.last_report().is_none());
        assert_eq!(processor.progress().hook_calls, 0);
    }

    #[test]
    fn test_run_completes_and_publishes() {
        let temp = TempDir::new().unwrap();
        let processor = processor(500);
        let trace = share(Box::new(StageTraceFactory::create(FactoryContext::detached())));
        let uuid = trace.read().uuid().to_string();

        let started = processor
            .run(&inputs(&temp, 3), &[Arc::clone(&trace)], parser())
            .unwrap();
        assert_eq!(started, RunStart::Started);

        let report = processor.wait(Duration::from_secs(10)).unwrap();
        assert!(report.is_completed());
        assert_eq!(report.hook_calls, 4 * 3);
        assert_eq!(report.work_done, report.work_total);
        assert_eq!(processor.state(), ProcessorState::Stopped);

        let data = processor.last_data().unwrap();
        assert_eq!(
            data.get(&StageTraceFactory::records_key(&uuid)),
            Some(serde_json::json!(2))
        );
    }

    #[test]
    fn test_second_run_refused_while_running() {
        let temp = TempDir::new().unwrap();
        let processor = processor(2000);
        let (slow, started, release) = sleeper(Duration::from_secs(5));
        let files = inputs(&temp, 1);

        processor.run(&files, &[Arc::clone(&slow)], parser()).unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);
        assert!(matches!(
            processor.run(&files, &[slow], parser()),
            Err(RuntimeError::AlreadyRunning)
        ));

        release.store(true, Ordering::SeqCst);
        assert!(processor.wait(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_cooperative_stop_skips_remaining_files() {
        let temp = TempDir::new().unwrap();
        let processor = processor(5000);
        let (slow, started, _release) = sleeper(Duration::from_millis(300));

        processor.run(&inputs(&temp, 3), &[slow], parser()).unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);

        assert_eq!(processor.stop().unwrap(), StopOutcome::Stopped);
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let report = processor.last_report().unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert!(report.files_completed <= 1);
        assert_eq!(processor.stop().unwrap(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn test_checkpoint_makes_long_hooks_stoppable() {
        let temp = TempDir::new().unwrap();
        let processor = processor(5000);
        let mut dummy = DummyLoadFactory::create(FactoryContext::detached());
        dummy.set_load(Stage::Filename, StageLoad::new(1000, 0.01));

        processor
            .run(&inputs(&temp, 3), &[share(Box::new(dummy))], parser())
            .unwrap();
        wait_for(|| processor.progress().work_done > 0);

        assert_eq!(processor.stop().unwrap(), StopOutcome::Stopped);
        let report = processor.last_report().unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.files_completed, 0);
    }

    #[test]
    fn test_stop_timeout_then_force_terminate() {
        let temp = TempDir::new().unwrap();
        let processor = processor(50);
        let (slow, started, release) = sleeper(Duration::from_secs(10));

        processor.run(&inputs(&temp, 3), &[slow], parser()).unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);

        let err = processor.stop().unwrap_err();
        assert!(matches!(err, RuntimeError::CancellationTimeout { .. }));
        assert_eq!(processor.state(), ProcessorState::Running);

        assert_eq!(
            processor.resolve_stall(StallDecision::ForceTerminate),
            ProcessorState::Stopped
        );
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(processor.last_report().unwrap().outcome, RunOutcome::Aborted);

        // the detached thread still holds the factory and the executing instance
        thread::sleep(Duration::from_millis(30));
        assert_eq!(Arc::strong_count(&release), 3);

        let frozen = processor.progress();
        release.store(true, Ordering::SeqCst);
        wait_for(|| Arc::strong_count(&release) == 1);
        assert_eq!(processor.progress(), frozen);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandon_keeps_run_winding_down() {
        let temp = TempDir::new().unwrap();
        let processor = processor(20);
        let (slow, started, release) = sleeper(Duration::from_secs(10));

        processor.run(&inputs(&temp, 3), &[slow], parser()).unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);
        assert!(processor.stop().is_err());

        assert_eq!(
            processor.resolve_stall(StallDecision::Abandon),
            ProcessorState::Running
        );
        release.store(true, Ordering::SeqCst);

        let report = processor.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_sees_run() {
        #[derive(Default)]
        struct Counting {
            work: AtomicUsize,
            complete: AtomicUsize,
        }

        impl RunObserver for Counting {
            fn notify_work_done(&self, amount: u64) {
                self.work.fetch_add(amount as usize, Ordering::SeqCst);
            }

            fn notify_run_complete(&self, _report: &RunReport) {
                self.complete.fetch_add(1, Ordering::SeqCst);
            }
        }

        let temp = TempDir::new().unwrap();
        let observer = Arc::new(Counting::default());
        let processor = Processor::new(observer.clone(), Duration::from_secs(1));
        let trace = share(Box::new(StageTraceFactory::create(FactoryContext::detached())));

        processor.run(&inputs(&temp, 2), &[trace], parser()).unwrap();
        let report = processor.wait(Duration::from_secs(10)).unwrap();

        assert_eq!(observer.work.load(Ordering::SeqCst) as u64, report.work_total);
        assert_eq!(observer.complete.load(Ordering::SeqCst), 1);
    }
}
