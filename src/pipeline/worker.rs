// file: src/pipeline/worker.rs
// description: execution unit driving every input file through the four stages of the plugin chain
// reference: file-major, stage-minor, chain order within a stage

use crate::error::RuntimeError;
use crate::pipeline::context::{RunContext, is_cancellation};
use crate::pipeline::parser::LogParser;
use crate::pipeline::stage::Stage;
use crate::plugin::factory::SharedFactory;
use crate::plugin::instance::PluginInstance;
use crate::utils::telemetry::OperationTimer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const SLOW_FILE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    Aborted,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub files_total: usize,
    pub files_completed: usize,
    pub hook_calls: u64,
    pub work_done: u64,
    pub work_total: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Inputs of one run, fixed when the run starts.
pub struct RunPlan {
    pub files: Vec<PathBuf>,
    pub factories: Vec<SharedFactory>,
    pub parser: Arc<dyn LogParser>,
}

impl RunPlan {
    pub fn work_total(&self) -> u64 {
        let per_file: u64 = self
            .factories
            .iter()
            .map(|factory| factory.read().work_per_file())
            .sum::<u64>()
            + self.parser.work_per_file();
        per_file * self.files.len() as u64
    }
}

/// Why processing of a file stopped early.
enum Halt {
    Cancelled,
    Failed(RuntimeError),
}

impl From<RuntimeError> for Halt {
    fn from(err: RuntimeError) -> Self {
        Halt::Failed(err)
    }
}

struct LiveInstance {
    uuid: String,
    display_name: String,
    instance: Box<dyn PluginInstance>,
}

pub struct Worker {
    plan: RunPlan,
    ctx: RunContext,
}

impl Worker {
    pub fn new(plan: RunPlan, ctx: RunContext) -> Self {
        Self { plan, ctx }
    }

    pub fn run(self) -> RunReport {
        let started_at = Utc::now();
        let timer = OperationTimer::new("pipeline run");
        let files_total = self.plan.files.len();
        let work_total = self.plan.work_total();

        self.ctx.progress().reset(files_total, work_total);
        self.ctx
            .emit(|observer| observer.notify_run_started(files_total, work_total));

        let mut outcome = RunOutcome::Completed;
        for (index, path) in self.plan.files.iter().enumerate() {
            if self.ctx.token().is_abort_requested() {
                info!("Abort requested, not starting {}", path.display());
                outcome = RunOutcome::Aborted;
                break;
            }

            match self.process_file(path, index, files_total) {
                Ok(()) => self.ctx.progress().complete_file(),
                Err(Halt::Cancelled) => {
                    info!("Run cancelled while processing {}", path.display());
                    outcome = RunOutcome::Aborted;
                    break;
                }
                Err(Halt::Failed(e)) => {
                    error!("Run failed on {}: {}", path.display(), e);
                    outcome = RunOutcome::Failed(e.to_string());
                    break;
                }
            }
        }

        let snapshot = self.ctx.progress().snapshot();
        let report = RunReport {
            outcome,
            files_total,
            files_completed: snapshot.files_completed,
            hook_calls: snapshot.hook_calls,
            work_done: snapshot.work_done,
            work_total,
            started_at,
            finished_at: Utc::now(),
        };
        timer.finish_run(report.files_completed, report.work_done);
        self.ctx
            .emit(|observer| observer.notify_run_complete(&report));
        report
    }

    fn process_file(&self, path: &Path, index: usize, total: usize) -> Result<(), Halt> {
        let timer = OperationTimer::new(&format!("file {}", path.display()));
        self.ctx
            .emit(|observer| observer.notify_file_started(path, index, total));

        let mut instances = self.instantiate()?;
        let result = self.drive_stages(path, &mut instances);

        if !self.ctx.token().is_killed() {
            for live in instances.iter_mut() {
                live.instance.cleanup(&self.ctx);
            }
        }

        if result.is_ok() {
            timer.warn_if_slow(SLOW_FILE, "stage hooks");
            timer.finish();
        }
        result
    }

    fn instantiate(&self) -> Result<Vec<LiveInstance>, Halt> {
        let mut instances: Vec<LiveInstance> = Vec::with_capacity(self.plan.factories.len());
        for factory in &self.plan.factories {
            let factory = factory.read();
            let instance = match factory.give_instance(&self.ctx) {
                Ok(instance) => instance,
                Err(source) => {
                    for live in instances.iter_mut() {
                        live.instance.cleanup(&self.ctx);
                    }
                    return Err(RuntimeError::Plugin {
                        plugin: factory.display_name().to_string(),
                        stage: "instantiation".to_string(),
                        source,
                    }
                    .into());
                }
            };
            instances.push(LiveInstance {
                uuid: factory.uuid().to_string(),
                display_name: factory.display_name().to_string(),
                instance,
            });
        }
        Ok(instances)
    }

    fn drive_stages(&self, path: &Path, instances: &mut [LiveInstance]) -> Result<(), Halt> {
        self.run_stage(Stage::Filename, instances, |instance, ctx| {
            instance.on_filename(ctx, path)
        })?;

        let mut file = File::open(path).map_err(|e| RuntimeError::file_operation(path, e))?;
        self.run_stage(Stage::Filehandle, instances, |instance, ctx| {
            instance.on_file_handle(ctx, &mut file)
        })?;

        let mut log = self.plan.parser.parse(&mut file, path)?;
        drop(file);
        debug!(
            "{} parsed {} records from {}",
            self.plan.parser.name(),
            log.len(),
            path.display()
        );
        self.ctx.notify_work_done(self.plan.parser.work_per_file());

        self.run_stage(Stage::ParsedLog, instances, |instance, ctx| {
            log.rewind();
            instance.on_parsed_log(ctx, &mut log)
        })?;

        let messages = log.into_messages();
        self.run_stage(Stage::Messages, instances, |instance, ctx| {
            instance.on_messages(ctx, &messages)
        })
    }

    fn run_stage<F>(&self, stage: Stage, instances: &mut [LiveInstance], mut hook: F) -> Result<(), Halt>
    where
        F: FnMut(&mut dyn PluginInstance, &RunContext) -> anyhow::Result<()>,
    {
        if self.ctx.token().is_killed() {
            return Err(Halt::Cancelled);
        }
        self.ctx.enter_stage(stage);

        for live in instances.iter_mut() {
            if self.ctx.token().is_killed() {
                return Err(Halt::Cancelled);
            }
            self.ctx.enter_plugin(&live.uuid, &live.display_name);
            let result = hook(live.instance.as_mut(), &self.ctx);
            self.ctx.leave_plugin();
            if self.ctx.token().is_killed() {
                return Err(Halt::Cancelled);
            }
            self.ctx.progress().record_hook();

            match result {
                Ok(()) => self.ctx.notify_work_done(live.instance.stage_work(stage)),
                Err(e) if is_cancellation(&e) => return Err(Halt::Cancelled),
                Err(source) => {
                    error!(
                        "Plugin {} failed during {} stage: {:#}",
                        live.display_name, stage, source
                    );
                    return Err(Halt::Failed(RuntimeError::Plugin {
                        plugin: live.display_name.clone(),
                        stage: stage.name().to_string(),
                        source,
                    }));
                }
            }
        }
        Ok(())
    }
}
