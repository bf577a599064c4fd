// file: src/plugin/builtin/stage_trace.rs
// description: developer plugin that traces every hook and publishes record counts into the run data
// reference: exercises every capability a plugin has on its handler

use crate::error::{Result, RuntimeError};
use crate::pipeline::context::RunContext;
use crate::pipeline::parser::{LogRecord, ParsedLog};
use crate::pipeline::stage::Stage;
use crate::plugin::factory::{FactoryContext, FactoryCore, FactoryType, PluginFactory};
use crate::plugin::instance::PluginInstance;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_WORK: u64 = 4;

pub struct StageTraceFactory {
    core: FactoryCore,
    work: u64,
}

impl StageTraceFactory {
    pub fn set_work(&mut self, work: u64) {
        self.work = work;
    }

    /// Run data key under which the parsed record count is published.
    pub fn records_key(uuid: &str) -> String {
        format!("{}.records", uuid)
    }

    pub fn messages_key(uuid: &str) -> String {
        format!("{}.messages", uuid)
    }
}

impl FactoryType for StageTraceFactory {
    const TYPE_NAME: &'static str = "stage_trace";
    const DISPLAY_NAME: &'static str = "Stage trace";
    const DESCRIPTION: &'static str =
        "Logs every stage hook and publishes record and message counts for later plugins.";
    const INSTANCE_TYPE: &'static str = "stage_trace_instance";

    fn create(context: FactoryContext) -> Self {
        Self {
            core: FactoryCore::new(Self::TYPE_NAME, Self::DISPLAY_NAME, context),
            work: DEFAULT_WORK,
        }
    }
}

impl PluginFactory for StageTraceFactory {
    fn core(&self) -> &FactoryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FactoryCore {
        &mut self.core
    }

    fn work_per_file(&self) -> u64 {
        self.work
    }

    fn export_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("work".to_string(), Value::from(self.work));
        payload
    }

    fn import_payload(&mut self, payload: &Map<String, Value>) -> Result<()> {
        if let Some(work) = payload.get("work") {
            self.work = work.as_u64().ok_or_else(|| {
                RuntimeError::Validation(format!("work must be a positive integer, got {}", work))
            })?;
        }
        Ok(())
    }

    fn give_instance(&self, ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>> {
        if ctx.is_debug() {
            debug!("{}: giving new instance", self.core.display_name);
        }
        Ok(Box::new(StageTraceInstance {
            uuid: self.core.uuid.clone(),
            work: self.work,
            file: String::new(),
        }))
    }
}

pub struct StageTraceInstance {
    uuid: String,
    work: u64,
    file: String,
}

impl PluginInstance for StageTraceInstance {
    fn on_filename(&mut self, _ctx: &RunContext, path: &Path) -> anyhow::Result<()> {
        self.file = path.display().to_string();
        info!("Stage trace: filename {}", self.file);
        Ok(())
    }

    fn on_file_handle(&mut self, _ctx: &RunContext, file: &mut File) -> anyhow::Result<()> {
        let size = file.metadata()?.len();
        info!("Stage trace: file handle for {} ({} bytes)", self.file, size);
        Ok(())
    }

    fn on_parsed_log(&mut self, ctx: &RunContext, log: &mut ParsedLog) -> anyhow::Result<()> {
        let mut count = 0u64;
        while log.recv().is_some() {
            count += 1;
        }
        info!("Stage trace: parsed log of {} with {} records", self.file, count);
        ctx.publish(&StageTraceFactory::records_key(&self.uuid), count)?;
        Ok(())
    }

    fn on_messages(&mut self, ctx: &RunContext, messages: &[LogRecord]) -> anyhow::Result<()> {
        info!(
            "Stage trace: {} messages in {}",
            messages.len(),
            self.file
        );
        ctx.publish(
            &StageTraceFactory::messages_key(&self.uuid),
            messages.len() as u64,
        )?;
        Ok(())
    }

    /// `work` split evenly over the stages, remainder going to the earliest ones.
    fn stage_work(&self, stage: Stage) -> u64 {
        let stages = Stage::ALL.len() as u64;
        let base = self.work / stages;
        let extra = u64::from((stage.index() as u64) < self.work % stages);
        base + extra
    }

    fn cleanup(&mut self, _ctx: &RunContext) {
        debug!("Stage trace: done with {}", self.file);
    }
}
