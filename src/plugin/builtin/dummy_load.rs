// file: src/plugin/builtin/dummy_load.rs
// description: developer plugin pretending to perform a configurable amount of work per stage
// reference: used to exercise progress reporting and cooperative stop

use crate::error::{Result, RuntimeError};
use crate::pipeline::context::RunContext;
use crate::pipeline::parser::{LogRecord, ParsedLog};
use crate::pipeline::stage::Stage;
use crate::plugin::factory::{FactoryContext, FactoryCore, FactoryType, PluginFactory};
use crate::plugin::instance::PluginInstance;
use serde_json::{Map, Value, json};
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Steps and seconds per step for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageLoad {
    pub steps: u64,
    pub seconds_per_step: f64,
}

impl StageLoad {
    pub fn new(steps: u64, seconds_per_step: f64) -> Self {
        Self {
            steps,
            seconds_per_step,
        }
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_secs_f64(self.steps as f64 * self.seconds_per_step.max(0.0))
    }
}

pub struct DummyLoadFactory {
    core: FactoryCore,
    loads: [StageLoad; 4],
}

impl DummyLoadFactory {
    pub fn loads(&self) -> &[StageLoad; 4] {
        &self.loads
    }

    pub fn set_load(&mut self, stage: Stage, load: StageLoad) {
        self.loads[stage.index()] = load;
    }

    /// Wall time one file spends in this plugin.
    pub fn total_time(&self) -> Duration {
        self.loads.iter().map(StageLoad::total_time).sum()
    }
}

impl FactoryType for DummyLoadFactory {
    const TYPE_NAME: &'static str = "dummy_load";
    const DISPLAY_NAME: &'static str = "Dummy workload";
    const DESCRIPTION: &'static str =
        "Pretends to perform (a configurable amount of) work at the given stages.";
    const INSTANCE_TYPE: &'static str = "dummy_load_instance";

    fn create(context: FactoryContext) -> Self {
        Self {
            core: FactoryCore::new(Self::TYPE_NAME, Self::DISPLAY_NAME, context),
            loads: [StageLoad::default(); 4],
        }
    }
}

impl PluginFactory for DummyLoadFactory {
    fn core(&self) -> &FactoryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FactoryCore {
        &mut self.core
    }

    fn work_per_file(&self) -> u64 {
        self.loads.iter().map(|load| load.steps).sum()
    }

    fn export_payload(&self) -> Map<String, Value> {
        let load: Map<String, Value> = self
            .loads
            .iter()
            .enumerate()
            .map(|(i, load)| (i.to_string(), json!([load.steps, load.seconds_per_step])))
            .collect();
        let mut payload = Map::new();
        payload.insert("load".to_string(), Value::Object(load));
        payload
    }

    fn import_payload(&mut self, payload: &Map<String, Value>) -> Result<()> {
        let Some(load) = payload.get("load") else {
            return Ok(());
        };
        let load = load
            .as_object()
            .ok_or_else(|| RuntimeError::Validation("load must be an object".to_string()))?;

        let mut loads = self.loads;
        for (key, entry) in load {
            let index: usize = key
                .parse()
                .ok()
                .filter(|i| *i < loads.len())
                .ok_or_else(|| RuntimeError::Validation(format!("unknown stage index {}", key)))?;
            loads[index] = parse_load(entry).ok_or_else(|| {
                RuntimeError::Validation(format!("stage {} load must be [steps, seconds]", key))
            })?;
        }
        self.loads = loads;
        Ok(())
    }

    fn give_instance(&self, _ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(DummyLoadInstance { loads: self.loads }))
    }
}

fn parse_load(entry: &Value) -> Option<StageLoad> {
    let pair = entry.as_array()?;
    let [steps, seconds] = pair.as_slice() else {
        return None;
    };
    Some(StageLoad::new(steps.as_u64()?, seconds.as_f64()?))
}

pub struct DummyLoadInstance {
    loads: [StageLoad; 4],
}

impl DummyLoadInstance {
    fn exec_load(&self, ctx: &RunContext, stage: Stage) -> anyhow::Result<()> {
        let load = self.loads[stage.index()];
        let pause = Duration::from_secs_f64(load.seconds_per_step.max(0.0));
        for _ in 0..load.steps {
            ctx.checkpoint()?;
            if !pause.is_zero() {
                thread::sleep(pause);
            }
            ctx.notify_work_done(1);
        }
        Ok(())
    }
}

impl PluginInstance for DummyLoadInstance {
    fn on_filename(&mut self, ctx: &RunContext, _path: &Path) -> anyhow::Result<()> {
        self.exec_load(ctx, Stage::Filename)
    }

    fn on_file_handle(&mut self, ctx: &RunContext, _file: &mut File) -> anyhow::Result<()> {
        self.exec_load(ctx, Stage::Filehandle)
    }

    fn on_parsed_log(&mut self, ctx: &RunContext, _log: &mut ParsedLog) -> anyhow::Result<()> {
        self.exec_load(ctx, Stage::ParsedLog)
    }

    fn on_messages(&mut self, ctx: &RunContext, _messages: &[LogRecord]) -> anyhow::Result<()> {
        self.exec_load(ctx, Stage::Messages)
    }

    // progress is reported step by step from inside the hooks
    fn stage_work(&self, _stage: Stage) -> u64 {
        0
    }
}
