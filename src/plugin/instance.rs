// file: src/plugin/instance.rs
// description: short-lived per-file plugin execution object with the four stage hooks
// reference: every hook is optional; the executor calls all four in fixed order

use crate::pipeline::context::RunContext;
use crate::pipeline::parser::{LogRecord, ParsedLog};
use crate::pipeline::stage::Stage;
use std::fs::File;
use std::path::Path;

/// Executes plugin logic against one file during one run.
///
/// Hooks report failure through `anyhow`; returning
/// [`Cancelled`](crate::pipeline::context::Cancelled) ends the run as aborted
/// rather than failed.
pub trait PluginInstance: Send {
    fn on_filename(&mut self, _ctx: &RunContext, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_file_handle(&mut self, _ctx: &RunContext, _file: &mut File) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_parsed_log(&mut self, _ctx: &RunContext, _log: &mut ParsedLog) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_messages(&mut self, _ctx: &RunContext, _messages: &[LogRecord]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Work units the executor reports after this instance's hook for `stage`.
    fn stage_work(&self, _stage: Stage) -> u64 {
        1
    }

    /// Called after the last stage, whether or not the file succeeded.
    fn cleanup(&mut self, _ctx: &RunContext) {}
}
