// file: src/lib.rs
// description: library entry point and public api exports
// reference: rust library patterns

//! Plugin runtime that drives batches of log files through a chain of
//! analysis plugins, with layered JSON configuration and savestate files.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod session;
pub mod store;
pub mod utils;

pub use config::{ExecutorConfig, LoggingConfig, MasterConfig, PluginConfig, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use pipeline::{
    CancelToken, Cancelled, LogObserver, LogParser, LogRecord, NullObserver, ParsedLog, Processor,
    ProcessorState, ProgressBarObserver, ProgressSnapshot, RunContext, RunData, RunObserver,
    RunOutcome, RunReport, RunStart, Stage, StallDecision, StopOutcome, TextLogParser,
};
pub use plugin::{
    Catalogue, FactoryContext, FactoryCore, FactoryType, PluginFactory, PluginInstance,
    PluginRegistry, Registration, Savestate, SavestateFormat, SharedFactory,
};
pub use session::{Session, default_observer};
pub use store::{ConfigDocument, ConfigManager, Scope};
pub use utils::{OperationTimer, Validator, init_logger};
