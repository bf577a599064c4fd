// file: src/pipeline/mod.rs
// description: pipeline module exports and public api
// reference: pipeline execution

pub mod context;
pub mod observer;
pub mod parser;
pub mod processor;
pub mod progress;
pub mod stage;
pub mod worker;

pub use context::{CancelToken, Cancelled, DataOwner, RunContext, RunData};
pub use observer::{LogObserver, NullObserver, RunObserver, SharedObserver};
pub use parser::{LogParser, LogRecord, ParsedLog, TextLogParser};
pub use processor::{ProcessorState, Processor, RunStart, StallDecision, StopOutcome};
pub use progress::{ProgressBarObserver, ProgressSnapshot, RunProgress};
pub use stage::Stage;
pub use worker::{RunOutcome, RunReport};
