// file: src/plugin/builtin/mod.rs
// description: developer plugins shipped with the runtime
// reference: internal module structure

pub mod dummy_load;
pub mod stage_trace;

pub use dummy_load::{DummyLoadFactory, StageLoad};
pub use stage_trace::StageTraceFactory;
