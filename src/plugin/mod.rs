// file: src/plugin/mod.rs
// description: plugin factories, instances, registry and savestate persistence
// reference: internal module structure

pub mod builtin;
pub mod factory;
pub mod instance;
pub mod manifest;
pub mod persist;
pub mod registry;
pub mod savestate;

pub use factory::{FactoryContext, FactoryCore, FactoryType, PluginFactory, SharedFactory, share};
pub use instance::PluginInstance;
pub use manifest::PluginManifest;
pub use persist::SavestateFormat;
pub use registry::{Catalogue, PluginRegistry, Registration};
pub use savestate::Savestate;
