// file: src/store/mod.rs
// description: configuration store module exports
// reference: internal module structure

pub mod archive;
pub mod document;
pub mod manager;
pub mod scope;

pub use document::{ConfigDocument, ZIP_ENTRY_NAME};
pub use manager::{ConfigManager, SLOTS_KEY, SharedDocument, SlotRecord};
pub use scope::{SCOPE_KEY, Scope, UUID_KEY};
