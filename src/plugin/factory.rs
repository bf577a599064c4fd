// file: src/plugin/factory.rs
// description: long-lived, user-configurable plugin factory and its handler binding
// reference: factories produce a fresh instance per file per run

use crate::error::{Result, RuntimeError};
use crate::pipeline::context::RunContext;
use crate::pipeline::observer::{NullObserver, SharedObserver};
use crate::pipeline::stage::Stage;
use crate::plugin::instance::PluginInstance;
use crate::plugin::savestate::Savestate;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Binding of a factory to the handler that owns it.
#[derive(Clone)]
pub struct FactoryContext {
    pub debug: bool,
    pub observer: SharedObserver,
}

impl FactoryContext {
    pub fn new(debug: bool, observer: SharedObserver) -> Self {
        Self { debug, observer }
    }

    /// Context with no handler behind it.
    pub fn detached() -> Self {
        Self::new(false, Arc::new(NullObserver))
    }
}

impl fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryContext")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// State shared by every factory implementation.
#[derive(Debug, Clone)]
pub struct FactoryCore {
    pub uuid: String,
    pub type_name: String,
    pub display_name: String,
    pub active: bool,
    pub context: FactoryContext,
}

impl FactoryCore {
    pub fn new(type_name: &str, display_name: &str, context: FactoryContext) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            type_name: type_name.to_string(),
            display_name: display_name.to_string(),
            active: true,
            context,
        }
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = uuid.to_string();
        self
    }
}

pub trait PluginFactory: Send + Sync {
    fn core(&self) -> &FactoryCore;

    fn core_mut(&mut self) -> &mut FactoryCore;

    /// Progress units one file costs this plugin. Defaults to one per stage.
    fn work_per_file(&self) -> u64 {
        Stage::ALL.len() as u64
    }

    /// Factory-specific part of the savestate.
    fn export_payload(&self) -> Map<String, Value> {
        Map::new()
    }

    fn import_payload(&mut self, _payload: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    /// Fresh instance for one file of the current run.
    fn give_instance(&self, ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>>;

    /// Called when the factory leaves the chain.
    fn cleanup_and_exit(&mut self) {}

    fn uuid(&self) -> &str {
        &self.core().uuid
    }

    fn type_name(&self) -> &str {
        &self.core().type_name
    }

    fn display_name(&self) -> &str {
        &self.core().display_name
    }

    fn is_active(&self) -> bool {
        self.core().active
    }

    fn set_active(&mut self, active: bool) {
        self.core_mut().active = active;
    }

    fn is_debug(&self) -> bool {
        self.core().context.debug
    }

    /// Relays work done outside a run to the owning handler.
    fn notify_work_done(&self, amount: u64) {
        self.core().context.observer.notify_work_done(amount);
    }

    fn export_savestate(&self) -> Savestate {
        Savestate::new(
            self.type_name(),
            self.display_name(),
            self.uuid(),
            self.export_payload(),
        )
    }

    /// Applies `state` and re-binds the factory to `context`.
    ///
    /// A savestate of another type is refused and the factory is left untouched.
    fn import_savestate(&mut self, state: &Savestate, context: FactoryContext) -> Result<()> {
        if state.type_name != self.type_name() {
            error!(
                "Savestate of type {} cannot be applied to a {} factory",
                state.type_name,
                self.type_name()
            );
            return Err(RuntimeError::InvariantViolation(format!(
                "savestate type {} does not match factory type {}",
                state.type_name,
                self.type_name()
            )));
        }

        self.import_payload(&state.payload)?;
        let core = self.core_mut();
        core.uuid = state.uuid.clone();
        core.context = context;
        Ok(())
    }
}

/// A factory type the registry can construct by name.
pub trait FactoryType: PluginFactory + Sized + 'static {
    const TYPE_NAME: &'static str;
    const DISPLAY_NAME: &'static str;
    const DESCRIPTION: &'static str = "";
    const AUTHOR: &'static str = "";
    const INSTANCE_TYPE: &'static str;

    fn create(context: FactoryContext) -> Self;
}

/// Factory handle shared between the chain owner and the execution thread.
pub type SharedFactory = Arc<RwLock<Box<dyn PluginFactory>>>;

pub fn share(factory: Box<dyn PluginFactory>) -> SharedFactory {
    Arc::new(RwLock::new(factory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Counter {
        core: FactoryCore,
        limit: u64,
    }

    struct CounterInstance;

    impl PluginInstance for CounterInstance {}

    impl PluginFactory for Counter {
        fn core(&self) -> &FactoryCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut FactoryCore {
            &mut self.core
        }

        fn export_payload(&self) -> Map<String, Value> {
            let mut payload = Map::new();
            payload.insert("limit".to_string(), json!(self.limit));
            payload
        }

        fn import_payload(&mut self, payload: &Map<String, Value>) -> Result<()> {
            self.limit = payload
                .get("limit")
                .and_then(Value::as_u64)
                .ok_or_else(|| RuntimeError::Validation("limit must be an integer".to_string()))?;
            Ok(())
        }

        fn give_instance(&self, _ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>> {
            Ok(Box::new(CounterInstance))
        }
    }

    fn counter(limit: u64) -> Counter {
        Counter {
            core: FactoryCore::new("counter", "Counter", FactoryContext::detached()),
            limit,
        }
    }

    #[test]
    fn test_new_factory_has_identity() {
        let a = counter(1);
        let b = counter(1);
        assert_ne!(a.uuid(), b.uuid());
        assert!(Uuid::parse_str(a.uuid()).is_ok());
        assert!(a.is_active());
        assert_eq!(a.work_per_file(), 4);
    }

    #[test]
    fn test_savestate_roundtrip_keeps_uuid_and_payload() {
        let original = counter(7);
        let state = original.export_savestate();
        assert_eq!(state.type_name, "counter");
        assert_eq!(state.display_name, "Counter");

        let mut restored = counter(0);
        restored
            .import_savestate(&state, FactoryContext::detached())
            .unwrap();

        assert_eq!(restored.uuid(), original.uuid());
        assert_eq!(restored.export_savestate(), state);
    }

    #[test]
    fn test_mismatched_savestate_is_refused() {
        let mut target = counter(3);
        let uuid = target.uuid().to_string();
        let mut state = counter(9).export_savestate();
        state.type_name = "other".to_string();

        let err = target
            .import_savestate(&state, FactoryContext::detached())
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(target.uuid(), uuid);
        assert_eq!(target.limit, 3);
    }

    #[test]
    fn test_bad_payload_leaves_identity() {
        let mut target = counter(3);
        let uuid = target.uuid().to_string();
        let mut state = counter(9).export_savestate();
        state.payload.insert("limit".to_string(), json!("many"));

        assert!(target.import_savestate(&state, FactoryContext::detached()).is_err());
        assert_eq!(target.uuid(), uuid);
    }

    #[test]
    fn test_shared_factory_toggle() {
        let shared = share(Box::new(counter(1)));
        shared.write().set_active(false);
        assert!(!shared.read().is_active());
    }
}
