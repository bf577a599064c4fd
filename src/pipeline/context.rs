// file: src/pipeline/context.rs
// description: per-run context handed to plugin instances, cancellation token and run data bag
// reference: cooperative cancellation checked at hook boundaries and explicit checkpoints

use crate::error::{Result, RuntimeError};
use crate::pipeline::observer::{RunObserver, SharedObserver};
use crate::pipeline::progress::RunProgress;
use crate::pipeline::stage::Stage;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Marker error a hook returns (usually via [`RunContext::checkpoint`]) when
/// it noticed the run is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

/// Shared abort and kill flags of one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    abort: Arc<AtomicBool>,
    kill: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cooperative stop, observed between files and at checkpoints.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Forced stop. Implies abort and silences the worker.
    pub fn request_kill(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> std::result::Result<(), Cancelled> {
        if self.is_abort_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Producer of a run data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataOwner {
    pub plugin: String,
    pub stage: Stage,
}

impl fmt::Display for DataOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} stage)", self.plugin, self.stage)
    }
}

#[derive(Debug, Clone)]
struct DataEntry {
    value: Value,
    owner: DataOwner,
}

/// Keyed store owned by one run. Anyone reads; only the producer of a key
/// may rewrite or delete it.
#[derive(Debug, Default)]
pub struct RunData {
    entries: RwLock<BTreeMap<String, DataEntry>>,
}

impl RunData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn owner_of(&self, key: &str) -> Option<DataOwner> {
        self.entries.read().get(key).map(|entry| entry.owner.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>, owner: &DataOwner) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key)
            && existing.owner != *owner
        {
            return Err(RuntimeError::DataOwnership {
                key: key.to_string(),
                owner: existing.owner.to_string(),
            });
        }
        entries.insert(
            key.to_string(),
            DataEntry {
                value: value.into(),
                owner: owner.clone(),
            },
        );
        Ok(())
    }

    pub fn delete(&self, key: &str, owner: &DataOwner) -> Result<Value> {
        let mut entries = self.entries.write();
        let Some(existing) = entries.get(key) else {
            return Err(RuntimeError::NotFound(format!("run data key {}", key)));
        };
        if existing.owner != *owner {
            return Err(RuntimeError::DataOwnership {
                key: key.to_string(),
                owner: existing.owner.to_string(),
            });
        }
        Ok(entries
            .remove(key)
            .map(|entry| entry.value)
            .unwrap_or(Value::Null))
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Position {
    stage: Option<Stage>,
    plugin: Option<String>,
}

/// What a plugin instance sees of the run it is part of.
pub struct RunContext {
    token: CancelToken,
    observer: SharedObserver,
    progress: Arc<RunProgress>,
    data: Arc<RunData>,
    debug: bool,
    position: Mutex<Position>,
}

impl RunContext {
    pub fn new(
        token: CancelToken,
        observer: SharedObserver,
        progress: Arc<RunProgress>,
        debug: bool,
    ) -> Self {
        Self {
            token,
            observer,
            progress,
            data: Arc::new(RunData::new()),
            debug,
            position: Mutex::new(Position::default()),
        }
    }

    /// Reports `amount` units of plugin-defined work. Silent after a forced stop.
    pub fn notify_work_done(&self, amount: u64) {
        if self.token.is_killed() || amount == 0 {
            return;
        }
        self.progress.add_work(amount);
        self.observer.notify_work_done(amount);
    }

    /// Fails with [`Cancelled`] once a stop has been requested.
    pub fn checkpoint(&self) -> std::result::Result<(), Cancelled> {
        self.token.checkpoint()
    }

    pub fn data(&self) -> &RunData {
        &self.data
    }

    pub(crate) fn shared_data(&self) -> Arc<RunData> {
        Arc::clone(&self.data)
    }

    /// Writes `key` into the run data as the currently executing plugin and stage.
    pub fn publish(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let owner = self.current_owner()?;
        self.data.set(key, value, &owner)
    }

    /// Removes a key previously published by the current plugin and stage.
    pub fn retract(&self, key: &str) -> Result<Value> {
        let owner = self.current_owner()?;
        self.data.delete(key, &owner)
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.position.lock().stage
    }

    /// Uuid of the plugin whose hook is executing.
    pub fn active_plugin(&self) -> Option<String> {
        self.position.lock().plugin.clone()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub(crate) fn enter_stage(&self, stage: Stage) {
        self.position.lock().stage = Some(stage);
        self.emit(|observer| observer.notify_stage_changed(stage));
    }

    pub(crate) fn enter_plugin(&self, uuid: &str, display_name: &str) {
        self.position.lock().plugin = Some(uuid.to_string());
        self.emit(|observer| observer.notify_active_plugin(display_name));
    }

    pub(crate) fn leave_plugin(&self) {
        self.position.lock().plugin = None;
    }

    /// Delivers a notification unless the run was forcibly stopped.
    pub(crate) fn emit(&self, notify: impl FnOnce(&dyn RunObserver)) {
        if !self.token.is_killed() {
            notify(self.observer.as_ref());
        }
    }

    pub(crate) fn progress(&self) -> &RunProgress {
        &self.progress
    }

    fn current_owner(&self) -> Result<DataOwner> {
        let position = self.position.lock();
        match (&position.plugin, position.stage) {
            (Some(plugin), Some(stage)) => Ok(DataOwner {
                plugin: plugin.clone(),
                stage,
            }),
            _ => Err(RuntimeError::InvariantViolation(
                "run data written outside of a plugin hook".to_string(),
            )),
        }
    }
}
