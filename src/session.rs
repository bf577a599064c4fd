// file: src/session.rs
// description: headless driver owning the configuration, the plugin chain, the input list and the processor
// reference: the owning handler context of a run

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::pipeline::context::RunData;
use crate::pipeline::observer::{LogObserver, SharedObserver};
use crate::pipeline::parser::{LogParser, TextLogParser};
use crate::pipeline::processor::{Processor, ProcessorState, RunStart, StallDecision, StopOutcome};
use crate::pipeline::progress::{ProgressBarObserver, ProgressSnapshot};
use crate::pipeline::worker::RunReport;
use crate::plugin::factory::{FactoryContext, PluginFactory, SharedFactory, share};
use crate::plugin::persist::{self, SavestateFormat};
use crate::plugin::registry::{Catalogue, PluginRegistry};
use crate::store::manager::{ConfigManager, SharedDocument};
use crate::store::scope::Scope;
use crate::utils::validation::Validator;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Union-view key consulted for the debug flag handed to plugins.
pub const DEBUG_KEY: &str = "debug";

/// Key of the input list inside the inputs-scoped document.
pub const FILES_KEY: &str = "files";

/// Observer matching the terminal settings of `config`.
pub fn default_observer(config: &RuntimeConfig) -> SharedObserver {
    if config.executor.progress_bar {
        Arc::new(ProgressBarObserver::new(config.logging.color))
    } else {
        Arc::new(LogObserver)
    }
}

pub struct Session {
    config: RuntimeConfig,
    manager: ConfigManager,
    registry: PluginRegistry,
    processor: Processor,
    observer: SharedObserver,
    parser: Arc<dyn LogParser>,
    factories: Vec<SharedFactory>,
    files: Vec<PathBuf>,
}

impl Session {
    pub fn open(config: RuntimeConfig, observer: SharedObserver) -> Result<Self> {
        config.validate()?;

        let master_path = config.master_path();
        let manager = ConfigManager::open_with_extras(&master_path, &config.extra_slot_paths())?;
        let registry = PluginRegistry::with_builtins().with_directory(config.plugin_directory());
        let processor = Processor::from_config(&config.executor, Arc::clone(&observer));

        info!(
            "Session opened on {} with {} configuration slots",
            master_path.display(),
            manager.len()
        );

        Ok(Self {
            config,
            manager,
            registry,
            processor,
            observer,
            parser: Arc::new(TextLogParser),
            factories: Vec::new(),
            files: Vec::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConfigManager {
        &mut self.manager
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn set_parser(&mut self, parser: Arc<dyn LogParser>) {
        self.parser = parser;
    }

    /// `debug` from the mounted configuration, else the verbose logging flag.
    pub fn debug(&self) -> bool {
        self.manager
            .get(DEBUG_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(self.config.logging.verbose)
    }

    pub fn factory_context(&self) -> FactoryContext {
        FactoryContext::new(self.debug(), Arc::clone(&self.observer))
    }

    /// Fresh discovery of every plugin type available right now.
    pub fn catalogue(&self) -> Catalogue {
        self.registry.discover()
    }

    pub fn factories(&self) -> &[SharedFactory] {
        &self.factories
    }

    pub fn factory(&self, uuid: &str) -> Option<SharedFactory> {
        self.position(uuid).map(|index| Arc::clone(&self.factories[index]))
    }

    /// Appends a new factory of `type_name` to the end of the chain.
    pub fn add_plugin(&mut self, type_name: &str) -> Result<SharedFactory> {
        let factory = self
            .catalogue()
            .instantiate(type_name, self.factory_context())?;
        self.add_factory(factory)
    }

    /// Appends an already built factory. Its uuid must be new to the chain.
    pub fn add_factory(&mut self, factory: Box<dyn PluginFactory>) -> Result<SharedFactory> {
        let shared = share(factory);
        self.insert(Arc::clone(&shared))?;
        Ok(shared)
    }

    pub fn remove_plugin(&mut self, uuid: &str) -> Result<()> {
        self.ensure_idle()?;
        let index = self.require(uuid)?;
        let removed = self.factories.remove(index);
        let mut factory = removed.write();
        info!("Removing plugin {} ({})", factory.display_name(), uuid);
        factory.cleanup_and_exit();
        Ok(())
    }

    /// Moves the factory one place towards the chain start. False when already first.
    pub fn move_up(&mut self, uuid: &str) -> Result<bool> {
        let index = self.require(uuid)?;
        if index == 0 {
            return Ok(false);
        }
        self.factories.swap(index, index - 1);
        Ok(true)
    }

    /// Moves the factory one place towards the chain end. False when already last.
    pub fn move_down(&mut self, uuid: &str) -> Result<bool> {
        let index = self.require(uuid)?;
        if index + 1 >= self.factories.len() {
            return Ok(false);
        }
        self.factories.swap(index, index + 1);
        Ok(true)
    }

    pub fn set_active(&mut self, uuid: &str, active: bool) -> Result<()> {
        let index = self.require(uuid)?;
        self.factories[index].write().set_active(active);
        Ok(())
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Adds existing files to the input list, skipping ones already present.
    ///
    /// Every path is checked before any is added; returns how many were new.
    pub fn add_files<I, P>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut validated = Vec::new();
        for path in paths {
            validated.push(Validator::validate_file_path(path.as_ref())?);
        }

        let mut added = 0;
        for path in validated {
            if !self.files.contains(&path) {
                self.files.push(path);
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let before = self.files.len();
        self.files.retain(|file| file != &target);
        self.files.len() != before
    }

    pub fn clear_files(&mut self) {
        self.files.clear();
    }

    /// Writes the input list into the inputs-scoped document and saves it.
    pub fn save_inputs(&self) -> Result<()> {
        let doc = self.inputs_document()?;
        let files: Vec<Value> = self
            .files
            .iter()
            .map(|file| Value::from(file.to_string_lossy().to_string()))
            .collect();
        doc.set(FILES_KEY, files)?;
        doc.save()?;
        info!("Saved {} input files", self.files.len());
        Ok(())
    }

    /// Replaces the input list with the one stored in the inputs-scoped document.
    ///
    /// Entries that no longer name a file are dropped with a warning.
    pub fn load_inputs(&mut self) -> Result<usize> {
        let doc = self.inputs_document()?;
        let stored = match doc.get(FILES_KEY) {
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(RuntimeError::Validation(format!(
                    "{} must be a list of paths, got {}",
                    FILES_KEY, other
                )));
            }
            None => Vec::new(),
        };

        self.files.clear();
        for entry in stored {
            let Some(path) = entry.as_str() else {
                warn!("Ignoring non-path input entry {}", entry);
                continue;
            };
            match Validator::validate_file_path(Path::new(path)) {
                Ok(path) if !self.files.contains(&path) => self.files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Dropping input {}: {}", path, e),
            }
        }
        Ok(self.files.len())
    }

    /// Saves the chain. `.tbz` paths are zipped, anything else is plain.
    pub fn save_plugins(&self, path: &Path) -> Result<()> {
        persist::write_all(path, &self.factories, SavestateFormat::from_path(path))
    }

    /// Loads a saved chain. A factory whose uuid is already in the chain
    /// replaces the existing one at its position; the rest are appended.
    pub fn load_plugins(&mut self, path: &Path) -> Result<usize> {
        self.ensure_idle()?;
        let loaded = persist::read_all(
            path,
            &self.registry,
            &self.factory_context(),
            SavestateFormat::from_path(path),
        )?;

        let count = loaded.len();
        for factory in loaded {
            let shared = share(factory);
            match self.insert(Arc::clone(&shared)) {
                Ok(()) => {}
                Err(RuntimeError::DuplicateIdentity(uuid)) => self.refresh(&uuid, shared)?,
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    /// Starts a run of the active chain over the input list.
    pub fn go(&mut self) -> Result<RunStart> {
        let debug = self.debug();
        self.processor.set_debug(debug);
        self.processor
            .run(&self.files, &self.factories, Arc::clone(&self.parser))
    }

    pub fn stop(&self) -> Result<StopOutcome> {
        self.processor.stop()
    }

    pub fn resolve_stall(&self, decision: StallDecision) -> ProcessorState {
        self.processor.resolve_stall(decision)
    }

    pub fn wait(&self, timeout: Duration) -> Option<RunReport> {
        self.processor.wait(timeout)
    }

    pub fn state(&self) -> ProcessorState {
        self.processor.state()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.processor.progress()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.processor.last_report()
    }

    pub fn last_data(&self) -> Option<Arc<RunData>> {
        self.processor.last_data()
    }

    /// Stops any run, releases every factory and saves writable configuration.
    ///
    /// A run that does not stop within the stop timeout is left running and
    /// `CancellationTimeout` is returned; the caller decides through
    /// [`resolve_stall`](Self::resolve_stall) and then shuts down again.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.processor.stop() {
            if let RuntimeError::CancellationTimeout { waited } = &e {
                warn!("Run still busy after {:?} at shutdown", waited);
            }
            return Err(e);
        }

        for factory in self.factories.drain(..) {
            factory.write().cleanup_and_exit();
        }
        self.manager.save_all()?;
        info!("Session closed");
        Ok(())
    }

    fn inputs_document(&self) -> Result<SharedDocument> {
        self.manager
            .single_in_scope(Scope::Inputs)?
            .ok_or_else(|| RuntimeError::NotFound("inputs configuration".to_string()))
    }

    fn insert(&mut self, factory: SharedFactory) -> Result<()> {
        let uuid = factory.read().uuid().to_string();
        if self.position(&uuid).is_some() {
            return Err(RuntimeError::DuplicateIdentity(uuid));
        }
        self.factories.push(factory);
        Ok(())
    }

    fn refresh(&mut self, uuid: &str, factory: SharedFactory) -> Result<()> {
        let index = self.require(uuid)?;
        info!("Plugin {} already in the chain, refreshing it", uuid);
        let previous = std::mem::replace(&mut self.factories[index], factory);
        previous.write().cleanup_and_exit();
        Ok(())
    }

    fn position(&self, uuid: &str) -> Option<usize> {
        self.factories
            .iter()
            .position(|factory| factory.read().uuid() == uuid)
    }

    fn require(&self, uuid: &str) -> Result<usize> {
        self.position(uuid)
            .ok_or_else(|| RuntimeError::NotFound(format!("plugin {}", uuid)))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.processor.is_running() {
            return Err(RuntimeError::AlreadyRunning);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::RunContext;
    use crate::pipeline::observer::NullObserver;
    use crate::pipeline::worker::RunOutcome;
    use crate::plugin::builtin::StageTraceFactory;
    use crate::plugin::factory::FactoryCore;
    use crate::plugin::instance::PluginInstance;
    use crate::store::document::ConfigDocument;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tempfile::{TempDir, tempdir};

    fn config_in(dir: &TempDir) -> RuntimeConfig {
        let mut config = RuntimeConfig::default_config();
        config.master.path = dir.path().join("master.json");
        config.executor.stop_timeout_ms = 2000;
        config
    }

    fn open(dir: &TempDir) -> Session {
        Session::open(config_in(dir), Arc::new(NullObserver)).unwrap()
    }

    fn log_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "# header\nFMT, 1, 2\nGPS, 3\n\nATT, 4, 5, 6\n").unwrap();
        path
    }

    fn uuids(session: &Session) -> Vec<String> {
        session
            .factories()
            .iter()
            .map(|factory| factory.read().uuid().to_string())
            .collect()
    }

    #[test]
    fn test_open_creates_master() {
        let dir = tempdir().unwrap();
        let session = open(&dir);
        assert!(dir.path().join("master.json").exists());
        assert!(session.manager().is_empty());
        assert!(!session.debug());
        assert_eq!(session.state(), ProcessorState::Stopped);
    }

    #[test]
    fn test_debug_read_from_mounted_configuration() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.json");
        let doc = ConfigDocument::open(&extra, false, false).unwrap();
        doc.set(DEBUG_KEY, true).unwrap();
        doc.save().unwrap();

        let mut config = config_in(&dir);
        config.master.extra_slots = vec![extra];
        let session = Session::open(config, Arc::new(NullObserver)).unwrap();
        assert!(session.debug());
        assert!(session.factory_context().debug);
    }

    #[test]
    fn test_chain_management() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        let first = session.add_plugin("stage_trace").unwrap().read().uuid().to_string();
        let second = session.add_plugin("dummy_load").unwrap().read().uuid().to_string();
        assert_eq!(uuids(&session), vec![first.clone(), second.clone()]);

        assert!(!session.move_up(&first).unwrap());
        assert!(session.move_up(&second).unwrap());
        assert_eq!(uuids(&session), vec![second.clone(), first.clone()]);
        assert!(session.move_down(&second).unwrap());
        assert!(!session.move_down(&second).unwrap());

        session.set_active(&first, false).unwrap();
        assert!(!session.factory(&first).unwrap().read().is_active());

        session.remove_plugin(&first).unwrap();
        assert_eq!(uuids(&session), vec![second]);
        assert!(matches!(
            session.remove_plugin(&first),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_plugin_type() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        assert!(matches!(
            session.add_plugin("no_such_plugin"),
            Err(RuntimeError::NotFound(_))
        ));
        assert!(session.factories().is_empty());
    }

    #[test]
    fn test_add_files_validates_and_dedups() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        let a = log_file(&dir, "a.log");
        let b = log_file(&dir, "b.log");

        assert_eq!(session.add_files([&a, &b, &a]).unwrap(), 2);
        assert_eq!(session.add_files([&b]).unwrap(), 0);
        assert!(session
            .add_files([a.clone(), dir.path().join("missing.log")])
            .is_err());
        assert_eq!(session.files().len(), 2);
        assert!(session.files()[0].ends_with("a.log"));

        assert!(session.remove_file(&a));
        assert!(!session.remove_file(&a));
        assert_eq!(session.files().len(), 1);
    }

    #[test]
    fn test_inputs_roundtrip() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        assert!(matches!(session.save_inputs(), Err(RuntimeError::NotFound(_))));

        let inputs_path = dir.path().join("inputs.json");
        let inputs = ConfigDocument::open(&inputs_path, false, false).unwrap();
        inputs.set_scope(Scope::Inputs).unwrap();
        inputs.save().unwrap();
        session
            .manager_mut()
            .load_slot(&inputs_path, false, true)
            .unwrap();

        let a = log_file(&dir, "a.log");
        let b = log_file(&dir, "b.log");
        session.add_files([&a, &b]).unwrap();
        session.save_inputs().unwrap();

        session.clear_files();
        fs::remove_file(&b).unwrap();
        assert_eq!(session.load_inputs().unwrap(), 1);
        assert!(session.files()[0].ends_with("a.log"));
    }

    #[test]
    fn test_load_plugins_refreshes_in_place() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        let trace = session.add_plugin("stage_trace").unwrap();
        session.add_plugin("dummy_load").unwrap();
        let path = dir.path().join("chain.tbz");
        session.save_plugins(&path).unwrap();

        let order = uuids(&session);
        assert_eq!(session.load_plugins(&path).unwrap(), 2);
        assert_eq!(uuids(&session), order);
        assert!(!Arc::ptr_eq(&trace, &session.factories()[0]));

        let mut other = open(&dir);
        other.add_plugin("stage_trace").unwrap();
        other.load_plugins(&path).unwrap();
        assert_eq!(other.factories().len(), 3);
        assert_eq!(uuids(&other)[1..].to_vec(), order);
    }

    #[test]
    fn test_go_runs_active_chain() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        session
            .add_files([log_file(&dir, "a.log"), log_file(&dir, "b.log")])
            .unwrap();
        let trace = session.add_plugin("stage_trace").unwrap();
        let uuid = trace.read().uuid().to_string();

        assert_eq!(session.go().unwrap(), RunStart::Started);
        let report = session.wait(Duration::from_secs(10)).unwrap();
        assert!(report.is_completed());
        assert_eq!(report.files_completed, 2);
        assert_eq!(report.work_done, report.work_total);

        let data = session.last_data().unwrap();
        assert_eq!(
            data.get(&StageTraceFactory::records_key(&uuid)),
            Some(Value::from(3u64))
        );
        session.shutdown().unwrap();
        assert!(session.factories().is_empty());
    }

    #[test]
    fn test_go_with_inactive_chain_is_noop() {
        let dir = tempdir().unwrap();
        let mut session = open(&dir);
        session.add_files([log_file(&dir, "a.log")]).unwrap();
        let uuid = session.add_plugin("stage_trace").unwrap().read().uuid().to_string();
        session.set_active(&uuid, false).unwrap();

        assert_eq!(session.go().unwrap(), RunStart::NothingToDo);
        assert_eq!(session.state(), ProcessorState::Stopped);
        assert_eq!(session.stop().unwrap(), StopOutcome::AlreadyStopped);
    }

    /// Blocks in its filename hook until released, never checking for cancellation.
    struct Blocking {
        core: FactoryCore,
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
    }

    struct BlockingInstance {
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
    }

    impl PluginInstance for BlockingInstance {
        fn on_filename(&mut self, _ctx: &RunContext, _path: &Path) -> anyhow::Result<()> {
            self.entered.store(true, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(10);
            while !self.release.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    impl PluginFactory for Blocking {
        fn core(&self) -> &FactoryCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut FactoryCore {
            &mut self.core
        }

        fn give_instance(&self, _ctx: &RunContext) -> anyhow::Result<Box<dyn PluginInstance>> {
            Ok(Box::new(BlockingInstance {
                entered: Arc::clone(&self.entered),
                release: Arc::clone(&self.release),
            }))
        }
    }

    #[test]
    fn test_shutdown_leaves_stalled_run_to_the_caller() {
        let dir = tempdir().unwrap();
        let mut config = config_in(&dir);
        config.executor.stop_timeout_ms = 50;
        let mut session = Session::open(config, Arc::new(NullObserver)).unwrap();
        session
            .add_files([log_file(&dir, "a.log"), log_file(&dir, "b.log")])
            .unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        session
            .add_factory(Box::new(Blocking {
                core: FactoryCore::new("blocking", "Blocking", FactoryContext::detached()),
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }))
            .unwrap();

        assert_eq!(session.go().unwrap(), RunStart::Started);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(entered.load(Ordering::SeqCst));

        assert!(matches!(
            session.shutdown(),
            Err(RuntimeError::CancellationTimeout { .. })
        ));
        assert_eq!(session.state(), ProcessorState::Running);
        assert_eq!(session.factories().len(), 1);

        release.store(true, Ordering::SeqCst);
        let report = session.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);
        session.shutdown().unwrap();
        assert!(session.factories().is_empty());
    }
}
