// file: src/plugin/registry.rs
// description: explicit plugin registry mapping stable type names to factory constructors
// reference: registered types plus manifests found under the plugin directory

use crate::error::{Result, RuntimeError};
use crate::plugin::builtin::{DummyLoadFactory, StageTraceFactory};
use crate::plugin::factory::{FactoryContext, FactoryType, PluginFactory};
use crate::plugin::manifest;
use crate::utils::validation::Validator;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const BUILTIN_GROUP: &str = "developer";

pub type Constructor =
    Arc<dyn Fn(FactoryContext) -> Result<Box<dyn PluginFactory>> + Send + Sync>;

/// Everything known about one plugin type.
#[derive(Clone)]
pub struct Registration {
    pub type_name: String,
    pub display_name: String,
    pub description: String,
    pub author: String,
    pub group: String,
    pub instance_type: String,
    pub constructor: Constructor,
}

impl Registration {
    pub fn of<T: FactoryType>(group: &str) -> Self {
        Self {
            type_name: T::TYPE_NAME.to_string(),
            display_name: T::DISPLAY_NAME.to_string(),
            description: T::DESCRIPTION.to_string(),
            author: T::AUTHOR.to_string(),
            group: group.to_string(),
            instance_type: T::INSTANCE_TYPE.to_string(),
            constructor: Arc::new(
                |context: FactoryContext| -> Result<Box<dyn PluginFactory>> {
                    Ok(Box::new(T::create(context)))
                },
            ),
        }
    }

    pub fn instantiate(&self, context: FactoryContext) -> Result<Box<dyn PluginFactory>> {
        (self.constructor)(context)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type_name", &self.type_name)
            .field("display_name", &self.display_name)
            .field("group", &self.group)
            .field("instance_type", &self.instance_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    registrations: BTreeMap<String, Registration>,
    directory: Option<PathBuf>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the developer plugins shipped with the runtime.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register::<DummyLoadFactory>()
            .register::<StageTraceFactory>();
        registry
    }

    pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.directory = directory;
        self
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn register<T: FactoryType>(&mut self) -> &mut Self {
        self.register_with(Registration::of::<T>(BUILTIN_GROUP))
    }

    /// Adds `registration`, replacing any earlier one of the same type name.
    pub fn register_with(&mut self, registration: Registration) -> &mut Self {
        if let Some(previous) = self
            .registrations
            .insert(registration.type_name.clone(), registration)
        {
            warn!("Plugin type {} registered twice, keeping the latest", previous.type_name);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registered types plus every valid manifest under the plugin directory,
    /// read fresh on each call.
    pub fn discover(&self) -> Catalogue {
        let mut entries = self.registrations.clone();

        if let Some(directory) = &self.directory {
            match Validator::validate_directory(directory) {
                Ok(()) => {
                    for entry in manifest::scan(directory) {
                        let type_name = &entry.manifest.type_name;
                        if entries.contains_key(type_name) {
                            warn!(
                                "Manifest {} redefines plugin type {}, skipping it",
                                entry.path.display(),
                                type_name
                            );
                            continue;
                        }
                        let Some(base) = self.registrations.get(&entry.manifest.base) else {
                            warn!(
                                "Manifest {} names unknown base type {}, skipping it",
                                entry.path.display(),
                                entry.manifest.base
                            );
                            continue;
                        };
                        let registration = entry.manifest.derive(base, &entry.group);
                        entries.insert(type_name.clone(), registration);
                    }
                }
                Err(e) => warn!("{}, using registered plugins only", e),
            }
        }

        info!(
            "Discovered {} plugin types ({} registered)",
            entries.len(),
            self.registrations.len()
        );
        Catalogue { entries }
    }
}

/// Result of one discovery, ordered by type name.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: BTreeMap<String, Registration>,
}

impl Catalogue {
    pub fn factory_types(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn instance_types(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .map(|registration| registration.instance_type.clone())
            .collect()
    }

    pub fn resolve(&self, type_name: &str) -> Option<&Registration> {
        self.entries.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.values()
    }

    /// Registrations keyed by group, for display.
    pub fn grouped(&self) -> BTreeMap<String, Vec<&Registration>> {
        let mut groups: BTreeMap<String, Vec<&Registration>> = BTreeMap::new();
        for registration in self.entries.values() {
            groups
                .entry(registration.group.clone())
                .or_default()
                .push(registration);
        }
        groups
    }

    pub fn instantiate(
        &self,
        type_name: &str,
        context: FactoryContext,
    ) -> Result<Box<dyn PluginFactory>> {
        self.resolve(type_name)
            .ok_or_else(|| RuntimeError::NotFound(format!("plugin type {}", type_name)))?
            .instantiate(context)
    }
}
