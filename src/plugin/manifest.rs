// file: src/plugin/manifest.rs
// description: json plugin manifests declaring new plugin types on top of registered ones
// reference: https://docs.rs/walkdir

use crate::error::{Result, RuntimeError};
use crate::plugin::factory::{FactoryContext, PluginFactory};
use crate::plugin::registry::{Constructor, Registration};
use crate::utils::validation::Validator;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// File names never treated as manifests.
pub const DENY_LIST: [&str; 3] = ["index.json", "base.json", "persist.json"];

const PRIVATE_PREFIX: char = '_';
const MANIFEST_EXTENSION: &str = "json";

/// A plugin type built from the registered `base` type with `defaults`
/// applied as its initial payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginManifest {
    pub type_name: String,
    pub base: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| RuntimeError::file_operation(path, e))?;
        let manifest: PluginManifest = serde_json::from_str(&raw)?;
        if manifest.type_name.trim().is_empty() {
            return Err(RuntimeError::Validation(format!(
                "Manifest {} has an empty type_name",
                path.display()
            )));
        }
        Ok(manifest)
    }

    /// Registration for this manifest's type, constructed through `base`.
    pub fn derive(&self, base: &Registration, group: &str) -> Registration {
        let base_constructor = Arc::clone(&base.constructor);
        let type_name = self.type_name.clone();
        let display_name = self.display_name.clone();
        let defaults = self.defaults.clone();

        let constructor: Constructor = Arc::new(
            move |context: FactoryContext| -> Result<Box<dyn PluginFactory>> {
                let mut factory = base_constructor(context)?;
                factory.import_payload(&defaults)?;
                let core = factory.core_mut();
                core.type_name = type_name.clone();
                core.display_name = display_name.clone();
                Ok(factory)
            },
        );

        Registration {
            type_name: self.type_name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            group: group.to_string(),
            instance_type: base.instance_type.clone(),
            constructor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub manifest: PluginManifest,
    pub group: String,
    pub path: PathBuf,
}

/// Whether `name` may hold a manifest.
pub fn is_candidate(name: &str) -> bool {
    !name.starts_with(PRIVATE_PREFIX)
        && !DENY_LIST.contains(&name)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == MANIFEST_EXTENSION)
}

fn is_private(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(PRIVATE_PREFIX))
}

fn group_of(root: &Path, path: &Path) -> String {
    path.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|relative| {
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Reads every manifest below `root`. Unreadable manifests are reported and skipped.
pub fn scan(root: &Path) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_private(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable plugin directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_candidate(name) {
            debug!("Ignoring {}", entry.path().display());
            continue;
        }
        if let Err(e) = Validator::validate_within_base_dir(entry.path(), root) {
            warn!("Skipping linked manifest: {}", e);
            continue;
        }

        match PluginManifest::load(entry.path()) {
            Ok(manifest) => entries.push(ManifestEntry {
                group: group_of(root, entry.path()),
                path: entry.path().to_path_buf(),
                manifest,
            }),
            Err(e) => warn!(
                "Failed to load plugin manifest {}: {}",
                entry.path().display(),
                e
            ),
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    const MANIFEST: &str = r#"{"type_name": "slow_load", "base": "dummy_load", "display_name": "Slow load"}"#;

    #[test]
    fn test_candidate_names() {
        assert!(is_candidate("slow.json"));
        assert!(!is_candidate("_hidden.json"));
        assert!(!is_candidate("index.json"));
        assert!(!is_candidate("persist.json"));
        assert!(!is_candidate("notes.txt"));
    }

    #[test]
    fn test_scan_groups_and_skips() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "top.json", MANIFEST);
        write(root, "developer/slow.json", MANIFEST);
        write(root, "developer/base.json", MANIFEST);
        write(root, "_private/hidden.json", MANIFEST);
        write(root, "developer/_draft.json", MANIFEST);
        write(root, "developer/broken.json", "{ not json");

        let entries = scan(root);
        let found: Vec<(String, String)> = entries
            .iter()
            .map(|e| {
                (
                    e.group.clone(),
                    e.path.file_name().unwrap().to_string_lossy().to_string(),
                )
            })
            .collect();

        assert_eq!(
            found,
            vec![
                ("developer".to_string(), "slow.json".to_string()),
                (String::new(), "top.json".to_string()),
            ]
        );
    }

    #[test]
    fn test_manifest_defaults_optional() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", MANIFEST);
        let manifest = PluginManifest::load(&temp.path().join("a.json")).unwrap();
        assert_eq!(manifest.base, "dummy_load");
        assert!(manifest.defaults.is_empty());
        assert!(manifest.description.is_empty());
    }

    #[test]
    fn test_empty_type_name_rejected() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "a.json",
            r#"{"type_name": " ", "base": "dummy_load", "display_name": "x"}"#,
        );
        assert!(PluginManifest::load(&temp.path().join("a.json")).is_err());
    }
}
