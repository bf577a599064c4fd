// file: src/plugin/persist.rs
// description: saving and loading the factory chain as plain or zipped savestate files
// reference: https://docs.rs/zip

use crate::error::{Result, RuntimeError};
use crate::plugin::factory::{FactoryContext, PluginFactory, SharedFactory};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::savestate::Savestate;
use crate::store::archive;
use crate::store::scope::{SCOPE_KEY, Scope};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Sole entry of a zipped savestate file.
pub const ARCHIVE_ENTRY: &str = "data.tbp";
pub const PLAIN_EXTENSION: &str = "tbp";
pub const ZIPPED_EXTENSION: &str = "tbz";

/// Key holding the savestate list in the configuration-document form.
pub const FACTORIES_KEY: &str = "factories";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavestateFormat {
    Plain,
    Zipped,
}

impl SavestateFormat {
    /// `.tbz` files are zipped, anything else is plain.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(ZIPPED_EXTENSION) => SavestateFormat::Zipped,
            _ => SavestateFormat::Plain,
        }
    }

    pub fn is_zipped(self) -> bool {
        self == SavestateFormat::Zipped
    }
}

pub fn savestates(factories: &[SharedFactory]) -> Vec<Savestate> {
    factories
        .iter()
        .map(|factory| factory.read().export_savestate())
        .collect()
}

pub fn write_all(path: &Path, factories: &[SharedFactory], format: SavestateFormat) -> Result<()> {
    let states = savestates(factories);
    let contents = serde_json::to_string_pretty(&states)?;
    archive::write_document(path, format.is_zipped(), ARCHIVE_ENTRY, &contents)?;
    info!(
        "Saved {} plugin savestates to {}",
        states.len(),
        path.display()
    );
    Ok(())
}

/// Raw savestate entries of `path`, in file order.
pub fn read_entries(path: &Path, format: SavestateFormat) -> Result<Vec<Value>> {
    if !path.exists() {
        return Err(RuntimeError::NotFound(format!(
            "savestate file {}",
            path.display()
        )));
    }
    let raw = archive::read_document(path, format.is_zipped(), ARCHIVE_ENTRY)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Array(entries) => Ok(entries),
        Value::Object(document) => {
            let scope = document
                .get(SCOPE_KEY)
                .map(Scope::from_value)
                .transpose()?
                .unwrap_or(Scope::Global);
            if scope != Scope::Plugin {
                return Err(RuntimeError::InvariantViolation(format!(
                    "savestate document {} has {} scope",
                    path.display(),
                    scope
                )));
            }
            match document.get(FACTORIES_KEY) {
                Some(Value::Array(entries)) => Ok(entries.clone()),
                _ => Err(RuntimeError::Validation(format!(
                    "savestate document {} has no {} list",
                    path.display(),
                    FACTORIES_KEY
                ))),
            }
        }
        other => Err(RuntimeError::Validation(format!(
            "savestate file {} holds neither a list nor a document: {}",
            path.display(),
            other
        ))),
    }
}

/// Rebuilds the factories saved in `path` against a fresh discovery.
///
/// Entries whose type cannot be resolved, constructed or applied are skipped.
pub fn read_all(
    path: &Path,
    registry: &PluginRegistry,
    context: &FactoryContext,
    format: SavestateFormat,
) -> Result<Vec<Box<dyn PluginFactory>>> {
    let entries = read_entries(path, format)?;
    let catalogue = registry.discover();
    let mut factories = Vec::with_capacity(entries.len());

    for entry in entries {
        let state: Savestate = match serde_json::from_value(entry) {
            Ok(state) => state,
            Err(e) => {
                warn!("Skipping malformed savestate in {}: {}", path.display(), e);
                continue;
            }
        };
        if context.debug {
            debug!("Loading {}", state.type_name);
        }

        let Some(registration) = catalogue.resolve(&state.type_name) else {
            warn!(
                "Could not find plugin {} ({}), skipping it",
                state.display_name, state.type_name
            );
            continue;
        };

        let mut factory = match registration.instantiate(context.clone()) {
            Ok(factory) => factory,
            Err(e) => {
                warn!(
                    "Could not construct plugin {} ({}), skipping it: {}",
                    state.display_name, state.type_name, e
                );
                continue;
            }
        };
        match factory.import_savestate(&state, context.clone()) {
            Ok(()) => factories.push(factory),
            Err(e) if e.is_invariant_violation() => return Err(e),
            Err(e) => warn!(
                "Could not restore plugin {} ({}): {}",
                state.display_name, state.uuid, e
            ),
        }
    }

    info!(
        "Loaded {} plugin savestates from {}",
        factories.len(),
        path.display()
    );
    Ok(factories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::Stage;
    use crate::plugin::builtin::{DummyLoadFactory, StageLoad, StageTraceFactory};
    use crate::plugin::factory::{FactoryType, share};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn chain() -> Vec<SharedFactory> {
        let mut dummy = DummyLoadFactory::create(FactoryContext::detached());
        dummy.set_load(Stage::Messages, StageLoad::new(4, 0.25));
        let mut trace = StageTraceFactory::create(FactoryContext::detached());
        trace.set_work(9);
        vec![share(Box::new(dummy)), share(Box::new(trace))]
    }

    fn roundtrip(file_name: &str) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(file_name);
        let originals = chain();
        let format = SavestateFormat::from_path(&path);

        write_all(&path, &originals, format).unwrap();
        let restored = read_all(
            &path,
            &PluginRegistry::with_builtins(),
            &FactoryContext::detached(),
            format,
        )
        .unwrap();

        let expected = savestates(&originals);
        let actual: Vec<Savestate> = restored.iter().map(|f| f.export_savestate()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_plain_roundtrip() {
        roundtrip("chain.tbp");
    }

    #[test]
    fn test_zipped_roundtrip() {
        roundtrip("chain.tbz");
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(SavestateFormat::from_path(Path::new("a.tbz")), SavestateFormat::Zipped);
        assert_eq!(SavestateFormat::from_path(Path::new("a.TBZ")), SavestateFormat::Zipped);
        assert_eq!(SavestateFormat::from_path(Path::new("a.tbp")), SavestateFormat::Plain);
        assert_eq!(SavestateFormat::from_path(Path::new("a")), SavestateFormat::Plain);
    }

    #[test]
    fn test_zipped_file_is_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.tbz");
        write_all(&path, &chain(), SavestateFormat::Zipped).unwrap();
        assert!(archive::is_zip_file(&path).unwrap());
        assert_eq!(read_entries(&path, SavestateFormat::Zipped).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.tbp");
        fs::write(
            &path,
            json!([
                {"plugin_name": "Gone", "plugin_cls": "gone", "uuid": "u-1"},
                {"plugin_name": "Stage trace", "plugin_cls": "stage_trace", "uuid": "u-2", "work": 2},
                {"no": "type"}
            ])
            .to_string(),
        )
        .unwrap();

        let restored = read_all(
            &path,
            &PluginRegistry::with_builtins(),
            &FactoryContext::detached(),
            SavestateFormat::Plain,
        )
        .unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].uuid(), "u-2");
        assert_eq!(restored[0].work_per_file(), 2);
    }

    #[test]
    fn test_wrapped_document_form() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(
            &path,
            json!({
                "__uuid": "doc",
                "__scope": 2,
                "factories": [
                    {"plugin_name": "Stage trace", "plugin_cls": "stage_trace", "uuid": "u-3", "work": 4}
                ]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(read_entries(&path, SavestateFormat::Plain).unwrap().len(), 1);

        fs::write(
            &path,
            json!({"__uuid": "doc", "__scope": 1, "factories": []}).to_string(),
        )
        .unwrap();
        assert!(read_entries(&path, SavestateFormat::Plain)
            .unwrap_err()
            .is_invariant_violation());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_entries(&dir.path().join("none.tbp"), SavestateFormat::Plain).unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[test]
    fn test_unconstructible_type_is_skipped() {
        let dir = tempdir().unwrap();
        let manifests = dir.path().join("plugins");
        fs::create_dir_all(&manifests).unwrap();
        fs::write(
            manifests.join("bad_load.json"),
            json!({
                "type_name": "bad_load",
                "base": "dummy_load",
                "display_name": "Bad load",
                "defaults": {"load": "oops"}
            })
            .to_string(),
        )
        .unwrap();
        let path = dir.path().join("chain.tbp");
        fs::write(
            &path,
            json!([
                {"plugin_name": "Bad load", "plugin_cls": "bad_load", "uuid": "u-1"},
                {"plugin_name": "Stage trace", "plugin_cls": "stage_trace", "uuid": "u-2", "work": 2}
            ])
            .to_string(),
        )
        .unwrap();

        let registry = PluginRegistry::with_builtins().with_directory(Some(manifests));
        assert!(registry.discover().contains("bad_load"));
        let restored = read_all(
            &path,
            &registry,
            &FactoryContext::detached(),
            SavestateFormat::Plain,
        )
        .unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].uuid(), "u-2");
    }
}
