// file: src/store/document.rs
// description: mutex-guarded json configuration document with durable identity
// reference: https://docs.rs/parking_lot

use crate::error::{Result, RuntimeError};
use crate::store::archive;
use crate::store::scope::{SCOPE_KEY, Scope, UUID_KEY, is_reserved_key};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the sole archive entry of a zip-wrapped document.
pub const ZIP_ENTRY_NAME: &str = "data.json";

#[derive(Debug)]
struct DocumentState {
    data: Map<String, Value>,
    path: Option<PathBuf>,
    zipped: bool,
}

/// A key/value document backed by a JSON file, optionally zip-wrapped.
///
/// Every access goes through one document-wide lock. The lock is held for
/// the copy in or out of the body and, for [`save`](Self::save) and
/// [`load`](Self::load), for the file transfer itself.
#[derive(Debug)]
pub struct ConfigDocument {
    readonly: bool,
    state: Mutex<DocumentState>,
}

impl ConfigDocument {
    /// Opens the document at `path`, creating a blank one on disk if absent.
    ///
    /// When the file exists its actual format wins over `zipped`.
    pub fn open(path: impl AsRef<Path>, readonly: bool, zipped: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            warn!(
                "No configuration file found at {}. Creating one",
                path.display()
            );
            let data = blank_body(Scope::Global);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).map_err(|e| RuntimeError::file_operation(parent, e))?;
            }
            write_body(&path, zipped, &data)?;
            return Ok(Self {
                readonly,
                state: Mutex::new(DocumentState {
                    data,
                    path: Some(path),
                    zipped,
                }),
            });
        }

        let zipped = detect_format(&path, zipped)?;
        let (data, assigned) = read_body(&path, zipped)?;
        if assigned && !readonly {
            write_body(&path, zipped, &data)?;
        }

        Ok(Self {
            readonly,
            state: Mutex::new(DocumentState {
                data,
                path: Some(path),
                zipped,
            }),
        })
    }

    /// An in-memory document with no backing file.
    pub fn detached(scope: Scope) -> Self {
        Self {
            readonly: false,
            state: Mutex::new(DocumentState {
                data: blank_body(scope),
                path: None,
                zipped: false,
            }),
        }
    }

    pub fn uuid(&self) -> String {
        let state = self.state.lock();
        state
            .data
            .get(UUID_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn scope(&self) -> Scope {
        let state = self.state.lock();
        state
            .data
            .get(SCOPE_KEY)
            .and_then(|v| Scope::from_value(v).ok())
            .unwrap_or(Scope::Global)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_zipped(&self) -> bool {
        self.state.lock().zipped
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().data.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().data.keys().cloned().collect()
    }

    /// Copy of the whole body, reserved keys included.
    pub fn data(&self) -> Map<String, Value> {
        self.state.lock().data.clone()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_writable()?;
        if is_reserved_key(key) {
            return Err(RuntimeError::ReservedKey(key.to_string()));
        }
        let value = value.into();
        self.state.lock().data.insert(key.to_string(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<Value> {
        self.ensure_writable()?;
        if is_reserved_key(key) {
            return Err(RuntimeError::ReservedKey(key.to_string()));
        }
        self.state
            .lock()
            .data
            .shift_remove(key)
            .ok_or_else(|| RuntimeError::NotFound(format!("key {}", key)))
    }

    pub fn set_scope(&self, scope: Scope) -> Result<()> {
        self.ensure_writable()?;
        self.state
            .lock()
            .data
            .insert(SCOPE_KEY.to_string(), scope.to_value());
        Ok(())
    }

    /// Replaces the body wholesale. The current uuid always survives, and the
    /// current scope survives unless `new_data` carries a valid one.
    pub fn override_data(&self, mut new_data: Map<String, Value>) -> Result<()> {
        self.ensure_writable()?;
        if let Some(scope) = new_data.get(SCOPE_KEY) {
            Scope::from_value(scope)?;
        }

        let mut state = self.state.lock();
        if let Some(uuid) = state.data.get(UUID_KEY).cloned() {
            new_data.insert(UUID_KEY.to_string(), uuid);
        }
        if !new_data.contains_key(SCOPE_KEY) {
            let scope = state
                .data
                .get(SCOPE_KEY)
                .cloned()
                .unwrap_or_else(|| Scope::Global.to_value());
            new_data.insert(SCOPE_KEY.to_string(), scope);
        }
        state.data = new_data;
        Ok(())
    }

    /// Explicitly reassigns the document identity.
    pub fn override_uuid(&self, uuid: &str) -> Result<()> {
        self.ensure_writable()?;
        self.state
            .lock()
            .data
            .insert(UUID_KEY.to_string(), Value::from(uuid));
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.ensure_writable()?;
        let state = self.state.lock();
        let path = state
            .path
            .as_ref()
            .ok_or_else(|| RuntimeError::NotFound("backing file for document".to_string()))?;
        write_body(path, state.zipped, &state.data)?;
        debug!("Saved configuration document {}", path.display());
        Ok(())
    }

    /// Re-reads the body from the backing file, discarding unsaved changes.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.lock();
        let path = state
            .path
            .clone()
            .ok_or_else(|| RuntimeError::NotFound("backing file for document".to_string()))?;
        if !path.exists() {
            return Err(RuntimeError::NotFound(format!(
                "configuration file {}",
                path.display()
            )));
        }
        let zipped = detect_format(&path, state.zipped)?;
        let (mut data, assigned) = read_body(&path, zipped)?;
        if assigned {
            if let Some(uuid) = state.data.get(UUID_KEY).cloned() {
                data.insert(UUID_KEY.to_string(), uuid);
            }
            if !self.readonly {
                write_body(&path, zipped, &data)?;
            }
        }
        state.data = data;
        state.zipped = zipped;
        debug!("Loaded configuration document {}", path.display());
        Ok(())
    }

    /// Puts back a body taken with [`ConfigDocument::data`], bypassing the
    /// readonly guard. Used to undo a refresh that was refused.
    pub(crate) fn restore(&self, data: Map<String, Value>) {
        self.state.lock().data = data;
    }

    /// Points the document at a new backing file and flushes to it.
    pub fn change_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_writable()?;
        self.state.lock().path = Some(path.as_ref().to_path_buf());
        self.save()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            let path = self
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.uuid());
            return Err(RuntimeError::ReadOnly { path });
        }
        Ok(())
    }
}

fn blank_body(scope: Scope) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(
        UUID_KEY.to_string(),
        Value::from(Uuid::new_v4().to_string()),
    );
    data.insert(SCOPE_KEY.to_string(), scope.to_value());
    data
}

fn detect_format(path: &Path, requested_zipped: bool) -> Result<bool> {
    let actual = archive::is_zip_file(path)?;
    if actual != requested_zipped {
        warn!(
            "Configuration file {} is {}, opening it as such",
            path.display(),
            if actual { "zip-wrapped" } else { "plain" }
        );
    }
    Ok(actual)
}

/// Parses a document body. The flag is set when the file carried no identity
/// and a fresh uuid had to be assigned.
fn read_body(path: &Path, zipped: bool) -> Result<(Map<String, Value>, bool)> {
    let raw = archive::read_document(path, zipped, ZIP_ENTRY_NAME)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Value::Object(mut data) = value else {
        return Err(RuntimeError::Validation(format!(
            "Configuration file {} does not hold a JSON object",
            path.display()
        )));
    };

    match data.get(SCOPE_KEY) {
        Some(scope) => {
            Scope::from_value(scope)?;
        }
        None => {
            data.insert(SCOPE_KEY.to_string(), Scope::Global.to_value());
        }
    }
    let assigned = !data.get(UUID_KEY).is_some_and(Value::is_string);
    if assigned {
        debug!("Assigning identity to {}", path.display());
        data.insert(
            UUID_KEY.to_string(),
            Value::from(Uuid::new_v4().to_string()),
        );
    }
    Ok((data, assigned))
}

fn write_body(path: &Path, zipped: bool, data: &Map<String, Value>) -> Result<()> {
    let contents = serde_json::to_string_pretty(data)?;
    archive::write_document(path, zipped, ZIP_ENTRY_NAME, &contents)
}
