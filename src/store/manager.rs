// file: src/store/manager.rs
// description: aggregate of configuration documents mounted as slots behind a master document
// reference: union lookup across slots with single-instance scope enforcement

use crate::error::{Result, RuntimeError};
use crate::store::document::ConfigDocument;
use crate::store::scope::Scope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key of the master document holding the slot list.
pub const SLOTS_KEY: &str = "slots";

pub type SharedDocument = Arc<ConfigDocument>;

/// One entry of the master document's slot list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub uuid: String,
    pub filename: PathBuf,
    pub readonly: bool,
}

pub struct ConfigManager {
    master: ConfigDocument,
    slots: Vec<SharedDocument>,
}

impl ConfigManager {
    /// Opens the master document and mounts every slot it lists.
    pub fn open(master_path: impl AsRef<Path>) -> Result<Self> {
        let master = ConfigDocument::open(master_path.as_ref(), false, false)?;
        let mut manager = Self {
            master,
            slots: Vec::new(),
        };

        let records = manager.slot_records()?;
        info!(
            "Mounting {} configuration slots from {}",
            records.len(),
            master_path.as_ref().display()
        );
        for record in records {
            match manager.load_slot(&record.filename, record.readonly, false) {
                Ok(_) => {}
                Err(e) if e.is_invariant_violation() => return Err(e),
                Err(e) => warn!(
                    "Failed to mount configuration slot {}: {}",
                    record.filename.display(),
                    e
                ),
            }
        }

        Ok(manager)
    }

    /// Like [`open`](Self::open), additionally mounting `extras` for this process only.
    pub fn open_with_extras(master_path: impl AsRef<Path>, extras: &[PathBuf]) -> Result<Self> {
        let mut manager = Self::open(master_path)?;
        for extra in extras {
            manager.load_slot(extra, false, false)?;
        }
        Ok(manager)
    }

    pub fn master(&self) -> &ConfigDocument {
        &self.master
    }

    pub fn slots(&self) -> &[SharedDocument] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_records(&self) -> Result<Vec<SlotRecord>> {
        match self.master.get(SLOTS_KEY) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Mounts the document at `path`. A document already mounted, matched by
    /// uuid or by backing file, is reloaded in place instead of being added
    /// twice.
    pub fn load_slot(
        &mut self,
        path: impl AsRef<Path>,
        readonly: bool,
        permanent: bool,
    ) -> Result<SharedDocument> {
        let path = path.as_ref();
        let doc = ConfigDocument::open(path, readonly, false)?;

        let mounted = self.find(&doc.uuid()).or_else(|| self.find_file(path));
        let slot = if let Some(existing) = mounted {
            info!(
                "Configuration {} already mounted, reloading it",
                path.display()
            );
            self.refresh(&existing, path)?;
            existing
        } else {
            let scope = doc.scope();
            if scope.is_exclusive() && !self.configs_in_scope(scope).is_empty() {
                error!(
                    "Refusing to mount {}: a {} scoped configuration is already mounted",
                    path.display(),
                    scope
                );
                return Err(exclusive_violation(scope));
            }
            let doc = Arc::new(doc);
            self.slots.push(Arc::clone(&doc));
            debug!("Mounted configuration slot {} ({})", path.display(), doc.uuid());
            doc
        };
        let uuid = slot.uuid();

        if permanent {
            let mut records = self.slot_records()?;
            if !records.iter().any(|record| record.uuid == uuid) {
                records.push(SlotRecord {
                    uuid,
                    filename: path.to_path_buf(),
                    readonly,
                });
                self.write_records(&records)?;
            }
        }

        Ok(slot)
    }

    /// Unmounts `doc`. Missing documents are reported, not treated as errors.
    pub fn remove_slot(&mut self, doc: &ConfigDocument, permanent: bool) -> Result<()> {
        let uuid = doc.uuid();
        let Some(index) = self.slots.iter().position(|slot| slot.uuid() == uuid) else {
            warn!("Configuration {} is not mounted, nothing to remove", uuid);
            return Ok(());
        };
        self.slots.remove(index);

        if permanent {
            let mut records = self.slot_records()?;
            let before = records.len();
            records.retain(|record| record.uuid != uuid);
            if records.len() != before {
                self.write_records(&records)?;
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.iter().any(|slot| slot.contains(key))
    }

    /// First hit across slots in mount order.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.slots.iter().find_map(|slot| slot.get(key))
    }

    /// Updates `key` in every slot that already holds it. Never creates a key.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let holders = self.holders(key)?;
        let value = value.into();
        for slot in holders {
            slot.set(key, value.clone())?;
        }
        Ok(())
    }

    /// Removes `key` from every slot that holds it.
    pub fn delete(&self, key: &str) -> Result<()> {
        for slot in self.holders(key)? {
            slot.delete(key)?;
        }
        Ok(())
    }

    pub fn configs_in_scope(&self, scope: Scope) -> Vec<SharedDocument> {
        self.slots
            .iter()
            .filter(|slot| slot.scope() == scope)
            .cloned()
            .collect()
    }

    /// The mounted document of an exclusive scope, if any.
    pub fn single_in_scope(&self, scope: Scope) -> Result<Option<SharedDocument>> {
        let mut found = self.configs_in_scope(scope);
        if found.len() > 1 {
            error!(
                "{} configurations carry the {} scope",
                found.len(),
                scope
            );
            return Err(RuntimeError::InvariantViolation(format!(
                "more than one {} scoped configuration",
                scope
            )));
        }
        Ok(found.pop())
    }

    /// Saves every writable slot.
    pub fn save_all(&self) -> Result<()> {
        for slot in self.slots.iter().filter(|slot| !slot.is_readonly()) {
            if slot.path().is_some() {
                slot.save()?;
            }
        }
        Ok(())
    }

    fn find(&self, uuid: &str) -> Option<SharedDocument> {
        self.slots.iter().find(|slot| slot.uuid() == uuid).cloned()
    }

    fn find_file(&self, path: &Path) -> Option<SharedDocument> {
        let wanted = fs::canonicalize(path).ok()?;
        self.slots
            .iter()
            .find(|slot| {
                slot.path()
                    .and_then(|p| fs::canonicalize(p).ok())
                    .is_some_and(|p| p == wanted)
            })
            .cloned()
    }

    /// Reloads a mounted slot from disk. A reload that would leave two
    /// slots in an exclusive scope is undone and refused.
    fn refresh(&self, slot: &SharedDocument, path: &Path) -> Result<()> {
        let before = slot.data();
        slot.load()?;

        let scope = slot.scope();
        let clash = scope.is_exclusive()
            && self
                .slots
                .iter()
                .any(|other| !Arc::ptr_eq(other, slot) && other.scope() == scope);
        if clash {
            slot.restore(before);
            error!(
                "Refusing to reload {}: a {} scoped configuration is already mounted",
                path.display(),
                scope
            );
            return Err(exclusive_violation(scope));
        }
        Ok(())
    }

    fn holders(&self, key: &str) -> Result<Vec<SharedDocument>> {
        let holders: Vec<SharedDocument> = self
            .slots
            .iter()
            .filter(|slot| slot.contains(key))
            .cloned()
            .collect();
        if holders.is_empty() {
            return Err(RuntimeError::NotFound(format!(
                "key {} in any mounted configuration",
                key
            )));
        }
        if let Some(readonly) = holders.iter().find(|slot| slot.is_readonly()) {
            return Err(RuntimeError::ReadOnly {
                path: readonly
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| readonly.uuid()),
            });
        }
        Ok(holders)
    }

    fn write_records(&self, records: &[SlotRecord]) -> Result<()> {
        self.master.set(SLOTS_KEY, serde_json::to_value(records)?)?;
        self.master.save()
    }
}

fn exclusive_violation(scope: Scope) -> RuntimeError {
    RuntimeError::InvariantViolation(format!("more than one {} scoped configuration", scope))
}
