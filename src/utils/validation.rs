// file: src/utils/validation.rs
// description: checks applied to input log files and plugin directories
// reference: input validation patterns

use crate::error::{Result, RuntimeError};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Validator;

impl Validator {
    /// Canonical form of `path`, which must name an existing regular file.
    pub fn validate_file_path(path: &Path) -> Result<PathBuf> {
        let canonical = fs::canonicalize(path).map_err(|e| {
            RuntimeError::Validation(format!(
                "Cannot canonicalize path {}: {}",
                path.display(),
                e
            ))
        })?;

        if !canonical.is_file() {
            return Err(RuntimeError::Validation(format!(
                "Path is not a file: {}",
                canonical.display()
            )));
        }

        Ok(canonical)
    }

    pub fn validate_directory(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(RuntimeError::Validation(format!(
                "Directory does not exist: {}",
                path.display()
            )));
        }

        if !path.is_dir() {
            return Err(RuntimeError::Validation(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn validate_within_base_dir(path: &Path, base_dir: &Path) -> Result<()> {
        let canonical_path = fs::canonicalize(path).map_err(|e| {
            RuntimeError::Validation(format!(
                "Cannot canonicalize path {}: {}",
                path.display(),
                e
            ))
        })?;

        let canonical_base = fs::canonicalize(base_dir).map_err(|e| {
            RuntimeError::Validation(format!(
                "Cannot canonicalize base dir {}: {}",
                base_dir.display(),
                e
            ))
        })?;

        if !canonical_path.starts_with(&canonical_base) {
            return Err(RuntimeError::Validation(format!(
                "Path escapes its base ({} outside {})",
                canonical_path.display(),
                canonical_base.display()
            )));
        }

        Ok(())
    }
}
