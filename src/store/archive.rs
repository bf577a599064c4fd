// file: src/store/archive.rs
// description: single-entry zip wrapping for json documents
// reference: https://docs.rs/zip

use crate::error::{Result, RuntimeError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Whether the file at `path` is a zip archive, judged by its local header magic.
pub fn is_zip_file(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|e| RuntimeError::file_operation(path, e))?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let read = file
            .read(&mut magic[filled..])
            .map_err(|e| RuntimeError::file_operation(path, e))?;
        if read == 0 {
            return Ok(false);
        }
        filled += read;
    }
    Ok(magic == ZIP_MAGIC)
}

pub fn write_entry(path: &Path, entry: &str, contents: &[u8]) -> Result<()> {
    let file = File::create(path).map_err(|e| RuntimeError::file_operation(path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(entry, options)?;
    writer
        .write_all(contents)
        .map_err(|e| RuntimeError::file_operation(path, e))?;
    writer.finish()?;
    Ok(())
}

pub fn read_entry(path: &Path, entry: &str) -> Result<String> {
    let file = File::open(path).map_err(|e| RuntimeError::file_operation(path, e))?;
    let mut archive = ZipArchive::new(file)?;
    let mut zipped = archive.by_name(entry).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => RuntimeError::NotFound(format!(
            "archive entry {} in {}",
            entry,
            path.display()
        )),
        other => RuntimeError::Archive(other),
    })?;
    let mut contents = String::new();
    zipped
        .read_to_string(&mut contents)
        .map_err(|e| RuntimeError::file_operation(path, e))?;
    Ok(contents)
}

/// Reads `path` either as a bare text file or as the named entry of a zip archive.
pub fn read_document(path: &Path, zipped: bool, entry: &str) -> Result<String> {
    if zipped {
        read_entry(path, entry)
    } else {
        fs::read_to_string(path).map_err(|e| RuntimeError::file_operation(path, e))
    }
}

pub fn write_document(path: &Path, zipped: bool, entry: &str, contents: &str) -> Result<()> {
    if zipped {
        write_entry(path, entry, contents.as_bytes())
    } else {
        fs::write(path, contents).map_err(|e| RuntimeError::file_operation(path, e))
    }
}
