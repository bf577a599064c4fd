// file: src/pipeline/parser.rs
// description: log parsing engine seam and the built-in comma-separated text log parser
// reference: parsed records are consumed as a rewindable stream, then flattened

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// One message of a parsed log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: String,
    pub fields: Vec<String>,
    pub line: usize,
}

impl LogRecord {
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// Parsed record stream handed to the parsed-log stage.
///
/// Plugins consume it with [`recv`](Self::recv); the executor rewinds it
/// before every hook so each plugin sees the whole stream.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    records: Vec<LogRecord>,
    cursor: usize,
}

impl ParsedLog {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records, cursor: 0 }
    }

    pub fn recv(&mut self) -> Option<&LogRecord> {
        let record = self.records.get(self.cursor)?;
        self.cursor += 1;
        Some(record)
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Flattened message list for the messages stage.
    pub fn into_messages(self) -> Vec<LogRecord> {
        self.records
    }
}

pub trait LogParser: Send + Sync {
    fn name(&self) -> &str;

    /// Progress units reported after parsing one file.
    fn work_per_file(&self) -> u64 {
        1
    }

    fn parse(&self, file: &mut File, path: &Path) -> Result<ParsedLog>;
}

/// Reads `TYPE, field, field, ...` lines. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone, Default)]
pub struct TextLogParser;

impl TextLogParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_line(line: &str, number: usize, path: &Path) -> Result<Option<LogRecord>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let mut parts = trimmed.split(',').map(str::trim);
        let kind = parts.next().unwrap_or_default();
        if kind.is_empty() {
            return Err(RuntimeError::Parse {
                path: path.to_path_buf(),
                message: format!("line {} has no message type", number),
            });
        }

        Ok(Some(LogRecord {
            kind: kind.to_string(),
            fields: parts.map(str::to_string).collect(),
            line: number,
        }))
    }
}

impl LogParser for TextLogParser {
    fn name(&self) -> &str {
        "text"
    }

    fn parse(&self, file: &mut File, path: &Path) -> Result<ParsedLog> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RuntimeError::file_operation(path, e))?;

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| RuntimeError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            if let Some(record) = Self::parse_line(&line, index + 1, path)? {
                records.push(record);
            }
        }

        Ok(ParsedLog::new(records))
    }
}
