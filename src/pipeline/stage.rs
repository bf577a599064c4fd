// file: src/pipeline/stage.rs
// description: the four fixed hook-call points every plugin instance passes through per file
// reference: stage order is strict and total

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Filename,
    Filehandle,
    ParsedLog,
    Messages,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 4] = [
        Stage::Filename,
        Stage::Filehandle,
        Stage::ParsedLog,
        Stage::Messages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Filename => "Filename",
            Stage::Filehandle => "Filehandle",
            Stage::ParsedLog => "Parsed log",
            Stage::Messages => "Messages",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Stage::Filename => 0,
            Stage::Filehandle => 1,
            Stage::ParsedLog => 2,
            Stage::Messages => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_index() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(Stage::from_index(i), Some(*stage));
        }
        assert_eq!(Stage::from_index(4), None);
        assert!(Stage::Filename < Stage::Messages);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ParsedLog.to_string(), "Parsed log");
        assert_eq!(Stage::Filehandle.name(), "Filehandle");
    }
}
