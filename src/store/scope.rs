// file: src/store/scope.rs
// description: document scope tags and the reserved keys every document carries
// reference: scope values are persisted as small integers

use crate::error::{Result, RuntimeError};
use serde_json::Value;
use std::fmt;

pub const UUID_KEY: &str = "__uuid";
pub const SCOPE_KEY: &str = "__scope";

/// Tag constraining how many documents of a kind may be mounted at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Plugin,
    Inputs,
}

impl Scope {
    pub fn code(self) -> u64 {
        match self {
            Scope::Global => 1,
            Scope::Plugin => 2,
            Scope::Inputs => 3,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            1 => Ok(Scope::Global),
            2 => Ok(Scope::Plugin),
            3 => Ok(Scope::Inputs),
            other => Err(RuntimeError::Validation(format!(
                "Unknown document scope {}",
                other
            ))),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        value
            .as_u64()
            .ok_or_else(|| {
                RuntimeError::Validation(format!("Document scope must be an integer, got {}", value))
            })
            .and_then(Self::from_code)
    }

    /// Scopes of which at most one document may be mounted.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Scope::Plugin | Scope::Inputs)
    }

    pub fn to_value(self) -> Value {
        Value::from(self.code())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Global => "global",
            Scope::Plugin => "plugin",
            Scope::Inputs => "inputs",
        };
        f.write_str(name)
    }
}

pub fn is_reserved_key(key: &str) -> bool {
    key == UUID_KEY || key == SCOPE_KEY
}
