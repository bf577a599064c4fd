// file: src/plugin/savestate.rs
// description: serializable snapshot of a factory, re-bindable to a live factory type by name
// reference: https://docs.rs/serde

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{plugin_name, plugin_cls, uuid, ...payload}` as written to savestate files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Savestate {
    #[serde(rename = "plugin_name")]
    pub display_name: String,
    #[serde(rename = "plugin_cls")]
    pub type_name: String,
    pub uuid: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Savestate {
    pub fn new(type_name: &str, display_name: &str, uuid: &str, payload: Map<String, Value>) -> Self {
        Self {
            display_name: display_name.to_string(),
            type_name: type_name.to_string(),
            uuid: uuid.to_string(),
            payload,
        }
    }
}
