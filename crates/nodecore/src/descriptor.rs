use crate::RegistryEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CATEGORY: &str = "custom";
pub const DEFAULT_EXECUTION_MODE: &str = "sequential";
pub const DEFAULT_COLOR: &str = "#1890ff";

/// Normalized input/output parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(default, alias = "is_streaming")]
    pub is_streaming: bool,
    /// Either a simple type name or a field-name to type mapping
    #[serde(default = "empty_schema")]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

fn empty_schema() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ParameterSpec {
    pub fn new(is_streaming: bool, schema: serde_json::Value) -> Self {
        Self {
            is_streaming,
            schema,
            description: String::new(),
        }
    }
}

impl Default for ParameterSpec {
    fn default() -> Self {
        Self::new(false, empty_schema())
    }
}

/// Normalized configuration parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ConfigField {
    pub fn of_type(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            required: None,
            description: None,
            default: None,
        }
    }
}

/// Metadata of a plugin type, derived on every read and never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Identifier stamped on the plugin type by the registration marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_id: Option<String>,
    pub name: String,
    pub description: String,
    pub category: String,
    pub execution_mode: String,
    pub color: String,
    pub inputs: BTreeMap<String, ParameterSpec>,
    pub outputs: BTreeMap<String, ParameterSpec>,
    pub config_params: BTreeMap<String, ConfigField>,
}

/// Descriptor of a registered node joined with its registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    #[serde(flatten)]
    pub descriptor: NodeDescriptor,
    pub source_file: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeInfo {
    pub fn new(entry: &RegistryEntry, descriptor: NodeDescriptor) -> Self {
        Self {
            id: entry.id.clone(),
            descriptor,
            source_file: entry.source_file.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}
