use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every registry file
pub const REGISTRY_VERSION: &str = "1.0";

/// Persisted record binding a canonical node id to its source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    #[serde(alias = "pythonFile")]
    pub source_file: String,
    /// Last observed modification time of `source_file`, seconds since the epoch
    #[serde(default)]
    pub mtime: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(id: impl Into<String>, source_file: impl Into<String>, mtime: f64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_file: source_file.into(),
            mtime,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Snapshot of the full node index.
///
/// A `Registry` is rebuilt from disk for every operation and must not be
/// shared between requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, alias = "custom_nodes")]
    pub nodes: Vec<RegistryEntry>,
}

fn default_version() -> String {
    REGISTRY_VERSION.to_string()
}

impl Registry {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            nodes: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RegistryEntry> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Find the entry backed by the given source file name
    pub fn by_source_file(&self, file_name: &str) -> Option<&RegistryEntry> {
        self.nodes.iter().find(|n| n.source_file == file_name)
    }

    pub fn insert(&mut self, entry: RegistryEntry) {
        self.nodes.push(entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<RegistryEntry> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(index))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
