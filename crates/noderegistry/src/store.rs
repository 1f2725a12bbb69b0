use crate::fsutil;
use nodecore::{Registry, Result, REGISTRY_VERSION};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Persistence of the registry index as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the registry. A missing or unreadable file yields `None`, which
    /// callers answer with a full rescan.
    pub fn load(&self) -> Option<Registry> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("No registry file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Cannot read registry file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<Registry>(&bytes) {
            Ok(registry) => {
                if registry.version != REGISTRY_VERSION {
                    tracing::warn!(
                        "Registry file {} has version {}, expected {}",
                        self.path.display(),
                        registry.version,
                        REGISTRY_VERSION
                    );
                }
                Some(registry)
            }
            Err(e) => {
                tracing::warn!(
                    "Registry file {} is corrupt, it will be rebuilt: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write the registry through a temporary file and a rename
    pub fn save(&self, registry: &Registry) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(registry)?;
        fsutil::atomic_write(&self.path, &json)?;
        tracing::debug!(
            "Saved registry with {} node(s) to {}",
            registry.len(),
            self.path.display()
        );
        Ok(())
    }
}
