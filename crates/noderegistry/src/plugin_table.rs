use crate::identity;
use crate::loader::ModuleLoader;
use crate::scanner::SourceFileScanner;
use nodecore::PluginType;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Loaded plugin types keyed by canonical id.
///
/// The table is never patched in place: `rebuild` loads every definition file
/// into a fresh map and swaps it in.
pub struct PluginTable {
    plugins: RwLock<Option<HashMap<String, Arc<PluginType>>>>,
}

impl PluginTable {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(None),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<PluginType>> {
        self.plugins.read().await.as_ref()?.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.as_ref().map_or(0, HashMap::len)
    }

    pub async fn is_loaded(&self) -> bool {
        self.plugins.read().await.is_some()
    }

    /// Drop the table; the next lookup through the service rebuilds it
    pub async fn invalidate_all(&self) {
        *self.plugins.write().await = None;
    }

    /// Reload every definition file in `dir` and replace the table.
    /// Returns the number of plugin types loaded.
    pub async fn rebuild(
        &self,
        dir: &Path,
        scanner: &SourceFileScanner,
        loader: &dyn ModuleLoader,
    ) -> std::io::Result<usize> {
        loader.invalidate_all().await;

        let mut fresh: HashMap<String, Arc<PluginType>> = HashMap::new();
        for file in scanner.list(dir)? {
            let module = match loader.load(&file.path).await {
                Ok(module) => module,
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", file.file_name, e);
                    continue;
                }
            };
            for ty in loader.find_plugin_types(&module) {
                let id = identity::id_for_type(ty);
                if fresh.contains_key(&id) {
                    tracing::warn!(
                        "Plugin id '{}' in {} is already loaded, skipping",
                        id,
                        file.file_name
                    );
                    continue;
                }
                fresh.insert(id, Arc::new(ty.clone()));
            }
        }

        let count = fresh.len();
        *self.plugins.write().await = Some(fresh);
        tracing::info!("Reloaded {} plugin type(s) from {}", count, dir.display());
        Ok(count)
    }
}

impl Default for PluginTable {
    fn default() -> Self {
        Self::new()
    }
}
