use crate::fsutil;
use crate::source_parser;
use async_trait::async_trait;
use nodecore::{ExtractionError, PluginModule, PluginType};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Turns a plugin source file into its module and plugin types.
///
/// Loading a file whose module name was loaded before must reflect the
/// file's current contents.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path`. The module name is the file stem.
    async fn load(&self, path: &Path) -> Result<Arc<PluginModule>, ExtractionError>;

    /// Drop any cached state for `module_name`
    async fn invalidate(&self, module_name: &str);

    /// Drop all cached modules
    async fn invalidate_all(&self);

    /// Plugin types defined by `module` itself
    fn find_plugin_types<'a>(&self, module: &'a PluginModule) -> Vec<&'a PluginType> {
        module.plugin_types()
    }
}

/// Default loader: reads plugin sources statically, without executing them.
///
/// Loaded modules are cached by name; every `load` re-reads the file and
/// replaces the cached entry.
pub struct SourceModuleLoader {
    modules: RwLock<HashMap<String, Arc<PluginModule>>>,
}

impl SourceModuleLoader {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Most recently loaded module named `module_name`
    pub async fn cached(&self, module_name: &str) -> Option<Arc<PluginModule>> {
        self.modules.read().await.get(module_name).cloned()
    }
}

impl Default for SourceModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleLoader for SourceModuleLoader {
    async fn load(&self, path: &Path) -> Result<Arc<PluginModule>, ExtractionError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExtractionError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let name = fsutil::stem(path);
        let types = source_parser::parse_module(&source, &name).map_err(|e| {
            ExtractionError::Parse {
                path: path.to_path_buf(),
                line: e.line,
                message: e.message,
            }
        })?;

        let module = Arc::new(PluginModule {
            name: name.clone(),
            path: path.to_path_buf(),
            types,
        });
        tracing::debug!(
            "Loaded module '{}' with {} plugin type(s)",
            name,
            module.plugin_types().len()
        );

        self.modules.write().await.insert(name, module.clone());
        Ok(module)
    }

    async fn invalidate(&self, module_name: &str) {
        if self.modules.write().await.remove(module_name).is_some() {
            tracing::debug!("Invalidated module '{}'", module_name);
        }
    }

    async fn invalidate_all(&self) {
        self.modules.write().await.clear();
    }
}
