use crate::config::RegistryConfig;
use crate::extractor::MetadataExtractor;
use crate::fsutil;
use crate::identity;
use crate::loader::{ModuleLoader, SourceModuleLoader};
use crate::param_block;
use crate::plugin_table::PluginTable;
use crate::reconciler::{ReconcileOutcome, RegistryReconciler};
use crate::scanner::SourceFileScanner;
use crate::store::RegistryStore;
use nodecore::{
    EventBus, NodeInfo, ParameterSpec, PluginType, Registry, RegistryEntry, RegistryError,
    RegistryEvent, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, RwLockWriteGuard};

/// Request to register a new node from source code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    /// Requested id; the id declared in the source takes precedence
    pub node_id: String,
    #[serde(alias = "pythonCode", alias = "code")]
    pub source_code: String,
}

/// New input and output parameters of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterInput {
    #[serde(default)]
    pub inputs: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, ParameterSpec>,
}

/// Public operations over one managed node directory.
///
/// Every operation first reconciles the persisted registry with the
/// directory. Mutations hold the write lock for their whole duration and
/// finish with a plugin reload and an event.
pub struct NodeDefinitionService {
    config: RegistryConfig,
    scanner: SourceFileScanner,
    store: RegistryStore,
    reconciler: RegistryReconciler,
    extractor: MetadataExtractor,
    loader: Arc<dyn ModuleLoader>,
    plugins: Arc<PluginTable>,
    event_bus: Arc<EventBus>,
    lock: RwLock<()>,
}

impl NodeDefinitionService {
    /// Create a service using the static source loader
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_loader(config, Arc::new(SourceModuleLoader::new()))
    }

    pub fn with_loader(config: RegistryConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let scanner = SourceFileScanner::new(config.source_extension.clone());
        let store = RegistryStore::new(config.registry_path());
        let reconciler =
            RegistryReconciler::new(config.nodes_dir.clone(), scanner.clone(), loader.clone());
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            config,
            scanner,
            store,
            reconciler,
            extractor: MetadataExtractor::new(),
            loader,
            plugins: Arc::new(PluginTable::new()),
            event_bus,
            lock: RwLock::new(()),
        }
    }

    pub fn nodes_dir(&self) -> &Path {
        &self.config.nodes_dir
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_bus.subscribe()
    }

    pub fn plugins(&self) -> Arc<PluginTable> {
        self.plugins.clone()
    }

    /// Discard the loaded plugin table. The next lookup reloads every
    /// definition file, picking up edits made outside the service.
    pub async fn invalidate_plugins(&self) {
        let _guard = self.lock.write().await;
        self.plugins.invalidate_all().await;
        tracing::info!("Plugin table invalidated");
    }

    /// Loaded plugin type registered under `id`, loading the table on first use
    pub async fn loaded_plugin(&self, id: &str) -> Result<Option<Arc<PluginType>>> {
        if !self.plugins.is_loaded().await {
            let _guard = self.lock.write().await;
            if !self.plugins.is_loaded().await {
                self.plugins
                    .rebuild(self.nodes_dir(), &self.scanner, self.loader.as_ref())
                    .await?;
            }
        }
        Ok(self.plugins.get(id).await)
    }

    /// Register a node from source code.
    ///
    /// The source is written as `<requested id>.<ext>`, its canonical id is
    /// resolved from the written file, and the file is renamed to match. On
    /// any failure the provisional file is removed.
    pub async fn create(&self, request: CreateNodeRequest) -> Result<RegistryEntry> {
        identity::validate_node_id(&request.node_id)?;

        let guard = self.lock.write().await;
        let mut registry = self.reconcile_locked(&guard).await?.registry;

        if registry.contains(&request.node_id) {
            return Err(RegistryError::DuplicateId(request.node_id));
        }

        std::fs::create_dir_all(self.nodes_dir())?;
        let provisional = self.path_for(&self.scanner.file_name_for(&request.node_id));
        if provisional.exists() {
            return Err(RegistryError::DuplicateId(request.node_id));
        }
        fsutil::atomic_write(&provisional, request.source_code.as_bytes())?;

        let (id, file_name) = match self.place_new_file(&registry, &request.node_id, &provisional).await {
            Ok(placed) => placed,
            Err(e) => {
                if let Err(remove_err) = fsutil::remove_if_exists(&provisional) {
                    tracing::warn!(
                        "Cannot remove provisional file {}: {}",
                        provisional.display(),
                        remove_err
                    );
                }
                self.loader.invalidate(&fsutil::stem(&provisional)).await;
                return Err(e);
            }
        };

        let mtime = fsutil::modified_secs(&self.path_for(&file_name))?;
        let entry = RegistryEntry::new(id, file_name, mtime);
        registry.insert(entry.clone());
        self.store.save(&registry)?;
        tracing::info!("Created node '{}' ({})", entry.id, entry.source_file);

        self.reload().await;
        self.event_bus
            .emit(RegistryEvent::created(&entry.id, &entry.source_file));
        Ok(entry)
    }

    // Resolve the canonical id of a freshly written file and move it to its
    // canonical name. Returns the canonical id and its file name.
    async fn place_new_file(
        &self,
        registry: &Registry,
        requested: &str,
        provisional: &Path,
    ) -> Result<(String, String)> {
        let canonical = identity::resolve_node_id(provisional, self.loader.as_ref()).await?;
        tracing::debug!("Requested id '{}', canonical id '{}'", requested, canonical);

        if !identity::is_file_safe(&canonical) {
            return Err(RegistryError::InvalidDefinition(format!(
                "declared node id '{}' is not a valid file name",
                canonical
            )));
        }
        if registry.contains(&canonical) {
            return Err(RegistryError::DuplicateId(canonical));
        }

        let file_name = self.scanner.file_name_for(&canonical);
        if canonical != requested {
            let target = self.path_for(&file_name);
            if target.exists() {
                return Err(RegistryError::DuplicateId(canonical));
            }
            std::fs::rename(provisional, &target)?;
            self.loader.invalidate(&fsutil::stem(provisional)).await;
            tracing::info!("Node id '{}' replaced by declared id '{}'", requested, canonical);
        }
        Ok((canonical, file_name))
    }

    /// Describe the node registered under `id`
    pub async fn get(&self, id: &str) -> Result<NodeInfo> {
        let guard = self.lock.write().await;
        let registry = self.reconcile_locked(&guard).await?.registry;
        let _read = guard.downgrade();

        let entry = registry
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        self.describe(entry).await
    }

    /// Source code of the node registered under `id`
    pub async fn get_code(&self, id: &str) -> Result<String> {
        let guard = self.lock.write().await;
        let registry = self.reconcile_locked(&guard).await?.registry;
        let _read = guard.downgrade();

        let entry = registry
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let path = self.path_for(&entry.source_file);
        match tokio::fs::read_to_string(&path).await {
            Ok(code) => Ok(code),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RegistryError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the source of a node. The new content is staged next to the
    /// old file and only moved into place once its id has been checked.
    pub async fn update_code(&self, id: &str, source_code: &str) -> Result<RegistryEntry> {
        let guard = self.lock.write().await;
        let mut registry = self.reconcile_locked(&guard).await?.registry;

        let entry = registry
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let old_path = self.path_for(&entry.source_file);
        if !old_path.exists() {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        let staged = fsutil::stage(
            self.nodes_dir(),
            self.scanner.extension(),
            source_code.as_bytes(),
        )?;
        let placed = self.place_staged_file(&registry, &entry, &staged).await;
        self.loader.invalidate(&fsutil::stem(&staged)).await;
        let (new_id, file_name) = match placed {
            Ok(placed) => placed,
            Err(e) => {
                if let Err(remove_err) = fsutil::remove_if_exists(&staged) {
                    tracing::warn!("Cannot remove staged file {}: {}", staged.display(), remove_err);
                }
                return Err(e);
            }
        };

        let path = self.path_for(&file_name);
        let mtime = fsutil::modified_secs(&path)?;
        let updated = {
            let slot = registry
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            slot.id = new_id.clone();
            slot.source_file = file_name;
            slot.mtime = mtime;
            slot.touch();
            slot.clone()
        };
        self.store.save(&registry)?;

        let previous_id = (new_id != id).then(|| id.to_string());
        match &previous_id {
            Some(previous) => tracing::info!("Updated node '{}' (was '{}')", new_id, previous),
            None => tracing::info!("Updated node '{}'", new_id),
        }

        self.reload().await;
        self.event_bus.emit(RegistryEvent::updated(
            &updated.id,
            previous_id,
            &updated.source_file,
        ));
        Ok(updated)
    }

    // Check the id declared by a staged file and move it over the node's
    // file, renaming when the id changed. Returns the new id and file name.
    async fn place_staged_file(
        &self,
        registry: &Registry,
        entry: &RegistryEntry,
        staged: &Path,
    ) -> Result<(String, String)> {
        let new_id = identity::resolve_node_id(staged, self.loader.as_ref()).await?;
        let old_path = self.path_for(&entry.source_file);

        if new_id == entry.id {
            std::fs::rename(staged, &old_path)?;
            self.loader.invalidate(&fsutil::stem(&old_path)).await;
            return Ok((new_id, entry.source_file.clone()));
        }

        if !identity::is_file_safe(&new_id) {
            return Err(RegistryError::InvalidDefinition(format!(
                "declared node id '{}' is not a valid file name",
                new_id
            )));
        }
        if registry.contains(&new_id) {
            return Err(RegistryError::DuplicateId(new_id));
        }
        let file_name = self.scanner.file_name_for(&new_id);
        let target = self.path_for(&file_name);
        if file_name != entry.source_file && target.exists() {
            return Err(RegistryError::RenameConflict {
                from: entry.source_file.clone(),
                to: file_name,
            });
        }

        std::fs::rename(staged, &target)?;
        if target != old_path {
            fsutil::remove_if_exists(&old_path)?;
        }
        self.loader.invalidate(&fsutil::stem(&old_path)).await;
        self.loader.invalidate(&new_id).await;
        Ok((new_id, file_name))
    }

    /// Rewrite only the input and output parameter blocks of a node's source
    pub async fn update_parameters(
        &self,
        id: &str,
        inputs: &BTreeMap<String, ParameterSpec>,
        outputs: &BTreeMap<String, ParameterSpec>,
    ) -> Result<RegistryEntry> {
        for name in inputs.keys().chain(outputs.keys()) {
            identity::validate_parameter_name(name)?;
        }

        let guard = self.lock.write().await;
        let mut registry = self.reconcile_locked(&guard).await?.registry;

        let source_file = registry
            .get(id)
            .map(|entry| entry.source_file.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let path = self.path_for(&source_file);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let rewritten = param_block::rewrite_parameters(&source, inputs, outputs)
            .map_err(|e| RegistryError::InvalidDefinition(format!("{} in {}", e, source_file)))?;
        fsutil::atomic_write(&path, rewritten.as_bytes())?;
        self.loader.invalidate(&fsutil::stem(&path)).await;

        let mtime = fsutil::modified_secs(&path)?;
        let updated = {
            let slot = registry
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            slot.mtime = mtime;
            slot.touch();
            slot.clone()
        };
        self.store.save(&registry)?;
        tracing::info!(
            "Updated parameters of node '{}' ({} input(s), {} output(s))",
            id,
            inputs.len(),
            outputs.len()
        );

        self.reload().await;
        self.event_bus
            .emit(RegistryEvent::updated(id, None, &updated.source_file));
        Ok(updated)
    }

    /// Remove a node and its source file. A source file that is already gone
    /// is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let guard = self.lock.write().await;
        let mut registry = self.reconcile_locked(&guard).await?.registry;

        let entry = registry
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let path = self.path_for(&entry.source_file);
        fsutil::remove_if_exists(&path)?;
        self.loader.invalidate(&fsutil::stem(&path)).await;
        self.store.save(&registry)?;
        tracing::info!("Deleted node '{}' ({})", id, entry.source_file);

        self.reload().await;
        self.event_bus.emit(RegistryEvent::deleted(id));
        Ok(())
    }

    /// Describe every registered node. Nodes whose metadata cannot be
    /// extracted are logged and left out.
    pub async fn list(&self) -> Result<Vec<NodeInfo>> {
        let guard = self.lock.write().await;
        let registry = self.reconcile_locked(&guard).await?.registry;
        let _read = guard.downgrade();

        let mut nodes = Vec::with_capacity(registry.len());
        for entry in &registry.nodes {
            match self.describe(entry).await {
                Ok(info) => nodes.push(info),
                Err(e) => tracing::warn!("Skipping node '{}': {}", entry.id, e),
            }
        }
        Ok(nodes)
    }

    /// Reconcile the registry with the directory, persist it and reload
    /// plugins. Conflicts found on the way are returned.
    pub async fn rescan(&self) -> Result<ReconcileOutcome> {
        let guard = self.lock.write().await;
        let outcome = self.reconcile_locked(&guard).await?;
        self.reload().await;
        Ok(outcome)
    }

    // Load the registry and bring it up to date with the directory. The
    // guard parameter ties the call to a held write lock.
    async fn reconcile_locked(&self, _guard: &RwLockWriteGuard<'_, ()>) -> Result<ReconcileOutcome> {
        let (outcome, fresh) = match self.store.load() {
            Some(registry) => (self.reconciler.reconcile(registry).await?, false),
            None => (self.reconciler.full_scan().await?, true),
        };

        for conflict in &outcome.conflicts {
            tracing::warn!("Node id conflict: {}", conflict);
        }
        if outcome.changed || fresh {
            self.store.save(&outcome.registry)?;
        }
        Ok(outcome)
    }

    async fn describe(&self, entry: &RegistryEntry) -> Result<NodeInfo> {
        let path = self.path_for(&entry.source_file);
        let module = self.loader.load(&path).await?;
        let descriptor = self.extractor.extract_from_module(&module, &entry.id)?;
        Ok(NodeInfo::new(entry, descriptor))
    }

    async fn reload(&self) {
        match self
            .plugins
            .rebuild(self.nodes_dir(), &self.scanner, self.loader.as_ref())
            .await
        {
            Ok(count) => self.event_bus.emit(RegistryEvent::reloaded(count)),
            Err(e) => {
                tracing::warn!("Failed to reload plugins: {}", e);
                self.plugins.invalidate_all().await;
            }
        }
    }

    fn path_for(&self, file_name: &str) -> PathBuf {
        self.config.nodes_dir.join(file_name)
    }
}
