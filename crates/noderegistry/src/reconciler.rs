use crate::identity;
use crate::loader::ModuleLoader;
use crate::scanner::{NodeSourceFile, SourceFileScanner};
use nodecore::{Registry, RegistryEntry, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Why a file's derived identifier could not be applied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Another entry already holds the identifier
    IdTaken { held_by: String },
    /// The file the identifier maps to already exists on disk
    FileExists { target: String },
}

/// An identifier collision found while reconciling
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdConflict {
    /// The identifier the file declares
    pub id: String,
    pub source_file: String,
    #[serde(flatten)]
    pub kind: ConflictKind,
}

impl std::fmt::Display for IdConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConflictKind::IdTaken { held_by } => write!(
                f,
                "{} declares id '{}' which is already used by {}",
                self.source_file, self.id, held_by
            ),
            ConflictKind::FileExists { target } => write!(
                f,
                "{} declares id '{}' but {} already exists",
                self.source_file, self.id, target
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub registry: Registry,
    /// Whether the registry differs from the one passed in
    pub changed: bool,
    pub conflicts: Vec<IdConflict>,
}

/// Brings a registry in line with the files in the managed directory
pub struct RegistryReconciler {
    dir: PathBuf,
    scanner: SourceFileScanner,
    loader: Arc<dyn ModuleLoader>,
}

impl RegistryReconciler {
    pub fn new(dir: impl Into<PathBuf>, scanner: SourceFileScanner, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            dir: dir.into(),
            scanner,
            loader,
        }
    }

    /// Build a registry from scratch
    pub async fn full_scan(&self) -> Result<ReconcileOutcome> {
        tracing::info!("Scanning {} for node definitions", self.dir.display());
        self.reconcile(Registry::new()).await
    }

    pub async fn reconcile(&self, mut registry: Registry) -> Result<ReconcileOutcome> {
        let files = self.scanner.list(&self.dir)?;
        let by_name: HashMap<&str, &NodeSourceFile> =
            files.iter().map(|f| (f.file_name.as_str(), f)).collect();
        let mut changed = false;
        let mut conflicts = Vec::new();

        // Entries whose file is gone
        let before = registry.len();
        registry.nodes.retain(|entry| {
            let present = by_name.contains_key(entry.source_file.as_str());
            if !present {
                tracing::info!("Node file removed: {} ({})", entry.source_file, entry.id);
            }
            present
        });
        changed |= registry.len() != before;

        // Modified files, tracked by the name they were scanned under
        let mut seen: HashSet<String> = HashSet::new();
        for index in 0..registry.nodes.len() {
            let scanned_name = registry.nodes[index].source_file.clone();
            seen.insert(scanned_name.clone());
            let Some(file) = by_name.get(scanned_name.as_str()) else {
                continue;
            };
            if file.modified_at <= registry.nodes[index].mtime {
                continue;
            }

            tracing::info!("Node file modified: {}", scanned_name);
            if let Some(conflict) = self.rederive(&mut registry, index, file).await {
                tracing::warn!("Keeping node id '{}': {}", registry.nodes[index].id, conflict);
                conflicts.push(conflict);
            }
            let entry = &mut registry.nodes[index];
            entry.mtime = file.modified_at;
            entry.touch();
            changed = true;
        }

        // New files
        for file in &files {
            if seen.contains(&file.file_name) {
                continue;
            }
            let id = match identity::resolve_node_id(&file.path, self.loader.as_ref()).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file.file_name, e);
                    continue;
                }
            };
            if let Some(holder) = registry.get(&id) {
                let conflict = IdConflict {
                    id: id.clone(),
                    source_file: file.file_name.clone(),
                    kind: ConflictKind::IdTaken {
                        held_by: holder.source_file.clone(),
                    },
                };
                tracing::warn!("Skipping new file: {}", conflict);
                conflicts.push(conflict);
                continue;
            }
            tracing::info!("New node file: {} ({})", file.file_name, id);
            registry.insert(RegistryEntry::new(id, file.file_name.clone(), file.modified_at));
            changed = true;
        }

        Ok(ReconcileOutcome {
            registry,
            changed,
            conflicts,
        })
    }

    // Re-derive the id of a modified file and apply it, renaming the file to
    // match. Returns the conflict that prevented the change, if any.
    async fn rederive(
        &self,
        registry: &mut Registry,
        index: usize,
        file: &NodeSourceFile,
    ) -> Option<IdConflict> {
        let new_id = match identity::resolve_node_id(&file.path, self.loader.as_ref()).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Cannot re-derive node id of {}: {}", file.file_name, e);
                return None;
            }
        };
        let current = &registry.nodes[index];
        if new_id == current.id {
            return None;
        }

        if let Some(holder) = registry.get(&new_id) {
            return Some(IdConflict {
                id: new_id.clone(),
                source_file: file.file_name.clone(),
                kind: ConflictKind::IdTaken {
                    held_by: holder.source_file.clone(),
                },
            });
        }
        if !identity::is_file_safe(&new_id) {
            tracing::warn!(
                "Declared id '{}' in {} is not usable as a file name",
                new_id,
                file.file_name
            );
            return None;
        }

        let target_name = self.scanner.file_name_for(&new_id);
        if target_name != current.source_file {
            let target = self.dir.join(&target_name);
            if target.exists() {
                return Some(IdConflict {
                    id: new_id,
                    source_file: file.file_name.clone(),
                    kind: ConflictKind::FileExists {
                        target: target_name,
                    },
                });
            }
            if let Err(e) = std::fs::rename(&file.path, &target) {
                tracing::warn!("Cannot rename {} to {}: {}", file.file_name, target_name, e);
                return None;
            }
            self.loader.invalidate(&file.stem()).await;
        }

        let entry = &mut registry.nodes[index];
        tracing::info!("Node id changed: {} -> {}", entry.id, new_id);
        entry.id = new_id;
        entry.source_file = target_name;
        None
    }
}
