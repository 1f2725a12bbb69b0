use crate::fsutil;
use nodecore::plugin::REGISTRATION_MARKER;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A plugin definition file observed on disk
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSourceFile {
    pub path: PathBuf,
    /// File name relative to the managed directory
    pub file_name: String,
    /// Modification time, seconds since the Unix epoch
    pub modified_at: f64,
}

impl NodeSourceFile {
    pub fn stem(&self) -> String {
        fsutil::stem(&self.path)
    }
}

/// Lists plugin definition files in a directory
#[derive(Debug, Clone)]
pub struct SourceFileScanner {
    extension: String,
}

impl SourceFileScanner {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name used for a node with the given id
    pub fn file_name_for(&self, id: &str) -> String {
        format!("{}.{}", id, self.extension)
    }

    /// Whether `file_name` names a plugin definition rather than a package
    /// init file, a private module or a temporary file.
    pub fn is_definition_file(&self, file_name: &str) -> bool {
        let Some(stem) = file_name.strip_suffix(&format!(".{}", self.extension)) else {
            return false;
        };
        !stem.is_empty() && stem != "__init__" && !stem.starts_with('_') && !stem.starts_with('.')
    }

    /// List definition files sorted by name. A missing directory yields an
    /// empty list; files whose metadata cannot be read are skipped.
    pub fn list(&self, dir: &Path) -> io::Result<Vec<NodeSourceFile>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Cannot read entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.is_definition_file(&file_name) {
                continue;
            }
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fsutil::modified_secs(&path) {
                Ok(modified_at) => files.push(NodeSourceFile {
                    path,
                    file_name,
                    modified_at,
                }),
                Err(e) => tracing::warn!("Cannot read metadata of {}: {}", path.display(), e),
            }
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r#"@(?:[A-Za-z_][A-Za-z0-9_]*\.)*{}\(\s*['"]([^'"\n]+)['"]\s*\)"#,
            REGISTRATION_MARKER
        );
        Regex::new(&pattern).expect("registration marker pattern is valid")
    })
}

/// Find the identifier passed to the registration marker in raw source text
pub fn declared_id_in(source: &str) -> Option<String> {
    marker_pattern()
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Read `path` and extract the declared identifier without executing it.
/// Unreadable files log a warning and yield `None`.
pub fn extract_declared_id(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(source) => {
            let id = declared_id_in(&source);
            if let Some(id) = &id {
                tracing::debug!("Declared id '{}' found in {}", id, path.display());
            }
            id
        }
        Err(e) => {
            tracing::warn!("Cannot read {} to extract its node id: {}", path.display(), e);
            None
        }
    }
}
