use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Node id already exists: {0}")]
    DuplicateId(String),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Invalid node definition: {0}")]
    InvalidDefinition(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Cannot rename '{from}' to '{to}': target file already exists")]
    RenameConflict { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to determine the identity or metadata of a plugin source file
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("No plugin type found in {0}")]
    NoPluginType(PathBuf),
}

impl RegistryError {
    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::DuplicateId(_) => "duplicate_id",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::InvalidDefinition(_) => "invalid_definition",
            RegistryError::Extraction(_) => "extraction_error",
            RegistryError::RenameConflict { .. } => "rename_conflict",
            RegistryError::Io(_) | RegistryError::Serialization(_) => "io_failure",
        }
    }
}
