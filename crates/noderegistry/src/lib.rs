//! Node definition registry engine
//!
//! This crate keeps a directory of user-authored plugin source files in sync
//! with a persisted registry index. It derives each plugin's canonical id,
//! extracts descriptors without executing plugin code, edits parameter
//! blocks in place, and reloads the plugin table after every change.

pub mod config;
pub mod extractor;
mod fsutil;
pub mod identity;
mod loader;
pub mod param_block;
mod plugin_table;
mod reconciler;
pub mod scanner;
mod service;
mod source_parser;
mod store;

pub use config::{AppConfig, ConfigError, ConfigOverrides, RegistryConfig};
pub use extractor::{ConfigFieldDecl, MetadataExtractor, ParameterDecl};
pub use loader::{ModuleLoader, SourceModuleLoader};
pub use param_block::BlockError;
pub use plugin_table::PluginTable;
pub use reconciler::{ConflictKind, IdConflict, ReconcileOutcome, RegistryReconciler};
pub use scanner::{NodeSourceFile, SourceFileScanner};
pub use service::{CreateNodeRequest, NodeDefinitionService, ParameterInput};
pub use source_parser::{parse_module, ParseError};
pub use store::RegistryStore;
