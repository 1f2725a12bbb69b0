//! Core types for the node definition registry
//!
//! This crate provides the records, descriptors, plugin-type model and error
//! taxonomy shared by the registry engine and its front ends. It performs no
//! filesystem access of its own.

pub mod descriptor;
mod error;
pub mod events;
pub mod plugin;
mod registry;
mod value;

pub use descriptor::{ConfigField, NodeDescriptor, NodeInfo, ParameterSpec};
pub use error::{ExtractionError, RegistryError};
pub use events::{EventBus, RegistryEvent};
pub use plugin::{PluginModule, PluginType};
pub use registry::{Registry, RegistryEntry, REGISTRY_VERSION};
pub use value::AttrValue;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
