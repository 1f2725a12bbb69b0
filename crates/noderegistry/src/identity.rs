//! Canonical identifier derivation for plugin source files.

use crate::loader::ModuleLoader;
use crate::scanner;
use nodecore::{ExtractionError, PluginType, RegistryError};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const NODE_SUFFIX: &str = "_node";

/// Resolve the canonical identifier of the plugin defined in `path`.
///
/// The registration marker found in the raw text wins. Otherwise the module
/// is loaded and the identifier stamped on the first plugin type is used,
/// falling back to an identifier inferred from that type's name.
pub async fn resolve_node_id(
    path: &Path,
    loader: &dyn ModuleLoader,
) -> Result<String, ExtractionError> {
    if let Some(id) = scanner::extract_declared_id(path) {
        return Ok(id);
    }

    let module = loader.load(path).await?;
    let plugin_types = loader.find_plugin_types(&module);

    if let Some(id) = plugin_types.iter().find_map(|t| t.declared_id()) {
        tracing::debug!("Node id '{}' read from loaded type in {}", id, path.display());
        return Ok(id.to_string());
    }

    match plugin_types.first() {
        Some(ty) => {
            let id = id_for_type(ty);
            tracing::debug!(
                "Node id '{}' inferred from type '{}' in {}",
                id,
                ty.name,
                path.display()
            );
            Ok(id)
        }
        None => Err(ExtractionError::NoPluginType(path.to_path_buf())),
    }
}

/// Identifier of a plugin type: its declared id, else one inferred from its name
pub fn id_for_type(ty: &PluginType) -> String {
    match ty.declared_id() {
        Some(id) => id.to_string(),
        None => infer_node_id(&ty.name),
    }
}

/// `OpeningAgentNode` → `opening_agent_node`, `Summarize` → `summarize_node`
pub fn infer_node_id(type_name: &str) -> String {
    let snake = camel_to_snake(type_name);
    if snake.ends_with(NODE_SUFFIX) {
        snake
    } else if let Some(base) = snake.strip_suffix("node").filter(|b| !b.is_empty()) {
        format!("{}{}", base, NODE_SUFFIX)
    } else {
        format!("{}{}", snake, NODE_SUFFIX)
    }
}

pub fn camel_to_snake(name: &str) -> String {
    static WORD: OnceLock<Regex> = OnceLock::new();
    static LOWER_UPPER: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid pattern"));
    let lower_upper =
        LOWER_UPPER.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid pattern"));

    let first = word.replace_all(name, "${1}_${2}");
    lower_upper.replace_all(&first, "${1}_${2}").to_lowercase()
}

/// Reject empty identifiers and anything but ASCII letters, digits and `_`
pub fn validate_node_id(id: &str) -> Result<(), RegistryError> {
    if id.trim().is_empty() {
        return Err(RegistryError::InvalidDefinition(
            "node id must not be empty".to_string(),
        ));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RegistryError::InvalidDefinition(format!(
            "node id '{}' may only contain letters, digits and underscores",
            id
        )));
    }
    Ok(())
}

/// Parameter names must be identifiers: `[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_parameter_name(name: &str) -> Result<(), RegistryError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else if name.is_empty() {
        Err(RegistryError::InvalidDefinition(
            "parameter name must not be empty".to_string(),
        ))
    } else {
        Err(RegistryError::InvalidDefinition(format!(
            "invalid parameter name '{}'",
            name
        )))
    }
}

/// Whether `id` can be used as a file name inside the managed directory.
///
/// Declared identifiers come from user source and are not validated like
/// requested ones, so they are only checked for path safety.
pub fn is_file_safe(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains("..")
        && !id.contains('/')
        && !id.contains('\\')
        && !id.chars().any(char::is_control)
}
