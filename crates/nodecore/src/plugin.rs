use crate::AttrValue;
use std::path::PathBuf;

/// Base contract every plugin type derives from
pub const BASE_CONTRACT: &str = "Node";

/// Registration marker applied to plugin types, e.g. `@register_node('my_node')`
pub const REGISTRATION_MARKER: &str = "register_node";

/// Attribute the registration marker stamps onto the plugin type
pub const DECLARED_ID_ATTR: &str = "__node_id__";

/// Class-level attribute names read by the metadata extractor
pub mod attrs {
    pub const NAME: &str = "NAME";
    pub const CATEGORY: &str = "CATEGORY";
    pub const EXECUTION_MODE: &str = "EXECUTION_MODE";
    pub const COLOR: &str = "COLOR";
    pub const INPUT_PARAMS: &str = "INPUT_PARAMS";
    pub const OUTPUT_PARAMS: &str = "OUTPUT_PARAMS";
    pub const CONFIG_PARAMS: &str = "CONFIG_PARAMS";
    pub const CONFIG_SCHEMA: &str = "CONFIG_SCHEMA";
}

/// A type defined (or imported) by a loaded plugin module
#[derive(Debug, Clone, PartialEq)]
pub struct PluginType {
    /// Type name as written in the source, e.g. `OpeningAgentNode`
    pub name: String,
    /// Namespace the type was defined in
    pub module: String,
    /// Names of the base types, unqualified
    pub bases: Vec<String>,
    pub doc: Option<String>,
    /// Class-level attributes in declaration order
    pub attributes: Vec<(String, AttrValue)>,
}

impl PluginType {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            bases: Vec::new(),
            doc: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set_attr(name, value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Set an attribute, replacing an earlier assignment of the same name
    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        self.attributes.retain(|(k, _)| *k != name);
        self.attributes.push((name, value));
    }

    /// Identifier stamped by the registration marker, if any
    pub fn declared_id(&self) -> Option<&str> {
        self.attr(DECLARED_ID_ATTR)
            .and_then(AttrValue::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn implements_contract(&self) -> bool {
        self.name != BASE_CONTRACT && self.bases.iter().any(|b| b == BASE_CONTRACT)
    }

    /// Whether the type lives in the namespace of module `module_name`
    pub fn defined_in(&self, module_name: &str) -> bool {
        self.module == module_name || self.module.ends_with(&format!(".{}", module_name))
    }
}

/// Result of loading a plugin source file
#[derive(Debug, Clone, PartialEq)]
pub struct PluginModule {
    /// Module name, the file stem of `path`
    pub name: String,
    pub path: PathBuf,
    pub types: Vec<PluginType>,
}

impl PluginModule {
    /// Every type implementing the plugin contract that is defined by this
    /// module itself, excluding the base contract and re-exported types.
    pub fn plugin_types(&self) -> Vec<&PluginType> {
        self.types
            .iter()
            .filter(|t| t.name != BASE_CONTRACT && t.defined_in(&self.name))
            .filter(|t| self.derives_from_contract(t, 0))
            .collect()
    }

    pub fn get_type(&self, name: &str) -> Option<&PluginType> {
        self.types.iter().find(|t| t.name == name)
    }

    // Follows base types declared in the same module, so `class B(A)` with
    // `class A(Node)` counts as a plugin type.
    fn derives_from_contract(&self, ty: &PluginType, depth: usize) -> bool {
        if ty.implements_contract() {
            return true;
        }
        if depth > 16 {
            return false;
        }
        ty.bases.iter().any(|base| {
            self.get_type(base)
                .filter(|parent| parent.name != ty.name)
                .map_or(false, |parent| self.derives_from_contract(parent, depth + 1))
        })
    }
}
