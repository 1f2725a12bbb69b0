use nodecore::descriptor::{DEFAULT_CATEGORY, DEFAULT_COLOR, DEFAULT_EXECUTION_MODE};
use nodecore::plugin::attrs;
use nodecore::{
    AttrValue, ConfigField, ExtractionError, NodeDescriptor, ParameterSpec, PluginModule,
    PluginType,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const PARAMETER_SCHEMA: &str = "ParameterSchema";
const FIELD_SCHEMA: &str = "FieldSchema";
const FALLBACK_FIELD_TYPE: &str = "any";

/// A parameter as declared in source, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterDecl {
    /// `ParameterSchema(is_streaming=..., schema=..., description=...)`
    Typed {
        is_streaming: bool,
        schema: Value,
        description: String,
    },
    /// Plain record with `is_streaming`/`isStreaming`, `schema` and `description`
    Record(Map<String, Value>),
}

impl ParameterDecl {
    pub fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Call { args, .. } if value.callee() == Some(PARAMETER_SCHEMA) => {
                let arg = |index: usize, name: &str| value.kwarg(name).or_else(|| args.get(index));
                Some(ParameterDecl::Typed {
                    is_streaming: arg(0, "is_streaming")
                        .and_then(AttrValue::as_bool)
                        .unwrap_or(false),
                    schema: arg(1, "schema")
                        .filter(|v| !v.is_none())
                        .map(AttrValue::to_json)
                        .unwrap_or_else(empty_object),
                    description: arg(2, "description")
                        .and_then(AttrValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            AttrValue::Dict(_) => match value.to_json() {
                Value::Object(map) => Some(ParameterDecl::Record(map)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn normalize(self) -> ParameterSpec {
        match self {
            ParameterDecl::Typed {
                is_streaming,
                schema,
                description,
            } => ParameterSpec {
                is_streaming,
                schema,
                description,
            },
            ParameterDecl::Record(map) => {
                let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
                ParameterSpec {
                    is_streaming: flag("is_streaming") || flag("isStreaming"),
                    schema: map.get("schema").cloned().unwrap_or_else(empty_object),
                    description: map
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
        }
    }
}

/// A configuration field as declared in source
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFieldDecl {
    /// `"string"`
    Simple(String),
    /// `{"type": ..., "required": ..., "description": ..., "default": ...}`
    /// or the equivalent `FieldSchema(...)` call
    Detailed {
        field_type: String,
        required: Option<bool>,
        description: Option<String>,
        default: Option<Value>,
    },
}

impl ConfigFieldDecl {
    pub fn from_attr(value: &AttrValue) -> Self {
        match value {
            AttrValue::Str(s) => ConfigFieldDecl::Simple(s.clone()),
            AttrValue::Dict(_) => ConfigFieldDecl::Detailed {
                field_type: value
                    .get("type")
                    .and_then(AttrValue::as_str)
                    .unwrap_or(FALLBACK_FIELD_TYPE)
                    .to_string(),
                required: value.get("required").and_then(AttrValue::as_bool),
                description: value
                    .get("description")
                    .and_then(AttrValue::as_str)
                    .map(str::to_string),
                default: value.get("default").filter(|v| !v.is_none()).map(AttrValue::to_json),
            },
            AttrValue::Call { args, .. } if value.callee() == Some(FIELD_SCHEMA) => {
                let arg = |index: usize, name: &str| value.kwarg(name).or_else(|| args.get(index));
                ConfigFieldDecl::Detailed {
                    field_type: arg(0, "type")
                        .and_then(AttrValue::as_str)
                        .unwrap_or(FALLBACK_FIELD_TYPE)
                        .to_string(),
                    required: arg(1, "required")
                        .and_then(AttrValue::as_bool)
                        .filter(|required| *required),
                    description: arg(2, "description")
                        .and_then(AttrValue::as_str)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string),
                    default: arg(3, "default")
                        .filter(|v| !v.is_none())
                        .map(AttrValue::to_json),
                }
            }
            _ => ConfigFieldDecl::Simple(FALLBACK_FIELD_TYPE.to_string()),
        }
    }

    pub fn normalize(self) -> ConfigField {
        match self {
            ConfigFieldDecl::Simple(field_type) => ConfigField::of_type(field_type),
            ConfigFieldDecl::Detailed {
                field_type,
                required,
                description,
                default,
            } => ConfigField {
                field_type,
                required,
                description,
                default,
            },
        }
    }
}

/// Produces normalized descriptors from loaded plugin types
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Describe `ty`. Missing or malformed optional attributes fall back to
    /// defaults; this never fails.
    pub fn extract(&self, ty: &PluginType) -> NodeDescriptor {
        let text = |name: &str, default: &str| {
            ty.attr(name)
                .and_then(AttrValue::as_str)
                .unwrap_or(default)
                .to_string()
        };

        NodeDescriptor {
            declared_id: ty.declared_id().map(str::to_string),
            name: text(attrs::NAME, &ty.name),
            description: ty.doc.as_deref().map(str::trim).unwrap_or_default().to_string(),
            category: text(attrs::CATEGORY, DEFAULT_CATEGORY),
            execution_mode: text(attrs::EXECUTION_MODE, DEFAULT_EXECUTION_MODE),
            color: text(attrs::COLOR, DEFAULT_COLOR),
            inputs: parameters(ty, attrs::INPUT_PARAMS),
            outputs: parameters(ty, attrs::OUTPUT_PARAMS),
            config_params: config_fields(ty),
        }
    }

    /// Describe the plugin type of `module` registered under `id`, or its
    /// first plugin type when none declares that id.
    pub fn extract_from_module(
        &self,
        module: &PluginModule,
        id: &str,
    ) -> Result<NodeDescriptor, ExtractionError> {
        let plugin_types = module.plugin_types();
        plugin_types
            .iter()
            .find(|t| t.declared_id() == Some(id))
            .or_else(|| plugin_types.first())
            .map(|ty| self.extract(ty))
            .ok_or_else(|| ExtractionError::NoPluginType(module.path.clone()))
    }
}

fn parameters(ty: &PluginType, attr: &str) -> BTreeMap<String, ParameterSpec> {
    let Some(entries) = ty.attr(attr).and_then(AttrValue::as_dict) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(name, value)| match ParameterDecl::from_attr(value) {
            Some(decl) => Some((name.clone(), decl.normalize())),
            None => {
                tracing::debug!("Skipping parameter '{}' of '{}': unsupported shape", name, ty.name);
                None
            }
        })
        .collect()
}

fn config_fields(ty: &PluginType) -> BTreeMap<String, ConfigField> {
    let declared = ty
        .attr(attrs::CONFIG_PARAMS)
        .or_else(|| ty.attr(attrs::CONFIG_SCHEMA))
        .and_then(AttrValue::as_dict)
        .unwrap_or_default();
    declared
        .iter()
        .map(|(name, value)| (name.clone(), ConfigFieldDecl::from_attr(value).normalize()))
        .collect()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
