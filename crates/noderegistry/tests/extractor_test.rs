// crates/noderegistry/tests/extractor_test.rs

mod common;

use common::node_source;
use nodecore::descriptor::{DEFAULT_CATEGORY, DEFAULT_COLOR, DEFAULT_EXECUTION_MODE};
use nodecore::{AttrValue, PluginModule, PluginType};
use noderegistry::{
    parse_module, ConfigFieldDecl, MetadataExtractor, ModuleLoader, ParameterDecl,
    SourceModuleLoader,
};
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

fn module_from(source: &str, name: &str) -> PluginModule {
    PluginModule {
        name: name.to_string(),
        path: PathBuf::from(format!("{}.py", name)),
        types: parse_module(source, name).unwrap(),
    }
}

#[test]
fn test_parse_class_attributes() {
    let module = module_from(&node_source("summarizer", "SummarizerNode"), "summarizer");

    let plugin_types = module.plugin_types();
    assert_eq!(plugin_types.len(), 1, "Only the defined class is a plugin type");
    let ty = plugin_types[0];

    assert_eq!(ty.name, "SummarizerNode");
    assert_eq!(ty.bases, vec!["Node".to_string()]);
    assert_eq!(ty.declared_id(), Some("summarizer"));
    assert_eq!(ty.doc.as_deref(), Some("Summarizes incoming text."));
    assert_eq!(ty.attr("NAME"), Some(&AttrValue::Str("Summarizer".to_string())));
    assert!(ty.attr("run").is_none(), "Methods are not attributes");
}

#[test]
fn test_extract_full_descriptor() {
    let module = module_from(&node_source("summarizer", "SummarizerNode"), "summarizer");
    let descriptor = MetadataExtractor::new()
        .extract_from_module(&module, "summarizer")
        .unwrap();

    assert_eq!(descriptor.declared_id.as_deref(), Some("summarizer"));
    assert_eq!(descriptor.name, "Summarizer");
    assert_eq!(descriptor.description, "Summarizes incoming text.");
    assert_eq!(descriptor.category, "text");
    assert_eq!(descriptor.execution_mode, "streaming");
    assert_eq!(descriptor.color, "#52c41a");

    let text = &descriptor.inputs["text"];
    assert!(text.is_streaming);
    assert_eq!(text.schema, json!("string"));

    let summary = &descriptor.outputs["summary"];
    assert!(!summary.is_streaming);
    assert_eq!(summary.schema, json!({"text": "string", "tokens": "integer"}));

    assert_eq!(descriptor.config_params["model"].field_type, "string");
    let temperature = &descriptor.config_params["temperature"];
    assert_eq!(temperature.field_type, "float");
    assert_eq!(temperature.required, Some(false));
    assert_eq!(temperature.default, Some(json!(0.2)));
}

#[test]
fn test_defaults_for_missing_attributes() {
    let ty = PluginType::new("BareNode", "bare").with_base("Node");
    let descriptor = MetadataExtractor::new().extract(&ty);

    assert_eq!(descriptor.name, "BareNode");
    assert_eq!(descriptor.description, "");
    assert_eq!(descriptor.category, DEFAULT_CATEGORY);
    assert_eq!(descriptor.execution_mode, DEFAULT_EXECUTION_MODE);
    assert_eq!(descriptor.color, DEFAULT_COLOR);
    assert!(descriptor.inputs.is_empty());
    assert!(descriptor.outputs.is_empty());
    assert!(descriptor.config_params.is_empty());
}

#[test]
fn test_record_shaped_parameters() {
    let source = r#"
class RecordNode(Node):
    INPUT_PARAMS = {
        "camel": {"isStreaming": True, "schema": {"value": "number"}},
        "snake": {"is_streaming": True, "schema": "string", "description": "snake case"},
        "plain": {"schema": "bool"},
    }
"#;
    let module = module_from(source, "record");
    let descriptor = MetadataExtractor::new().extract(module.plugin_types()[0]);

    assert!(descriptor.inputs["camel"].is_streaming);
    assert_eq!(descriptor.inputs["camel"].schema, json!({"value": "number"}));
    assert!(descriptor.inputs["snake"].is_streaming);
    assert_eq!(descriptor.inputs["snake"].description, "snake case");
    assert!(!descriptor.inputs["plain"].is_streaming);
}

#[test]
fn test_parameter_decl_shapes_normalize_alike() {
    let typed = AttrValue::Call {
        callee: "ParameterSchema".to_string(),
        args: vec![],
        kwargs: vec![
            ("is_streaming".to_string(), AttrValue::Bool(true)),
            ("schema".to_string(), AttrValue::Str("string".to_string())),
        ],
    };
    let record = AttrValue::Dict(vec![
        ("isStreaming".to_string(), AttrValue::Bool(true)),
        ("schema".to_string(), AttrValue::Str("string".to_string())),
    ]);

    let typed = ParameterDecl::from_attr(&typed).unwrap();
    let record = ParameterDecl::from_attr(&record).unwrap();
    assert!(matches!(typed, ParameterDecl::Typed { .. }));
    assert!(matches!(record, ParameterDecl::Record(_)));
    assert_eq!(typed.normalize(), record.normalize());
}

#[test]
fn test_config_field_styles() {
    let simple = ConfigFieldDecl::from_attr(&AttrValue::Str("string".to_string()));
    assert_eq!(simple, ConfigFieldDecl::Simple("string".to_string()));

    let field_schema = AttrValue::Call {
        callee: "parameter.FieldSchema".to_string(),
        args: vec![AttrValue::Str("integer".to_string())],
        kwargs: vec![
            ("required".to_string(), AttrValue::Bool(true)),
            ("default".to_string(), AttrValue::Int(3)),
        ],
    };
    let field = ConfigFieldDecl::from_attr(&field_schema).normalize();
    assert_eq!(field.field_type, "integer");
    assert_eq!(field.required, Some(true));
    assert_eq!(field.default, Some(json!(3)));

    let unknown = ConfigFieldDecl::from_attr(&AttrValue::Name("SOMETHING".to_string())).normalize();
    assert_eq!(unknown.field_type, "any");
}

#[test]
fn test_legacy_config_schema_attribute() {
    let source = r#"
class LegacyNode(Node):
    CONFIG_SCHEMA = {"url": "string"}
"#;
    let module = module_from(source, "legacy");
    let descriptor = MetadataExtractor::new().extract(module.plugin_types()[0]);
    assert_eq!(descriptor.config_params["url"].field_type, "string");
}

#[test]
fn test_literal_expressions() {
    let source = r#"
DEFAULT_SCHEMA = {"type": "object"}

class LiteralNode(BaseNode, metaclass=Meta):
    '''Docstring with "quotes" and {braces}.'''
    COUNT = -3
    RATIO = 1.5e3
    HEX = 0xFF
    TAGS = ("a", "b",)
    SINGLE = ("only")
    EMPTY = {}
    SCHEMA = DEFAULT_SCHEMA
    TEXT = "joined " 'string'
    ANNOTATED: dict = {"k": None}
    RAW = r"C:\path"

    def helper(self):
        NOT_AN_ATTR = 1

class BaseNode(Node):
    pass
"#;
    let module = module_from(source, "literal");
    let ty = module.get_type("LiteralNode").unwrap();

    assert_eq!(ty.bases, vec!["BaseNode".to_string()]);
    assert_eq!(ty.attr("COUNT"), Some(&AttrValue::Int(-3)));
    assert_eq!(ty.attr("RATIO"), Some(&AttrValue::Float(1500.0)));
    assert_eq!(ty.attr("HEX"), Some(&AttrValue::Int(255)));
    assert_eq!(
        ty.attr("TAGS"),
        Some(&AttrValue::List(vec![AttrValue::from("a"), AttrValue::from("b")]))
    );
    assert_eq!(ty.attr("SINGLE"), Some(&AttrValue::from("only")));
    assert_eq!(ty.attr("EMPTY"), Some(&AttrValue::Dict(vec![])));
    assert_eq!(ty.attr("SCHEMA").map(AttrValue::to_json), Some(json!({"type": "object"})));
    assert_eq!(ty.attr("TEXT"), Some(&AttrValue::from("joined string")));
    assert_eq!(ty.attr("ANNOTATED").map(AttrValue::to_json), Some(json!({"k": null})));
    assert_eq!(ty.attr("RAW"), Some(&AttrValue::from(r"C:\path")));
    assert!(ty.attr("NOT_AN_ATTR").is_none());

    // derives from the contract through a base defined later in the module
    let names: Vec<&str> = module.plugin_types().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["LiteralNode", "BaseNode"]);
}

#[tokio::test]
async fn test_loader_reflects_current_file_contents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("changing.py");
    let loader = SourceModuleLoader::new();

    std::fs::write(&path, node_source("first", "FirstNode")).unwrap();
    let module = loader.load(&path).await.unwrap();
    assert_eq!(module.name, "changing");
    assert_eq!(module.plugin_types()[0].name, "FirstNode");

    std::fs::write(&path, node_source("second", "SecondNode")).unwrap();
    let module = loader.load(&path).await.unwrap();
    assert_eq!(module.plugin_types()[0].name, "SecondNode");
    assert_eq!(loader.cached("changing").await.unwrap().types, module.types);

    loader.invalidate("changing").await;
    assert!(loader.cached("changing").await.is_none());
}
