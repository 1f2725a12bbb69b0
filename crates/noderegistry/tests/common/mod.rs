// crates/noderegistry/tests/common/mod.rs

#![allow(dead_code)]

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// A complete plugin definition registered as `declared_id`
pub fn node_source(declared_id: &str, class_name: &str) -> String {
    format!(
        r##"from stream_workflow.core import Node, ParameterSchema, register_node


@register_node('{declared_id}')
class {class_name}(Node):
    """Summarizes incoming text."""

    NAME = "Summarizer"
    CATEGORY = "text"
    EXECUTION_MODE = "streaming"
    COLOR = "#52c41a"

    INPUT_PARAMS = {{
        "text": ParameterSchema(
            is_streaming=True,
            schema="string"
        )
    }}

    OUTPUT_PARAMS = {{
        "summary": ParameterSchema(
            is_streaming=False,
            schema={{"text": "string", "tokens": "integer"}}
        )
    }}

    CONFIG_PARAMS = {{
        "model": "string",
        "temperature": {{"type": "float", "required": False, "default": 0.2}},
    }}

    async def run(self, context):
        text = context.get_input("text")
        return {{"summary": text[:100]}}
"##
    )
}

/// A plugin definition without a registration marker
pub fn unmarked_source(class_name: &str) -> String {
    format!(
        r#"from stream_workflow.core import Node


class {class_name}(Node):
    INPUT_PARAMS = {{}}
    OUTPUT_PARAMS = {{}}

    async def run(self, context):
        return {{}}
"#
    )
}

/// Move the modification time of `path` into the future so a rescan sees
/// the file as changed regardless of timestamp granularity.
pub fn bump_mtime(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

/// Names of all entries in `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
