// crates/noderegistry/tests/service_test.rs

mod common;

use common::{bump_mtime, dir_entries, init_tracing, node_source};
use nodecore::{ParameterSpec, Registry, RegistryError, RegistryEvent};
use noderegistry::{CreateNodeRequest, NodeDefinitionService, RegistryConfig};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

fn service(dir: &TempDir) -> NodeDefinitionService {
    NodeDefinitionService::new(RegistryConfig::new(dir.path()))
}

fn request(node_id: &str, source_code: String) -> CreateNodeRequest {
    CreateNodeRequest {
        node_id: node_id.to_string(),
        source_code,
    }
}

fn persisted(dir: &TempDir) -> Registry {
    let bytes = std::fs::read(dir.path().join("registry.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_create_uses_declared_id() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let entry = service
        .create(request("foo", node_source("bar", "BarNode")))
        .await
        .unwrap();

    assert_eq!(entry.id, "bar");
    assert_eq!(entry.source_file, "bar.py");
    assert!(dir.path().join("bar.py").exists());
    assert!(!dir.path().join("foo.py").exists(), "Provisional file must not survive");
    assert!(persisted(&dir).contains("bar"));
    assert!(!persisted(&dir).contains("foo"));
}

#[tokio::test]
async fn test_create_duplicate_declared_id() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    service
        .create(request("first", node_source("dup", "FirstNode")))
        .await
        .unwrap();
    let result = service
        .create(request("second", node_source("dup", "SecondNode")))
        .await;

    assert!(
        matches!(result, Err(RegistryError::DuplicateId(ref id)) if id == "dup"),
        "Expected DuplicateId, got {:?}",
        result
    );
    assert_eq!(persisted(&dir).len(), 1);
    assert_eq!(dir_entries(dir.path()), vec!["dup.py", "registry.json"]);
}

#[tokio::test]
async fn test_create_requested_id_already_registered() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    service
        .create(request("same", node_source("same", "SameNode")))
        .await
        .unwrap();
    let result = service
        .create(request("same", node_source("other", "OtherNode")))
        .await;

    assert!(matches!(result, Err(RegistryError::DuplicateId(_))));
    assert!(!dir.path().join("other.py").exists());
}

#[tokio::test]
async fn test_create_rejects_invalid_id() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let result = service
        .create(request("bad id", node_source("x", "XNode")))
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidDefinition(_))));

    let result = service.create(request("", node_source("x", "XNode"))).await;
    assert!(matches!(result, Err(RegistryError::InvalidDefinition(_))));
}

#[tokio::test]
async fn test_create_without_plugin_type_cleans_up() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let result = service
        .create(request("helper", "def helper():\n    return 1\n".to_string()))
        .await;

    assert!(matches!(result, Err(RegistryError::Extraction(_))), "Got {:?}", result);
    assert!(!dir.path().join("helper.py").exists());
}

#[tokio::test]
async fn test_get_and_list_describe_nodes() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("summarizer", node_source("summarizer", "SummarizerNode")))
        .await
        .unwrap();

    let info = service.get("summarizer").await.unwrap();
    assert_eq!(info.id, "summarizer");
    assert_eq!(info.descriptor.name, "Summarizer");
    assert_eq!(info.descriptor.category, "text");
    assert!(info.descriptor.inputs["text"].is_streaming);
    assert_eq!(info.source_file, "summarizer.py");

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["id"], json!("summarizer"));
    assert_eq!(json["executionMode"], json!("streaming"));
    assert_eq!(json["inputs"]["text"]["isStreaming"], json!(true));

    let nodes = service.list().await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "summarizer");

    assert!(matches!(
        service.get("missing").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_get_code() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let code = node_source("coded", "CodedNode");
    service.create(request("coded", code.clone())).await.unwrap();

    assert_eq!(service.get_code("coded").await.unwrap(), code);
    assert!(matches!(
        service.get_code("nope").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_update_code_renames_on_new_id() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let mut events = service.subscribe_events();
    service
        .create(request("alpha", node_source("alpha", "AlphaNode")))
        .await
        .unwrap();

    let entry = service
        .update_code("alpha", &node_source("omega", "AlphaNode"))
        .await
        .unwrap();

    assert_eq!(entry.id, "omega");
    assert_eq!(entry.source_file, "omega.py");
    assert_eq!(dir_entries(dir.path()), vec!["omega.py", "registry.json"]);
    assert!(matches!(
        service.get("alpha").await,
        Err(RegistryError::NotFound(_))
    ));

    let mut saw_update = false;
    while let Ok(event) = events.try_recv() {
        if let RegistryEvent::NodeUpdated { id, previous_id, .. } = event {
            assert_eq!(id, "omega");
            assert_eq!(previous_id.as_deref(), Some("alpha"));
            saw_update = true;
        }
    }
    assert!(saw_update, "An update event should be emitted");
}

#[tokio::test]
async fn test_update_code_same_id_replaces_content() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("alpha", node_source("alpha", "AlphaNode")))
        .await
        .unwrap();

    let new_code = node_source("alpha", "RenamedClassNode");
    let entry = service.update_code("alpha", &new_code).await.unwrap();

    assert_eq!(entry.id, "alpha");
    assert_eq!(service.get_code("alpha").await.unwrap(), new_code);
    assert_eq!(dir_entries(dir.path()), vec!["alpha.py", "registry.json"]);
}

#[tokio::test]
async fn test_update_code_conflicts_leave_file_untouched() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let alpha_code = node_source("alpha", "AlphaNode");
    service.create(request("alpha", alpha_code.clone())).await.unwrap();
    service
        .create(request("beta", node_source("beta", "BetaNode")))
        .await
        .unwrap();
    std::fs::write(dir.path().join("gamma.py"), "# scratch\n").unwrap();

    let taken = service
        .update_code("alpha", &node_source("beta", "AlphaNode"))
        .await;
    assert!(matches!(taken, Err(RegistryError::DuplicateId(_))), "Got {:?}", taken);

    let blocked = service
        .update_code("alpha", &node_source("gamma", "AlphaNode"))
        .await;
    assert!(
        matches!(blocked, Err(RegistryError::RenameConflict { .. })),
        "Got {:?}",
        blocked
    );

    assert_eq!(service.get_code("alpha").await.unwrap(), alpha_code);
    assert_eq!(
        dir_entries(dir.path()),
        vec!["alpha.py", "beta.py", "gamma.py", "registry.json"],
        "No staged files may be left behind"
    );
}

#[tokio::test]
async fn test_update_parameters_preserves_code() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let code = r#"from stream_workflow.core import Node, ParameterSchema, register_node


@register_node('templater')
class TemplaterNode(Node):
    INPUT_PARAMS = {
        "text": ParameterSchema(
            is_streaming=False,
            schema={"value": "{not a real brace}"}
        )
    }
    OUTPUT_PARAMS = {}

    async def run(self, context):
        # keep this comment { exactly
        return {"out": "}" + context.get_input("text")}
"#;
    service.create(request("templater", code.to_string())).await.unwrap();

    let mut inputs = BTreeMap::new();
    inputs.insert("text".to_string(), ParameterSpec::new(true, json!("string")));
    let mut outputs = BTreeMap::new();
    outputs.insert("out".to_string(), ParameterSpec::new(false, json!("string")));

    service
        .update_parameters("templater", &inputs, &outputs)
        .await
        .unwrap();

    let updated = service.get_code("templater").await.unwrap();
    let tail = &code[code.find("\n\n    async def run").unwrap()..];
    assert!(updated.ends_with(tail), "Trailing code must be preserved byte-for-byte");
    assert!(!updated.contains("not a real brace"));

    let info = service.get("templater").await.unwrap();
    assert!(info.descriptor.inputs["text"].is_streaming);
    assert_eq!(info.descriptor.outputs["out"].schema, json!("string"));

    let nodes = service.rescan().await.unwrap();
    assert!(!nodes.changed, "Recorded mtime must match the rewritten file");
}

#[tokio::test]
async fn test_update_parameters_errors() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let code = "from stream_workflow.core import Node, register_node\n\n\
                @register_node('no_outputs')\n\
                class NoOutputs(Node):\n    INPUT_PARAMS = {}\n";
    service.create(request("no_outputs", code.to_string())).await.unwrap();

    let mut bad = BTreeMap::new();
    bad.insert("1bad".to_string(), ParameterSpec::default());
    let result = service
        .update_parameters("no_outputs", &bad, &BTreeMap::new())
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidDefinition(_))));

    let result = service
        .update_parameters("no_outputs", &BTreeMap::new(), &BTreeMap::new())
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidDefinition(_))));
    assert_eq!(service.get_code("no_outputs").await.unwrap(), code);

    let result = service
        .update_parameters("ghost", &BTreeMap::new(), &BTreeMap::new())
        .await;
    assert!(matches!(result, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn test_delete() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("doomed", node_source("doomed", "DoomedNode")))
        .await
        .unwrap();

    assert!(matches!(
        service.delete("missing").await,
        Err(RegistryError::NotFound(_))
    ));

    service.delete("doomed").await.unwrap();
    assert!(!dir.path().join("doomed.py").exists());
    assert!(service.list().await.unwrap().is_empty());
    assert!(persisted(&dir).is_empty());
}

#[tokio::test]
async fn test_external_edit_detected_on_list() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("alpha", node_source("alpha", "AlphaNode")))
        .await
        .unwrap();
    service
        .create(request("beta", node_source("beta", "BetaNode")))
        .await
        .unwrap();

    // rename through an edit
    let alpha = dir.path().join("alpha.py");
    std::fs::write(&alpha, node_source("delta", "AlphaNode")).unwrap();
    bump_mtime(&alpha, 5);
    let ids: Vec<String> = service.list().await.unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["delta", "beta"]);
    assert!(dir.path().join("delta.py").exists());

    // collision keeps the old id
    let delta = dir.path().join("delta.py");
    std::fs::write(&delta, node_source("beta", "AlphaNode")).unwrap();
    bump_mtime(&delta, 10);
    let ids: Vec<String> = service.list().await.unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["delta", "beta"]);
    assert!(delta.exists());
}

#[tokio::test]
async fn test_externally_added_file_and_corrupt_registry() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    std::fs::write(dir.path().join("dropped.py"), node_source("dropped", "DroppedNode")).unwrap();

    let nodes = service.list().await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(persisted(&dir).contains("dropped"));

    std::fs::write(dir.path().join("registry.json"), "{ not json").unwrap();
    let nodes = service.list().await.unwrap();
    assert_eq!(nodes.len(), 1, "A corrupt registry triggers a full rescan");
    assert!(persisted(&dir).contains("dropped"));
}

#[tokio::test]
async fn test_rescan_reports_conflicts() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("alpha", node_source("alpha", "AlphaNode")))
        .await
        .unwrap();
    std::fs::write(dir.path().join("alpha_copy.py"), node_source("alpha", "CopyNode")).unwrap();

    let outcome = service.rescan().await.unwrap();
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].source_file, "alpha_copy.py");
}

#[tokio::test]
async fn test_plugin_table_reloads_after_mutations() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service(&dir));

    assert!(service.loaded_plugin("loaded").await.unwrap().is_none());

    service
        .create(request("loaded", node_source("loaded", "LoadedNode")))
        .await
        .unwrap();
    let plugin = service.loaded_plugin("loaded").await.unwrap().unwrap();
    assert_eq!(plugin.name, "LoadedNode");

    service.delete("loaded").await.unwrap();
    assert!(service.loaded_plugin("loaded").await.unwrap().is_none());
    assert_eq!(service.plugins().len().await, 0);
}

#[tokio::test]
async fn test_concurrent_reads() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service(&dir));
    for i in 0..3 {
        let id = format!("node_{}", i);
        service
            .create(request(&id, node_source(&id, "ConcurrentNode")))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.list().await.unwrap().len() }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 3);
    }
}

#[tokio::test]
async fn test_rescan_stable_with_subsecond_mtime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("alpha.py");
    std::fs::write(&path, node_source("alpha", "AlphaNode")).unwrap();
    let file = File::options().write(true).open(&path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::new(1700000042, 926614566))
        .unwrap();
    drop(file);

    let service = service(&dir);
    let first = service.rescan().await.unwrap();
    assert!(first.changed);
    let updated_at = persisted(&dir).get("alpha").unwrap().updated_at;

    for _ in 0..2 {
        let again = service.rescan().await.unwrap();
        assert!(!again.changed, "An unchanged file must not be reported as modified");
    }
    assert_eq!(persisted(&dir).get("alpha").unwrap().updated_at, updated_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_with_same_declared_id() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let service = Arc::new(service(&dir));

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let requested = format!("request_{}", i);
            service
                .create(request(&requested, node_source("dup", "DupNode")))
                .await
        }));
    }

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(entry) => {
                assert_eq!(entry.id, "dup");
                created += 1;
            }
            Err(RegistryError::DuplicateId(id)) => {
                assert_eq!(id, "dup");
                duplicates += 1;
            }
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }

    assert_eq!(created, 1, "Exactly one create must win");
    assert_eq!(duplicates, 7);
    assert_eq!(dir_entries(dir.path()), vec!["dup.py", "registry.json"]);
    assert_eq!(service.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalidate_plugins_picks_up_external_files() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service
        .create(request("loaded", node_source("loaded", "LoadedNode")))
        .await
        .unwrap();
    assert!(service.loaded_plugin("loaded").await.unwrap().is_some());

    std::fs::write(dir.path().join("outside.py"), node_source("outside", "OutsideNode")).unwrap();
    assert!(
        service.loaded_plugin("outside").await.unwrap().is_none(),
        "The loaded table is not patched behind the service's back"
    );

    service.invalidate_plugins().await;
    assert!(!service.plugins().is_loaded().await);

    let plugin = service.loaded_plugin("outside").await.unwrap().unwrap();
    assert_eq!(plugin.name, "OutsideNode");
    assert_eq!(service.plugins().len().await, 2);
}
