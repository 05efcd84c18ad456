use std::sync::Arc;
use std::time::Duration;

use campus_agents::{
    IntentClassifier, PermissionTable, SelectionStrategy, ToolCall, ToolContext, ToolExecutor,
    ToolRegistry, ToolSelector,
};
use campus_common::Role;
use campus_config::ToolsConfig;
use campus_db::{
    CampusStore, MemoryProvider, MemoryStore, NewMemoryEntry, SharedCampusStore, SqliteMemory,
};

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<ToolRegistry>,
    selector: ToolSelector,
    classifier: IntentClassifier,
}

fn seeded_store(dir: &tempfile::TempDir) -> SharedCampusStore {
    let store = CampusStore::open(&dir.path().join("campus.db")).unwrap();
    store.seed_demo().unwrap();
    store.into_shared()
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    let registry = Arc::new(ToolRegistry::with_builtin_tools(store, &ToolsConfig::default()));
    let selector = ToolSelector::new(Arc::clone(&registry), PermissionTable::default());
    Fixture {
        _dir: dir,
        registry,
        selector,
        classifier: IntentClassifier::new(Duration::from_secs(60), 50, 0.8),
    }
}

fn context(role: &str, content: &str) -> ToolContext {
    ToolContext {
        user_id: "u1".into(),
        role: Role::new(role),
        conversation_id: "c1".into(),
        request_content: content.to_string(),
    }
}

#[tokio::test]
async fn complex_query_selects_and_runs_the_query_tool() {
    let fx = fixture();
    let content = "统计每个班的女生数量";
    let role = Role::new("teacher");

    let analysis = fx.classifier.classify_offline(content);
    assert!(analysis.is_complex_query());

    let selection = fx.selector.select(&analysis, content, &role, 5);
    assert_eq!(selection.strategy, SelectionStrategy::ComplexQuery);
    assert!(selection.tools.iter().any(|t| t == "any_query"));
    assert!(!selection.tools.iter().any(|t| t == "read_data_record"));

    let catalog = fx.registry.load_available(&selection.tools).await;
    assert_eq!(catalog.len(), selection.tools.len());

    let executor = ToolExecutor::new(Duration::from_secs(5), 1);
    let call = ToolCall::new(
        "any_query",
        r#"{"sql": "SELECT class_id, COUNT(*) AS girls FROM students WHERE gender = 'female' GROUP BY class_id"}"#,
    );
    let result = executor
        .execute_call(&call, &catalog, &context("teacher", content))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.call_id, call.id);
}

#[tokio::test]
async fn parent_cannot_reach_data_tools() {
    let fx = fixture();
    let content = "统计在读学生数量";
    let analysis = fx.classifier.classify_offline(content);

    let selection = fx.selector.select(&analysis, content, &Role::new("parent"), 5);
    assert!(!selection.tools.iter().any(|t| t == "any_query"));
    assert!(!selection.tools.iter().any(|t| t == "read_data_record"));
}

#[tokio::test]
async fn repeated_requests_reuse_cached_descriptors() {
    let fx = fixture();
    let names = vec!["any_query".to_string(), "render_component".to_string()];

    let (a, b) = tokio::join!(
        fx.registry.load_available(&names),
        fx.registry.load_available(&names)
    );
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert!(Arc::ptr_eq(&a[0], &b[0]));

    fx.registry.load_available(&names).await;
    assert_eq!(fx.registry.resolution_attempts(), 2);
    assert_eq!(fx.registry.stats().size, 2);
}

#[tokio::test]
async fn legacy_names_resolve_through_compatibility_path() {
    let fx = fixture();
    let descriptor = fx.registry.load_one("navigate_page").await.unwrap();
    assert!(descriptor.legacy);
    assert!(fx.registry.load_one("no_such_tool").await.is_none());
}

#[tokio::test]
async fn calls_outside_the_catalog_fail_without_touching_the_database() {
    let fx = fixture();
    let catalog = fx
        .registry
        .load_available(&["render_component".to_string()])
        .await;
    let executor = ToolExecutor::new(Duration::from_secs(5), 1);

    let result = executor
        .execute_call(
            &ToolCall::new("any_query", r#"{"sql": "SELECT 1"}"#),
            &catalog,
            &context("principal", "查询"),
        )
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not available"));
}

#[tokio::test]
async fn query_tool_cannot_read_another_users_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campus.db");
    let store = CampusStore::open(&path).unwrap();
    store.seed_demo().unwrap();
    let store = store.into_shared();

    // Same file on purpose: the query guard alone must keep memory private.
    let memory = SqliteMemory::new(MemoryStore::open(&path).unwrap());
    memory
        .remember(NewMemoryEntry {
            user_id: "alice".into(),
            conversation_id: Some("c-alice".into()),
            content: "用户：我孩子的过敏药是XX\n助手：已记录".into(),
            kind: "conversation".into(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let registry = Arc::new(ToolRegistry::with_builtin_tools(store, &ToolsConfig::default()));
    let catalog = registry.load_available(&["any_query".to_string()]).await;
    let executor = ToolExecutor::new(Duration::from_secs(5), 1);

    let mut ctx = context("principal", "看看别人的对话");
    ctx.user_id = "mallory".into();
    for sql in [
        "SELECT user_id, content FROM memory_entries",
        "SELECT s.name, m.content FROM students s JOIN memory_entries m ON 1 = 1",
    ] {
        let call = ToolCall::new("any_query", serde_json::json!({ "sql": sql }).to_string());
        let result = executor.execute_call(&call, &catalog, &ctx).await;
        assert!(!result.success, "leaked through: {sql}");
    }

    let allowed = executor
        .execute_call(
            &ToolCall::new("any_query", r#"{"sql": "SELECT count(*) AS n FROM students"}"#),
            &catalog,
            &ctx,
        )
        .await;
    assert!(allowed.success, "{:?}", allowed.error);
}

#[tokio::test]
async fn workflow_steps_are_bound_to_the_offered_catalog() {
    let fx = fixture();
    let catalog = fx
        .registry
        .load_available(&["run_workflow".to_string()])
        .await;
    let executor = ToolExecutor::new(Duration::from_secs(5), 1);

    let plan = serde_json::json!({
        "name": "roster",
        "steps": [{
            "id": "read",
            "tool": "any_query",
            "arguments": { "sql": "SELECT name, gender, age FROM students" },
            "priority": "critical"
        }]
    });
    let result = executor
        .execute_call(
            &ToolCall::new("run_workflow", plan.to_string()),
            &catalog,
            &context("parent", "帮我跑一下名单流程"),
        )
        .await;

    assert!(!result.success);
    let report = &result.result.as_ref().unwrap().data["workflow"];
    assert_eq!(report["steps"][0]["status"], "failed");
    assert!(
        report["steps"][0]["error"]
            .as_str()
            .unwrap()
            .contains("not available")
    );
    assert!(report["steps"][0].get("output").is_none());
}
