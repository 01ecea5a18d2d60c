// crates/packruntime/tests/scheduler_test.rs

use async_trait::async_trait;
use packcore::payload::{ChangedColumnSelection, TableSelection};
use packcore::{
    ExecutionEvent, Graph, InMemorySchemaRegistry, MemoryArchiveStore, NodeContext, NodeError,
    NodeExecutor, NodeKind, NodeOutput, NodeSpec, Payload, RunOptions, Services, TableData,
};
use packruntime::{ExecutorRegistry, GraphRuntime, RuntimeConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Behavior {
    Emit(Payload),
    /// Primary and `else` outputs.
    Split(Payload, Payload),
    Echo,
    Fail,
    Panic,
    CountInputs,
    Counter,
    /// Two draws with a pause in between.
    SlowCounter,
}

struct StubExecutor {
    kind: NodeKind,
    behavior: Behavior,
}

#[async_trait]
impl NodeExecutor for StubExecutor {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        match &self.behavior {
            Behavior::Emit(p) => Ok(NodeOutput::with_primary(p.clone())),
            Behavior::Split(a, b) => Ok(NodeOutput::with_primary(a.clone()).with_else(b.clone())),
            Behavior::Echo => Ok(NodeOutput::with_primary(ctx.input.single()?.clone())),
            Behavior::Fail => Err(NodeError::ExecutionFailed("stub failure".to_string())),
            Behavior::Panic => panic!("stub panic"),
            Behavior::CountInputs => Ok(NodeOutput::with_primary(changes())
                .with_metadata("inputs", ctx.input.payloads().len())),
            Behavior::Counter => {
                let next = ctx.counters.lock().await.next("ids", 1);
                Ok(NodeOutput::with_primary(tables("ids")).with_metadata("next", next))
            }
            Behavior::SlowCounter => {
                let first = ctx.counters.lock().await.next("ids", 1);
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                let second = ctx.counters.lock().await.next("ids", 1);
                Ok(NodeOutput::with_primary(tables("ids"))
                    .with_metadata("first", first)
                    .with_metadata("second", second))
            }
        }
    }
}

fn tables(name: &str) -> Payload {
    Payload::TableSelection(TableSelection::new(vec![TableData::new(name, vec![])], vec![]))
}

fn changes() -> Payload {
    Payload::ChangedColumnSelection(ChangedColumnSelection::default())
}

fn table_name(payload: &Payload) -> &str {
    match payload {
        Payload::TableSelection(t) => &t.tables[0].name,
        _ => panic!("expected a table selection"),
    }
}

// Helper function to create a runtime over stub executors
/// Initialize tracing for tests
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn create_test_runtime(stubs: Vec<(NodeKind, Behavior)>) -> GraphRuntime {
    init_tracing();
    let mut registry = ExecutorRegistry::new();
    for (kind, behavior) in stubs {
        registry.register(Arc::new(StubExecutor { kind, behavior }));
    }
    let services = Services::new(
        Arc::new(MemoryArchiveStore::new()),
        Arc::new(InMemorySchemaRegistry::new()),
    );
    GraphRuntime::with_registry(Arc::new(registry), services, RuntimeConfig::default())
}

#[tokio::test]
async fn test_pure_cycle_executes_nothing() {
    let runtime = create_test_runtime(vec![(NodeKind::Filter, Behavior::Echo)]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::Filter));
    graph.add_node(NodeSpec::new("b", NodeKind::Filter));
    graph.connect("a", "b");
    graph.connect("b", "a");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    assert!(!report.success);
    assert_eq!(report.total_executed, 0);
    assert!(report.error.unwrap().contains("no starting nodes"));
    assert_eq!(report.skipped.len(), 2);
}

#[tokio::test]
async fn test_cycle_behind_a_source_is_rejected() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("units"))),
        (NodeKind::Filter, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("src", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("a", NodeKind::Filter));
    graph.add_node(NodeSpec::new("b", NodeKind::Filter));
    graph.connect("src", "a");
    graph.connect("a", "b");
    graph.connect("b", "a");

    let options = RunOptions {
        validate_ports: false,
        ..Default::default()
    };
    let report = runtime.execute(&graph, options).await;

    assert_eq!(report.total_executed, 0);
    let error = report.error.unwrap();
    assert!(error.contains("cycle"), "unexpected error: {}", error);
    assert!(error.contains("a, b"));
}

#[tokio::test]
async fn test_failed_node_skips_dependents_only() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("units"))),
        (NodeKind::Filter, Behavior::Fail),
        (NodeKind::ColumnSelection, Behavior::Echo),
        (NodeKind::GroupBy, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("src", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("filter", NodeKind::Filter));
    graph.add_node(NodeSpec::new("after_filter", NodeKind::GroupBy));
    graph.add_node(NodeSpec::new("group", NodeKind::GroupBy));
    graph.connect("src", "filter");
    graph.connect("filter", "after_filter");
    graph.connect("src", "group");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    assert!(report.success);
    assert_eq!(report.total_executed, 3);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.skipped, vec!["after_filter".to_string()]);
    let failed = report.node("filter").unwrap();
    assert!(!failed.success);
    assert!(failed.error.as_ref().unwrap().contains("stub failure"));
    assert_eq!(table_name(report.node("group").unwrap().data.as_ref().unwrap()), "units");
}

#[tokio::test]
async fn test_merge_with_failed_upstream_gets_one_element() {
    let runtime = create_test_runtime(vec![
        (NodeKind::NumericAdjustment, Behavior::Emit(changes())),
        (NodeKind::ClampMin, Behavior::Fail),
        (NodeKind::MergeChanges, Behavior::CountInputs),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("ok", NodeKind::NumericAdjustment));
    graph.add_node(NodeSpec::new("bad", NodeKind::ClampMin));
    graph.add_node(NodeSpec::new("merge", NodeKind::MergeChanges));
    graph.connect("ok", "merge");
    graph.connect("bad", "merge");

    let options = RunOptions {
        validate_ports: false,
        ..Default::default()
    };
    let report = runtime.execute(&graph, options).await;

    let merge = report.node("merge").expect("merge should run");
    assert!(merge.success);
    assert_eq!(merge.metadata["inputs"], 1);
}

#[tokio::test]
async fn test_panicking_executor_fails_its_node() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("units"))),
        (NodeKind::Filter, Behavior::Panic),
        (NodeKind::GroupBy, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("src", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("boom", NodeKind::Filter));
    graph.add_node(NodeSpec::new("group", NodeKind::GroupBy));
    graph.connect("src", "boom");
    graph.connect("src", "group");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    let boom = report.node("boom").unwrap();
    assert!(!boom.success);
    assert!(boom.error.as_ref().unwrap().contains("stub panic"));
    assert!(report.node("group").unwrap().success);
}

#[tokio::test]
async fn test_else_handle_routes_secondary_output() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("units"))),
        (NodeKind::Filter, Behavior::Split(tables("matched"), tables("rest"))),
        (NodeKind::GroupBy, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("src", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("filter", NodeKind::Filter));
    graph.add_node(NodeSpec::new("on_match", NodeKind::GroupBy));
    graph.add_node(NodeSpec::new("on_else", NodeKind::GroupBy));
    graph.connect("src", "filter");
    graph.connect("filter", "on_match");
    graph.connect("filter", "on_else").from_handle("else");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    assert_eq!(table_name(report.node("on_match").unwrap().data.as_ref().unwrap()), "matched");
    assert_eq!(table_name(report.node("on_else").unwrap().data.as_ref().unwrap()), "rest");
}

#[tokio::test]
async fn test_unexposed_source_handle_delivers_nothing() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("units"))),
        (NodeKind::GenerateRows, Behavior::Emit(tables("union"))),
        (NodeKind::GroupBy, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("src", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("gen", NodeKind::GenerateRows));
    graph.add_node(NodeSpec::new("next", NodeKind::GroupBy));
    graph.connect("src", "gen");
    graph.connect("gen", "next").from_handle("output3");

    // Validation passes: `output3` is a row generation handle.
    let report = runtime.execute(&graph, RunOptions::default()).await;
    let next = report.node("next").unwrap();
    assert!(!next.success);
    assert!(next.data.is_none());

    graph.connections[1].source_handle = Some("elze".to_string());
    let report = runtime.execute(&graph, RunOptions::default()).await;
    assert_eq!(report.total_executed, 0);
    assert!(report.error.unwrap().contains("no output handle 'elze'"));

    let options = RunOptions {
        validate_ports: false,
        ..Default::default()
    };
    let report = runtime.execute(&graph, options).await;
    assert!(!report.node("next").unwrap().success);
}

#[tokio::test]
async fn test_single_input_kind_rejects_second_connection() {
    let runtime = create_test_runtime(vec![
        (NodeKind::TableSelection, Behavior::Emit(tables("first"))),
        (NodeKind::CustomRowsInput, Behavior::Emit(tables("second"))),
        (NodeKind::GroupBy, Behavior::Echo),
    ]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::TableSelection));
    graph.add_node(NodeSpec::new("b", NodeKind::CustomRowsInput));
    graph.add_node(NodeSpec::new("group", NodeKind::GroupBy));
    graph.connect("a", "group");
    graph.connect("b", "group");

    let report = runtime.execute(&graph, RunOptions::default()).await;
    assert_eq!(report.total_executed, 0);
    assert!(report.error.unwrap().contains("accepts a single input"));

    // Without validation the most recently executed source wins.
    let options = RunOptions {
        validate_ports: false,
        ..Default::default()
    };
    let report = runtime.execute(&graph, options).await;
    let group = report.node("group").unwrap();
    assert_eq!(table_name(group.data.as_ref().unwrap()), "second");
}

#[tokio::test]
async fn test_counters_reset_unless_continued() {
    let runtime = create_test_runtime(vec![(NodeKind::GenerateRows, Behavior::Counter)]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("ids", NodeKind::GenerateRows));

    let first = runtime.execute(&graph, RunOptions::default()).await;
    let second = runtime.execute(&graph, RunOptions::default()).await;
    assert_eq!(first.node("ids").unwrap().metadata["next"], 1);
    assert_eq!(second.node("ids").unwrap().metadata["next"], 1);

    let continued = RunOptions {
        reset_counters: false,
        ..Default::default()
    };
    let third = runtime.execute(&graph, continued).await;
    assert_eq!(third.node("ids").unwrap().metadata["next"], 2);
}

#[tokio::test]
async fn test_concurrent_reset_does_not_rewind_a_running_sequence() {
    let runtime = create_test_runtime(vec![(NodeKind::GenerateRows, Behavior::SlowCounter)]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("ids", NodeKind::GenerateRows));
    runtime.execute(&graph, RunOptions::default()).await;

    let continued = RunOptions {
        reset_counters: false,
        ..Default::default()
    };
    let (a, b) = tokio::join!(
        runtime.execute(&graph, continued),
        runtime.execute(&graph, RunOptions::default())
    );

    for report in [&a, &b] {
        let ids = report.node("ids").unwrap();
        let first = ids.metadata["first"].as_i64().unwrap();
        assert_eq!(ids.metadata["second"].as_i64().unwrap(), first + 1);
    }
    assert!(!runtime.counters().lock().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_run_stops_between_nodes() {
    let runtime = create_test_runtime(vec![(NodeKind::TableSelection, Behavior::Emit(tables("units")))]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::TableSelection));

    let token = CancellationToken::new();
    token.cancel();
    let report = runtime
        .execute_with_cancellation(&graph, RunOptions::default(), token)
        .await;

    assert_eq!(report.total_executed, 0);
    assert_eq!(report.error.as_deref(), Some("Run cancelled"));
    assert_eq!(report.skipped, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_missing_executor_is_a_node_failure() {
    let runtime = create_test_runtime(vec![]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::PackFiles));

    let report = runtime.execute(&graph, RunOptions::default()).await;
    assert!(!report.success);
    assert_eq!(report.failure_count, 1);
    assert!(report.node("a").unwrap().error.as_ref().unwrap().contains("No executor"));
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let runtime = create_test_runtime(vec![(NodeKind::TableSelection, Behavior::Emit(tables("units")))]);
    let mut events = runtime.subscribe_events();
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::TableSelection));

    let report = runtime.execute(&graph, RunOptions::default()).await;
    assert!(report.success);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            ExecutionEvent::RunStarted { .. } => "run_started",
            ExecutionEvent::NodeStarted { .. } => "node_started",
            ExecutionEvent::NodeCompleted { .. } => "node_completed",
            ExecutionEvent::RunCompleted { .. } => "run_completed",
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["run_started", "node_started", "node_completed", "run_completed"]);
}

#[tokio::test]
async fn test_registered_graphs_execute_by_id() {
    let runtime = create_test_runtime(vec![(NodeKind::TableSelection, Behavior::Emit(tables("units")))]);
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("a", NodeKind::TableSelection));

    let id = runtime.register_graph(packcore::GraphDocument::new(graph)).await;
    assert_eq!(runtime.list_graphs().await.len(), 1);
    let report = runtime.execute_registered(id).await.unwrap();
    assert!(report.success);

    runtime.remove_graph(id).await;
    assert!(runtime.execute_registered(id).await.is_err());
}
