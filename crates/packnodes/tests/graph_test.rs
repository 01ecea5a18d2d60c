// crates/packnodes/tests/graph_test.rs

use packcore::{
    Archive, DecodedTable, EntryData, Graph, GraphDocument, InMemorySchemaRegistry,
    MemoryArchiveStore, NodeKind, NodeSpec, Payload, Row, RunOptions, Services, Value,
};
use packruntime::{GraphRuntime, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;

fn unit_row(key: &str, faction: &str, cost: i64) -> Row {
    let mut row = Row::new();
    row.insert("key".into(), Value::from(key));
    row.insert("faction".into(), Value::from(faction));
    row.insert("cost".into(), Value::Integer(cost));
    row
}

fn mod_archive() -> Archive {
    let units = DecodedTable {
        version: Some(1),
        columns: vec!["key".into(), "faction".into(), "cost".into()],
        rows: vec![
            unit_row("spear", "emp", 400),
            unit_row("sword", "emp", 550),
            unit_row("bow", "brt", 350),
        ],
    };
    let mut faction = Row::new();
    faction.insert("key".into(), Value::from("emp"));
    faction.insert("name".into(), Value::from("Empire"));
    let factions = DecodedTable {
        version: None,
        columns: vec!["key".into(), "name".into()],
        rows: vec![faction],
    };
    Archive::new("my_mod.pack")
        .with_entry("db/units_tables/data__", EntryData::Table(units))
        .with_entry("db/factions_tables/data__", EntryData::Table(factions))
}

// Helper function to create a runtime with every executor over one mod archive
async fn create_test_runtime() -> (GraphRuntime, Arc<MemoryArchiveStore>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(MemoryArchiveStore::new());
    store.insert(mod_archive()).await;
    let services = Services::new(store.clone(), Arc::new(InMemorySchemaRegistry::new()));
    let runtime = GraphRuntime::with_registry(
        Arc::new(packnodes::default_registry()),
        services,
        RuntimeConfig::default(),
    );
    (runtime, store)
}

fn source_nodes(graph: &mut Graph, table: &str) {
    graph.add_node(NodeSpec::new("pack", NodeKind::PackFiles).with_config("files", json!(["my_mod.pack"])));
    graph.add_node(NodeSpec::new("table", NodeKind::TableSelection).with_config("tables", json!([table])));
    graph.connect("pack", "table");
}

#[test]
fn test_every_kind_has_an_executor() {
    let registry = packnodes::default_registry();
    assert!(registry.missing_kinds().is_empty());
    assert_eq!(registry.list_node_kinds().len(), NodeKind::ALL.len());
}

#[tokio::test]
async fn test_two_saves_share_one_output_archive() {
    let (runtime, store) = create_test_runtime().await;
    let mut graph = Graph::new();
    source_nodes(&mut graph, "units_tables");
    graph.add_node(NodeSpec::new("filter", NodeKind::Filter).with_configuration(json!({
        "column": "faction", "value": "emp"
    })));
    graph.add_node(NodeSpec::new("save_match", NodeKind::SaveChanges).with_config("tableFileName", "empire"));
    graph.add_node(NodeSpec::new("save_else", NodeKind::SaveChanges).with_config("tableFileName", "others"));
    graph.connect("table", "filter");
    graph.connect("filter", "save_match");
    graph.connect("filter", "save_else").from_handle("else");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    assert_eq!(report.success_count, 5, "{}", report.summary());
    let path = format!("packflow_{}.pack", report.execution_id.simple());
    let archive = store.get(&path).await.expect("output archive written");
    let rows = |name: &str| match &archive.entry(name).unwrap().data {
        EntryData::Table(t) => t.rows.len(),
        _ => panic!("not a table"),
    };
    assert_eq!(rows("db/units_tables/empire"), 2);
    assert_eq!(rows("db/units_tables/others"), 1);
}

#[tokio::test]
async fn test_lookup_through_index_table_handles() {
    let (runtime, _) = create_test_runtime().await;
    let mut graph = Graph::new();
    source_nodes(&mut graph, "units_tables");
    graph.add_node(
        NodeSpec::new("factions", NodeKind::TableSelection).with_config("tables", json!(["factions_tables"])),
    );
    graph.add_node(NodeSpec::new("index", NodeKind::IndexTable).with_config("columns", json!(["key"])));
    graph.add_node(NodeSpec::new("lookup", NodeKind::Lookup).with_configuration(json!({
        "joinType": "inner", "sourceColumns": ["faction"]
    })));
    graph.connect("pack", "factions");
    graph.connect("factions", "index");
    graph.connect("table", "lookup").to_handle("source");
    graph.connect("index", "lookup").to_handle("index");

    let report = runtime.execute(&graph, RunOptions::default()).await;

    let lookup = report.node("lookup").expect("lookup ran");
    assert!(lookup.success, "{:?}", lookup.error);
    let Some(Payload::TableSelection(joined)) = &lookup.data else {
        panic!("expected joined tables");
    };
    assert_eq!(joined.row_count(), 2);
    assert!(joined
        .all_rows()
        .all(|r| r["factions_tables_name"] == Value::from("Empire")));
}

#[tokio::test]
async fn test_merged_changes_are_saved() {
    let (runtime, store) = create_test_runtime().await;
    let mut graph = Graph::new();
    source_nodes(&mut graph, "units_tables");
    graph.add_node(NodeSpec::new("cost", NodeKind::ColumnSelection).with_config("columns", json!(["cost"])));
    graph.add_node(NodeSpec::new("double", NodeKind::NumericAdjustment).with_config("expression", "value * 2"));
    graph.add_node(NodeSpec::new("floor", NodeKind::ClampMin).with_config("min", 1000));
    graph.add_node(NodeSpec::new("merge", NodeKind::MergeChanges));
    graph.add_node(NodeSpec::new("save", NodeKind::SaveChanges));
    graph.connect("table", "cost");
    graph.connect("cost", "double");
    graph.connect("double", "floor");
    graph.connect("double", "merge");
    graph.connect("floor", "merge");
    graph.connect("merge", "save");

    let options = RunOptions {
        output_archive: Some("out.pack".into()),
        ..Default::default()
    };
    let report = runtime.execute(&graph, options).await;
    assert_eq!(report.failure_count, 0, "{}", report.summary());

    let archive = store.get("out.pack").await.unwrap();
    let EntryData::Table(units) = &archive.entry("db/units_tables/data__").unwrap().data else {
        panic!("table expected");
    };
    // The clamped change arrives last and wins.
    let costs: Vec<&Value> = units.rows.iter().map(|r| &r["cost"]).collect();
    assert_eq!(costs, vec![&Value::Integer(1000), &Value::Integer(1100), &Value::Integer(1000)]);
}

#[tokio::test]
async fn test_counter_sequences_across_runs() {
    let (runtime, _) = create_test_runtime().await;
    let mut graph = Graph::new();
    source_nodes(&mut graph, "units_tables");
    graph.add_node(NodeSpec::new("rows", NodeKind::GenerateRows).with_configuration(json!({
        "transformations": [{ "type": "counter", "start": 100, "outputName": "id" }]
    })));
    graph.connect("table", "rows");

    let ids = |report: &packruntime::ExecutionReport| -> Vec<Value> {
        match &report.node("rows").unwrap().data {
            Some(Payload::TableSelection(t)) => t.all_rows().map(|r| r["id"].clone()).collect(),
            _ => panic!("rows failed"),
        }
    };

    let first = runtime.execute(&graph, RunOptions::default()).await;
    let again = runtime.execute(&graph, RunOptions::default()).await;
    assert_eq!(ids(&first), ids(&again));
    assert_eq!(ids(&first), vec![Value::Integer(100), Value::Integer(101), Value::Integer(102)]);

    let continued = runtime
        .execute(
            &graph,
            RunOptions {
                reset_counters: false,
                ..Default::default()
            },
        )
        .await;
    assert_eq!(ids(&continued)[0], Value::Integer(103));
}

#[tokio::test]
async fn test_incompatible_ports_abort_before_execution() {
    let (runtime, _) = create_test_runtime().await;
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("pack", NodeKind::PackFiles).with_config("files", json!(["my_mod.pack"])));
    graph.add_node(NodeSpec::new("join", NodeKind::TextJoin));
    graph.connect("pack", "join");

    let report = runtime.execute(&graph, RunOptions::default()).await;
    assert_eq!(report.total_executed, 0);
    assert!(report.error.unwrap().contains("cannot feed"));
}

#[tokio::test]
async fn test_document_runs_with_its_own_options() {
    let (runtime, store) = create_test_runtime().await;
    let json = r#"{
        "version": 1,
        "nodes": [
            { "id": "pack", "kind": "packFiles", "configuration": { "files": ["my_mod.pack"] } },
            { "id": "table", "kind": "tableSelection", "configuration": { "tables": ["units_tables"] } },
            { "id": "lines", "kind": "columnsToText", "configuration": { "pattern": "{key}: {cost}" } },
            { "id": "text", "kind": "textJoin", "configuration": { "separator": "\n" } },
            { "id": "save", "kind": "saveChanges", "configuration": { "fileName": "text/costs.txt" } }
        ],
        "connections": [
            { "id": "c1", "sourceId": "pack", "targetId": "table" },
            { "id": "c2", "sourceId": "table", "targetId": "lines" },
            { "id": "c3", "sourceId": "lines", "targetId": "text" },
            { "id": "c4", "sourceId": "text", "targetId": "save" }
        ],
        "options": { "outputArchive": "text.pack" }
    }"#;
    let document = GraphDocument::from_json(json).unwrap();

    let report = runtime.execute_document(&document).await;
    assert_eq!(report.success_count, 5, "{}", report.summary());

    let archive = store.get("text.pack").await.unwrap();
    assert_eq!(
        archive.entry("text/costs.txt").unwrap().data.as_text(),
        Some("spear: 400\nsword: 550\nbow: 350")
    );
}
