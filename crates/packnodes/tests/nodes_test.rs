// crates/packnodes/tests/nodes_test.rs

use packcore::payload::{ColumnSelection, ColumnSlice, CustomColumn, CustomSchema, NestedTableSelection, TableSelection};
use packcore::schema::{FieldSchema, FieldType, TableSchema};
use packcore::{
    Archive, CounterRegistry, DecodedTable, EntryData, EventBus, ExecutionId, InMemorySchemaRegistry,
    MemoryArchiveStore, NodeContext, NodeExecutor, NodeInput, NodeKind, Payload, Row, RunOptions,
    Services, TableData, Value,
};
use packnodes::{
    AggregateNestedNode, ColumnsToTextNode, CustomRowsInputNode, ExtractTableNode, FilterNode,
    GenerateRowsNode, GroupByNode, LookupNode, NumericAdjustmentNode, ReadTsvFromPackNode,
    ReverseReferenceLookupNode, SaveChangesNode, TextJoinNode,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

// Helper function to create a test context
fn create_test_context(config: serde_json::Value, input: NodeInput) -> NodeContext {
    let services = Services::new(
        Arc::new(MemoryArchiveStore::new()),
        Arc::new(InMemorySchemaRegistry::new()),
    );
    create_test_context_with(Arc::new(services), RunOptions::default(), config, input)
}

fn create_test_context_with(
    services: Arc<Services>,
    options: RunOptions,
    config: serde_json::Value,
    input: NodeInput,
) -> NodeContext {
    let event_bus = EventBus::new(100);
    let execution_id = ExecutionId::new_v4();

    NodeContext {
        node_id: "node".to_string(),
        kind: NodeKind::Filter,
        execution_id,
        input,
        config,
        options: Arc::new(options),
        services,
        counters: Arc::new(Mutex::new(CounterRegistry::new())),
        events: event_bus.create_emitter(execution_id, "node"),
        cancellation: tokio_util::sync::CancellationToken::new(),
    }
}

fn row(cells: &[(&str, Value)]) -> Row {
    cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn units() -> TableData {
    let rows = (0..10)
        .map(|i| {
            let faction = if i < 7 { format!("f{}", i % 4) } else { "none".to_string() };
            row(&[
                ("key", Value::from(format!("unit_{}", i))),
                ("faction", Value::from(faction)),
                ("cost", Value::Integer(if i % 2 == 0 { 400 } else { 250 })),
            ])
        })
        .collect();
    TableData::new("units", vec!["key".into(), "faction".into(), "cost".into()]).with_rows(rows)
}

fn factions() -> TableData {
    let rows = (0..4)
        .map(|i| {
            row(&[
                ("key", Value::from(format!("f{}", i))),
                ("name", Value::from(format!("Faction {}", i))),
            ])
        })
        .collect();
    TableData::new("factions", vec!["key".into(), "name".into()]).with_rows(rows)
}

fn selection(tables: Vec<TableData>) -> Payload {
    Payload::TableSelection(TableSelection::new(tables, vec!["mod.pack".to_string()]))
}

fn as_tables(payload: &Option<Payload>) -> &TableSelection {
    match payload {
        Some(Payload::TableSelection(t)) => t,
        other => panic!("expected a table selection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_filter_match_and_else_partition_the_input() {
    let ctx = create_test_context(
        json!({ "filters": [{ "column": "cost", "value": 400 }] }),
        NodeInput::Single(selection(vec![units()])),
    );

    let output = FilterNode.execute(ctx).await.unwrap();

    let matched = as_tables(&output.primary);
    let rest = as_tables(&output.else_branch);
    assert_eq!(matched.row_count(), 5);
    assert_eq!(rest.row_count(), 5);
    assert!(matched.all_rows().all(|r| r["cost"] == Value::Integer(400)));

    let mut union: Vec<String> = matched
        .all_rows()
        .chain(rest.all_rows())
        .map(|r| r["key"].to_string())
        .collect();
    union.sort();
    let mut original: Vec<String> = units().rows.iter().map(|r| r["key"].to_string()).collect();
    original.sort();
    assert_eq!(union, original);
}

#[tokio::test]
async fn test_filter_or_rules_short_circuit() {
    let ctx = create_test_context(
        json!({ "filters": [
            { "column": "faction", "value": "f0" },
            { "column": "faction", "value": "f1", "operator": "or" },
            { "column": "cost", "value": 400, "negate": true, "operator": "and" }
        ] }),
        NodeInput::Single(selection(vec![units()])),
    );

    let output = FilterNode.execute(ctx).await.unwrap();
    let keys: Vec<String> = as_tables(&output.primary)
        .all_rows()
        .map(|r| r["key"].to_string())
        .collect();
    // f0/f1 rows are units 0, 1, 4, 5; of those only 1 and 5 cost 250.
    assert_eq!(keys, vec!["unit_1", "unit_5"]);
}

#[tokio::test]
async fn test_filter_without_rules_is_malformed() {
    assert!(FilterNode.validate_config(&json!({})).is_err());
    assert!(FilterNode.validate_config(&json!({ "column": "cost", "value": 1 })).is_ok());
}

#[tokio::test]
async fn test_inner_lookup_against_raw_table() {
    let ctx = create_test_context(
        json!({ "joinType": "inner", "sourceColumns": ["faction"], "indexColumns": ["key"] }),
        NodeInput::Pair {
            source: Some(selection(vec![units()])),
            index: Some(selection(vec![factions()])),
        },
    );

    let output = LookupNode.execute(ctx).await.unwrap();
    let joined = as_tables(&output.primary);

    assert_eq!(joined.row_count(), 7);
    let table = &joined.tables[0];
    assert!(table.has_column("units_faction"));
    assert!(table.has_column("factions_name"));
    for r in &table.rows {
        assert_eq!(r["units_faction"], r["factions_key"]);
    }
}

#[tokio::test]
async fn test_left_and_nested_lookup_keep_every_source_row() {
    let pair = || NodeInput::Pair {
        source: Some(selection(vec![units()])),
        index: Some(selection(vec![factions()])),
    };

    let left = LookupNode
        .execute(create_test_context(
            json!({ "joinType": "left", "sourceColumns": ["faction"], "indexColumns": ["key"] }),
            pair(),
        ))
        .await
        .unwrap();
    let left = as_tables(&left.primary);
    assert_eq!(left.row_count(), 10);
    assert_eq!(left.all_rows().filter(|r| r["factions_name"].is_null()).count(), 3);

    let nested = LookupNode
        .execute(create_test_context(
            json!({ "joinType": "nested", "sourceColumns": ["faction"], "indexColumns": ["key"] }),
            pair(),
        ))
        .await
        .unwrap();
    let Some(Payload::NestedTableSelection(nested)) = nested.primary else {
        panic!("expected nested output");
    };
    assert_eq!(nested.rows.len(), 10);
    assert_eq!(nested.rows.iter().filter(|r| r.matches.len() == 1).count(), 7);
}

#[tokio::test]
async fn test_lookup_with_missing_side_fails() {
    let ctx = create_test_context(
        json!({ "sourceColumns": ["faction"] }),
        NodeInput::Pair {
            source: Some(selection(vec![units()])),
            index: None,
        },
    );
    let err = LookupNode.execute(ctx).await.unwrap_err();
    assert!(err.to_string().contains("index"));
}

#[tokio::test]
async fn test_cross_join_is_cartesian() {
    let ctx = create_test_context(
        json!({ "joinType": "cross" }),
        NodeInput::Pair {
            source: Some(selection(vec![units()])),
            index: Some(selection(vec![factions()])),
        },
    );
    let output = LookupNode.execute(ctx).await.unwrap();
    assert_eq!(as_tables(&output.primary).row_count(), 40);
}

#[tokio::test]
async fn test_extract_table_recovers_index_side() {
    let joined = LookupNode
        .execute(create_test_context(
            json!({ "sourceColumns": ["faction"], "indexColumns": ["key"] }),
            NodeInput::Pair {
                source: Some(selection(vec![units()])),
                index: Some(selection(vec![factions()])),
            },
        ))
        .await
        .unwrap();

    let ctx = create_test_context(
        json!({ "tableName": "factions" }),
        NodeInput::Single(joined.primary.unwrap()),
    );
    let output = ExtractTableNode.execute(ctx).await.unwrap();
    let extracted = as_tables(&output.primary);

    assert_eq!(extracted.tables[0].name, "factions");
    assert_eq!(extracted.tables[0].columns, vec!["key", "name"]);
    // f0..f3 appear in 7 joined rows but only 4 distinct rows.
    assert_eq!(extracted.row_count(), 4);
}

#[tokio::test]
async fn test_aggregate_nested_min_keeps_the_row() {
    let source = TableData::new("armies", vec!["key".into()])
        .with_rows(vec![row(&[("key", Value::from("a"))]), row(&[("key", Value::from("b"))])]);
    let nested = NestedTableSelection {
        source_table: "armies".into(),
        nested_table: "units".into(),
        source_columns: vec!["key".into()],
        nested_columns: vec!["key".into(), "cost".into()],
        rows: vec![
            packcore::payload::NestedRow {
                row: source.rows[0].clone(),
                matches: vec![
                    row(&[("key", Value::from("u1")), ("cost", Value::Integer(300))]),
                    row(&[("key", Value::from("u2")), ("cost", Value::Integer(150))]),
                ],
            },
            packcore::payload::NestedRow {
                row: source.rows[1].clone(),
                matches: vec![],
            },
        ],
        source_files: vec![],
    };

    let ctx = create_test_context(
        json!({ "column": "cost", "operation": "min" }),
        NodeInput::Single(Payload::NestedTableSelection(nested.clone())),
    );
    let output = AggregateNestedNode.execute(ctx).await.unwrap();
    let rows: Vec<&Row> = as_tables(&output.primary).all_rows().collect();
    assert_eq!(rows[0]["units_key"], Value::from("u2"));
    assert!(rows[1]["units_key"].is_null());

    let ctx = create_test_context(
        json!({ "column": "cost", "operation": "sum", "outputColumn": "total" }),
        NodeInput::Single(Payload::NestedTableSelection(nested)),
    );
    let output = AggregateNestedNode.execute(ctx).await.unwrap();
    let rows: Vec<&Row> = as_tables(&output.primary).all_rows().collect();
    assert_eq!(rows[0]["total"], Value::Integer(450));
    assert!(rows[1]["total"].is_null());
}

#[tokio::test]
async fn test_group_by_with_conditions_and_defaults() {
    let ctx = create_test_context(
        json!({
            "groupBy": ["cost"],
            "aggregations": [
                { "name": "units", "function": "count" },
                { "name": "first_key", "column": "key", "function": "first" },
                {
                    "name": "f3_key",
                    "column": "key",
                    "function": "max",
                    "condition": { "column": "faction", "value": "f3" },
                    "default": "none"
                }
            ]
        }),
        NodeInput::Single(selection(vec![units()])),
    );

    let output = GroupByNode.execute(ctx).await.unwrap();
    let table = &as_tables(&output.primary).tables[0];

    assert_eq!(table.columns, vec!["cost", "units", "first_key", "f3_key"]);
    assert_eq!(table.rows.len(), 2);
    // 400 first (unit_0), then 250 (unit_1).
    assert_eq!(table.rows[0]["cost"], Value::Integer(400));
    assert_eq!(table.rows[0]["units"], Value::Integer(5));
    assert_eq!(table.rows[0]["first_key"], Value::from("unit_0"));
    assert_eq!(table.rows[0]["f3_key"], Value::from("none"));
    assert_eq!(table.rows[1]["f3_key"], Value::from("unit_3"));
}

#[tokio::test]
async fn test_row_generation_prefix_and_counter() {
    let input = TableData::new("units", vec!["key".into()]).with_rows(
        ["a", "b", "c"]
            .iter()
            .map(|k| row(&[("key", Value::from(*k))]))
            .collect(),
    );
    let ctx = create_test_context(
        json!({
            "transformations": [
                { "type": "prefix", "value": "mod_", "source": "key", "outputName": "new_key" },
                { "type": "counter", "start": 10000, "outputName": "id" }
            ],
            "outputs": [{
                "tableName": "units_tables",
                "columns": { "key": "new_key", "id": "id" },
                "staticValues": { "cost": 0 }
            }]
        }),
        NodeInput::Single(selection(vec![input])),
    );

    let output = GenerateRowsNode.execute(ctx).await.unwrap();

    let generated = match output.outputs.get("output0") {
        Some(Payload::TableSelection(t)) => &t.tables[0],
        other => panic!("missing output0: {:?}", other),
    };
    assert_eq!(generated.name, "units_tables");
    let keys: Vec<String> = generated.rows.iter().map(|r| r["key"].to_string()).collect();
    let ids: Vec<Value> = generated.rows.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(keys, vec!["mod_a", "mod_b", "mod_c"]);
    assert_eq!(ids, vec![Value::Integer(10000), Value::Integer(10001), Value::Integer(10002)]);
    assert!(generated.rows.iter().all(|r| r["cost"] == Value::Integer(0)));
    assert_eq!(as_tables(&output.primary).tables.len(), 1);
}

#[tokio::test]
async fn test_row_generation_filters_drop_rows() {
    let ctx = create_test_context(
        json!({
            "transformations": [
                { "type": "filter", "source": "cost", "value": 400 },
                { "type": "multiply", "value": 2, "source": "cost", "outputName": "double" }
            ]
        }),
        NodeInput::Single(selection(vec![units()])),
    );
    let output = GenerateRowsNode.execute(ctx).await.unwrap();
    let rows: Vec<&Row> = as_tables(&output.primary).all_rows().collect();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r["double"] == Value::Integer(800)));
}

#[tokio::test]
async fn test_row_generation_draws_counters_only_for_kept_rows() {
    let ctx = create_test_context(
        json!({
            "transformations": [
                { "type": "counter", "start": 1, "counterKey": "ids", "outputName": "id" },
                { "type": "filter", "source": "cost", "value": 400 }
            ]
        }),
        NodeInput::Single(selection(vec![units()])),
    );
    let counters = ctx.counters.clone();

    let output = GenerateRowsNode.execute(ctx).await.unwrap();
    let ids: Vec<Value> = as_tables(&output.primary).all_rows().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, (1..=5).map(Value::Integer).collect::<Vec<_>>());
    assert_eq!(counters.lock().await.peek("ids"), Some(6));

    // A failing pipeline leaves the sequence untouched.
    let ctx = create_test_context(
        json!({
            "transformations": [
                { "type": "counter", "start": 1, "counterKey": "ids", "outputName": "id" },
                { "type": "add", "value": 1, "source": "key", "outputName": "bad" }
            ]
        }),
        NodeInput::Single(selection(vec![units()])),
    );
    let counters = ctx.counters.clone();
    assert!(GenerateRowsNode.execute(ctx).await.is_err());
    assert!(counters.lock().await.is_empty());
}

#[tokio::test]
async fn test_row_generation_rejects_five_outputs() {
    let outputs: Vec<_> = (0..5).map(|i| json!({ "tableName": format!("t{}", i) })).collect();
    let err = GenerateRowsNode
        .validate_config(&json!({ "outputs": outputs }))
        .unwrap_err();
    assert!(err.to_string().contains("at most 4"));
}

#[tokio::test]
async fn test_numeric_adjustment_keeps_integers() {
    let slice = ColumnSlice {
        table: units(),
        column: "cost".into(),
    };
    let ctx = create_test_context(
        json!({ "expression": "value * 1.1" }),
        NodeInput::Single(Payload::ColumnSelection(ColumnSelection {
            columns: vec![slice],
            ..Default::default()
        })),
    );

    let output = NumericAdjustmentNode::new().execute(ctx).await.unwrap();
    let Some(Payload::ChangedColumnSelection(changes)) = output.primary else {
        panic!("expected changes");
    };
    assert_eq!(changes.changes[0].values[0], Value::Integer(440));
    assert_eq!(changes.changes[0].values[1], Value::Integer(275));
}

#[tokio::test]
async fn test_text_pipeline() {
    let lines = ColumnsToTextNode
        .execute(create_test_context(
            json!({ "pattern": "{key}={cost}" }),
            NodeInput::Single(selection(vec![units()])),
        ))
        .await
        .unwrap();
    let text = TextJoinNode
        .execute(create_test_context(
            json!({ "separator": ";" }),
            NodeInput::Single(lines.primary.unwrap()),
        ))
        .await
        .unwrap();
    let Some(Payload::Text(text)) = text.primary else {
        panic!("expected text");
    };
    assert!(text.starts_with("unit_0=400;unit_1=250;"));
    assert_eq!(text.matches(';').count(), 9);
}

#[tokio::test]
async fn test_custom_rows_coerce_to_schema() {
    let schema = CustomSchema {
        name: "my_table".into(),
        columns: vec![
            CustomColumn {
                name: "key".into(),
                field_type: FieldType::StringU8,
            },
            CustomColumn {
                name: "value".into(),
                field_type: FieldType::I32,
            },
        ],
    };
    let ctx = create_test_context(
        json!({ "rows": [{ "key": "a", "value": "12" }, { "key": "b" }] }),
        NodeInput::Single(Payload::CustomSchema(schema)),
    );

    let output = CustomRowsInputNode.execute(ctx).await.unwrap();
    let rows: Vec<&Row> = as_tables(&output.primary).all_rows().collect();
    assert_eq!(rows[0]["value"], Value::Integer(12));
    assert_eq!(rows[1]["value"], Value::Integer(0));
}

#[tokio::test]
async fn test_read_tsv_from_pack() {
    let archive = Archive::new("data.pack").with_entry(
        "text/units.tsv",
        EntryData::Text("key\tcost\n#units_tables;1;db/units_tables/data__\nspear\t400\nsword\t500\n".into()),
    );
    let store = MemoryArchiveStore::new();
    store.insert(archive.clone()).await;
    let services = Arc::new(Services::new(Arc::new(store), Arc::new(InMemorySchemaRegistry::new())));

    let packs = Payload::PackFiles(packcore::payload::PackFiles {
        packs: vec![packcore::payload::PackHandle {
            name: "data.pack".into(),
            path: "data.pack".into(),
            loaded: true,
            reason: None,
            archive: Some(Arc::new(archive)),
        }],
    });
    let ctx = create_test_context_with(
        services,
        RunOptions::default(),
        json!({
            "filePath": "text/units.tsv",
            "columns": [{ "name": "key" }, { "name": "cost", "fieldType": "I32" }]
        }),
        NodeInput::Single(packs),
    );

    let output = ReadTsvFromPackNode.execute(ctx).await.unwrap();
    let table = &as_tables(&output.primary).tables[0];
    assert_eq!(table.name, "units");
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1]["cost"], Value::Integer(500));
}

#[tokio::test]
async fn test_read_delimited_keeps_quoted_fields() {
    let archive = Archive::new("data.pack").with_entry(
        "text/units.csv",
        EntryData::Text("key,desc,cost\nsword,\"Great, big\",500\nbow,,350\n".into()),
    );
    let store = MemoryArchiveStore::new();
    store.insert(archive.clone()).await;
    let services = Arc::new(Services::new(Arc::new(store), Arc::new(InMemorySchemaRegistry::new())));

    let packs = Payload::PackFiles(packcore::payload::PackFiles {
        packs: vec![packcore::payload::PackHandle {
            name: "data.pack".into(),
            path: "data.pack".into(),
            loaded: true,
            reason: None,
            archive: Some(Arc::new(archive)),
        }],
    });
    let ctx = create_test_context_with(
        services,
        RunOptions::default(),
        json!({
            "filePath": "text/units.csv",
            "tableName": "units_tables",
            "delimiter": ",",
            "columns": [{ "name": "key" }, { "name": "desc" }, { "name": "cost", "fieldType": "I32" }]
        }),
        NodeInput::Single(packs),
    );

    let output = ReadTsvFromPackNode.execute(ctx).await.unwrap();
    let table = &as_tables(&output.primary).tables[0];
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0]["key"], Value::from("sword"));
    assert_eq!(table.rows[0]["desc"], Value::from("Great, big"));
    assert_eq!(table.rows[0]["cost"], Value::Integer(500));
    assert_eq!(table.rows[1]["cost"], Value::Integer(350));
}

#[tokio::test]
async fn test_save_writes_tables_and_text() {
    let store = Arc::new(MemoryArchiveStore::new());
    let services = Arc::new(Services::new(store.clone(), Arc::new(InMemorySchemaRegistry::new())));
    let options = RunOptions {
        output_archive: Some("out.pack".into()),
        ..Default::default()
    };

    let ctx = create_test_context_with(
        services.clone(),
        options.clone(),
        json!({ "tableFileName": "my_mod" }),
        NodeInput::Single(selection(vec![units()])),
    );
    let output = SaveChangesNode.execute(ctx).await.unwrap();
    assert!(output.primary.is_none());

    let ctx = create_test_context_with(services, options, json!({}), NodeInput::Single(Payload::Text("hello".into())));
    SaveChangesNode.execute(ctx).await.unwrap();

    let archive = store.get("out.pack").await.unwrap();
    let Some(EntryData::Table(table)) = archive.entry("db/units/my_mod").map(|e| e.data.clone()) else {
        panic!("table entry missing");
    };
    assert_eq!(table.rows.len(), 10);
    assert_eq!(
        archive.entry("text/packflow_output.txt").unwrap().data.as_text(),
        Some("hello")
    );
}

#[tokio::test]
async fn test_reverse_lookup_follows_every_referencing_field() {
    let schemas = InMemorySchemaRegistry::new()
        .with_table(
            "units_tables",
            TableSchema {
                version: 1,
                fields: vec![FieldSchema::new("key", FieldType::StringU8).key()],
            },
        )
        .with_table(
            "battles_tables",
            TableSchema {
                version: 1,
                fields: vec![
                    FieldSchema::new("key", FieldType::StringU8).key(),
                    FieldSchema::new("attacker", FieldType::StringU8).references("units_tables", "key"),
                    FieldSchema::new("defender", FieldType::StringU8).references("units_tables", "key"),
                ],
            },
        );
    let battles = DecodedTable {
        version: Some(1),
        columns: vec!["key".into(), "attacker".into(), "defender".into()],
        rows: vec![
            row(&[("key", "b1".into()), ("attacker", "spear".into()), ("defender", "bow".into())]),
            row(&[("key", "b2".into()), ("attacker", "bow".into()), ("defender", "spear".into())]),
            row(&[("key", "b3".into()), ("attacker", "bow".into()), ("defender", "sword".into())]),
        ],
    };
    let store = MemoryArchiveStore::new();
    store
        .insert(Archive::new("mod.pack").with_entry("db/battles_tables/data__", EntryData::Table(battles)))
        .await;
    let services = Arc::new(Services::new(Arc::new(store), Arc::new(schemas)));

    let spear = TableData::new("units_tables", vec!["key".into()])
        .with_rows(vec![row(&[("key", Value::from("spear"))])]);
    let ctx = create_test_context_with(
        services,
        RunOptions::default(),
        json!({}),
        NodeInput::Single(selection(vec![spear])),
    );

    let output = ReverseReferenceLookupNode.execute(ctx).await.unwrap();
    let mut keys: Vec<String> = as_tables(&output.primary)
        .all_rows()
        .map(|r| r["key"].to_string())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["b1", "b2"]);
}
