//! Hash indexes, joins and recovery of one table from a joined result.

use crate::common::table_input;
use async_trait::async_trait;
use packcore::payload::{IndexedTable, NestedRow, NestedTableSelection, TableSelection};
use packcore::table::{prefix_columns, prefix_row, row_key};
use packcore::{NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, Payload, Row, TableData, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// Builds an index over every row of `selection`. Rows with a null key cell
/// stay in `rows` but are not indexed; with no key columns nothing is.
pub fn build_index(selection: &TableSelection, key_columns: &[String]) -> Result<IndexedTable, NodeError> {
    let columns = selection.combined_columns();
    if let Some(missing) = key_columns.iter().find(|k| !columns.contains(k)) {
        return Err(NodeError::ReferenceNotFound(format!("key column '{}'", missing)));
    }

    let rows: Vec<Row> = selection.all_rows().cloned().collect();
    let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate().filter(|_| !key_columns.is_empty()) {
        if let Some(key) = row_key(row, key_columns) {
            index.entry(key).or_default().push(i);
        }
    }

    Ok(IndexedTable {
        table_name: selection
            .tables
            .first()
            .map(|t| t.name.clone())
            .unwrap_or_default(),
        key_columns: key_columns.to_vec(),
        columns,
        rows,
        index,
        source_files: selection.source_files.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct IndexTableConfig {
    #[serde(default)]
    columns: Vec<String>,
}

pub struct IndexTableNode;

#[async_trait]
impl NodeExecutor for IndexTableNode {
    fn kind(&self) -> NodeKind {
        NodeKind::IndexTable
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: IndexTableConfig = ctx.config()?;
        if config.columns.is_empty() {
            return Err(NodeError::MalformedConfiguration("no key columns".to_string()));
        }
        let input = table_input(&ctx)?;
        let indexed = build_index(input, &config.columns)?;
        let keys = indexed.index.len();
        Ok(NodeOutput::with_primary(Payload::IndexedTable(indexed)).with_metadata("keys", keys))
    }

    fn description(&self) -> &str {
        "Builds a hash index over key columns"
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum JoinType {
    #[default]
    Inner,
    Left,
    Nested,
    Cross,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupConfig {
    #[serde(default)]
    join_type: JoinType,
    #[serde(default)]
    source_columns: Vec<String>,
    /// Key columns used when a raw table arrives on the index port.
    index_columns: Option<Vec<String>>,
}

fn joined_row(source: &Row, source_prefix: &str, matched: Option<&Row>, index: &IndexedTable) -> Row {
    let mut row = prefix_row(source, source_prefix);
    match matched {
        Some(m) => row.extend(prefix_row(m, &index.table_name)),
        None => {
            for column in &index.columns {
                row.insert(format!("{}_{}", index.table_name, column), Value::Null);
            }
        }
    }
    row
}

/// Joins a source table against an index
pub struct LookupNode;

impl LookupNode {
    fn flat_join(source: &TableSelection, index: &IndexedTable, config: &LookupConfig) -> TableSelection {
        let mut tables = Vec::with_capacity(source.tables.len());
        for table in &source.tables {
            let mut columns = prefix_columns(&table.columns, &table.name);
            columns.extend(prefix_columns(&index.columns, &index.table_name));
            let mut rows = Vec::new();
            for row in &table.rows {
                if config.join_type == JoinType::Cross {
                    rows.extend(index.rows.iter().map(|m| joined_row(row, &table.name, Some(m), index)));
                    continue;
                }
                let mut hit = false;
                if let Some(key) = row_key(row, &config.source_columns) {
                    for m in index.matches(&key) {
                        rows.push(joined_row(row, &table.name, Some(m), index));
                        hit = true;
                    }
                }
                if !hit && config.join_type == JoinType::Left {
                    rows.push(joined_row(row, &table.name, None, index));
                }
            }
            tables.push(TableData {
                columns,
                rows,
                ..table.empty_like()
            });
        }
        TableSelection::new(tables, merged_sources(source, index))
    }

    fn nested_join(source: &TableSelection, index: &IndexedTable, config: &LookupConfig) -> NestedTableSelection {
        let rows = source
            .all_rows()
            .map(|row| NestedRow {
                row: row.clone(),
                matches: row_key(row, &config.source_columns)
                    .map(|key| index.matches(&key).cloned().collect())
                    .unwrap_or_default(),
            })
            .collect();
        NestedTableSelection {
            source_table: source
                .tables
                .first()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            nested_table: index.table_name.clone(),
            source_columns: source.combined_columns(),
            nested_columns: index.columns.clone(),
            rows,
            source_files: merged_sources(source, index),
        }
    }
}

fn merged_sources(source: &TableSelection, index: &IndexedTable) -> Vec<String> {
    crate::common::union_sources([&source.source_files, &index.source_files])
}

#[async_trait]
impl NodeExecutor for LookupNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Lookup
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: LookupConfig = ctx.config()?;
        if config.join_type != JoinType::Cross && config.source_columns.is_empty() {
            return Err(NodeError::MalformedConfiguration("'sourceColumns' is required".to_string()));
        }
        let NodeInput::Pair { source, index } = &ctx.input else {
            return Err(NodeError::MissingInput("source and index".to_string()));
        };
        let source = match source {
            Some(Payload::TableSelection(t)) => t,
            Some(other) => return Err(NodeError::invalid_input("TableSelection", other.port_type().to_string())),
            None => return Err(NodeError::MissingInput("source".to_string())),
        };

        let built;
        let index = match index {
            Some(Payload::IndexedTable(i)) => i,
            Some(Payload::TableSelection(raw)) => {
                let keys = config
                    .index_columns
                    .clone()
                    .unwrap_or_else(|| config.source_columns.clone());
                built = build_index(raw, &keys)?;
                &built
            }
            Some(other) => return Err(NodeError::invalid_input("IndexedTable", other.port_type().to_string())),
            None => return Err(NodeError::MissingInput("index".to_string())),
        };

        if config.join_type != JoinType::Cross && config.source_columns.len() != index.key_columns.len() {
            return Err(NodeError::MalformedConfiguration(format!(
                "{} source columns for an index keyed on {} columns",
                config.source_columns.len(),
                index.key_columns.len()
            )));
        }

        let output = if config.join_type == JoinType::Nested {
            let nested = Self::nested_join(source, index, &config);
            let rows = nested.rows.len();
            NodeOutput::with_primary(Payload::NestedTableSelection(nested)).with_metadata("rows", rows)
        } else {
            let joined = Self::flat_join(source, index, &config);
            let rows = joined.row_count();
            NodeOutput::with_primary(Payload::TableSelection(joined)).with_metadata("rows", rows)
        };
        tracing::debug!("Lookup {} ({:?}) done", ctx.node_id, config.join_type);
        Ok(output)
    }

    fn description(&self) -> &str {
        "Joins a source table with an indexed table (inner, left, nested or cross)"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractTableConfig {
    #[serde(default)]
    table_name: String,
    #[serde(default = "default_true")]
    deduplicate: bool,
}

fn default_true() -> bool {
    true
}

/// Recovers one table's columns from a prefixed join result
pub struct ExtractTableNode;

#[async_trait]
impl NodeExecutor for ExtractTableNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ExtractTable
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: ExtractTableConfig = ctx.config()?;
        crate::common::require(&config.table_name, "tableName")?;
        let input = table_input(&ctx)?;
        let prefix = format!("{}_", config.table_name);

        let mut tables = Vec::new();
        for table in &input.tables {
            let columns: Vec<(String, String)> = table
                .columns
                .iter()
                .filter_map(|c| c.strip_prefix(&prefix).map(|bare| (c.clone(), bare.to_string())))
                .collect();
            if columns.is_empty() {
                // Not a join result: the table itself may be the one asked for.
                if table.name == config.table_name {
                    tables.push(table.clone());
                }
                continue;
            }

            let mut rows: Vec<Row> = Vec::new();
            let mut seen = HashSet::new();
            for row in &table.rows {
                let projected: Row = columns
                    .iter()
                    .map(|(full, bare)| (bare.clone(), row.get(full).cloned().unwrap_or_default()))
                    .collect();
                // Left joins leave all-null rows for the unmatched side.
                if projected.values().all(Value::is_null) {
                    continue;
                }
                if config.deduplicate {
                    let fingerprint = serde_json::to_string(&projected).unwrap_or_default();
                    if !seen.insert(fingerprint) {
                        continue;
                    }
                }
                rows.push(projected);
            }
            tables.push(TableData {
                name: config.table_name.clone(),
                version: table.version.filter(|_| table.name == config.table_name),
                columns: columns.into_iter().map(|(_, bare)| bare).collect(),
                rows,
                ..table.empty_like()
            });
        }

        if tables.is_empty() {
            return Err(NodeError::ReferenceNotFound(format!(
                "no columns prefixed with '{}'",
                prefix
            )));
        }
        let selection = TableSelection::new(tables, input.source_files.clone());
        let rows = selection.row_count();
        Ok(NodeOutput::with_primary(Payload::TableSelection(selection)).with_metadata("rows", rows))
    }

    fn description(&self) -> &str {
        "Extracts one table's columns from a joined table"
    }
}
