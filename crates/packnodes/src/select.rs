use crate::common::table_input;
use async_trait::async_trait;
use packcore::payload::{ColumnSelection, ColumnSlice, SelectionFailure, TableSelection};
use packcore::table::parse_table_entry_path;
use packcore::{
    expect_input, EntryData, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload,
    TableData,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TableSelectionConfig {
    #[serde(default)]
    tables: Vec<String>,
}

/// Picks named tables out of the loaded archives
pub struct TableSelectionNode;

#[async_trait]
impl NodeExecutor for TableSelectionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::TableSelection
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: TableSelectionConfig = ctx.config()?;
        if config.tables.is_empty() {
            return Err(NodeError::MalformedConfiguration("no tables selected".to_string()));
        }
        let packs = expect_input!(ctx.input, PackFiles)?;

        let mut selection = TableSelection::default();
        for wanted in &config.tables {
            let mut found = false;
            for (pack, archive) in packs.loaded() {
                for entry in &archive.entries {
                    let Some((table, file)) = parse_table_entry_path(&entry.name) else {
                        continue;
                    };
                    let EntryData::Table(decoded) = &entry.data else {
                        continue;
                    };
                    if table != wanted.as_str() {
                        continue;
                    }
                    // Registry definitions win over whatever the decoder reported.
                    let columns = ctx
                        .services
                        .schemas
                        .schema_for(table, decoded.version)
                        .map(|s| s.column_names())
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| decoded.columns.clone());
                    selection.tables.push(TableData {
                        name: table.to_string(),
                        file_name: file.to_string(),
                        source: pack.path.clone(),
                        version: decoded.version,
                        columns,
                        rows: decoded.rows.clone(),
                    });
                    if !selection.source_files.contains(&pack.path) {
                        selection.source_files.push(pack.path.clone());
                    }
                    found = true;
                }
            }
            if !found {
                selection.failures.push(SelectionFailure {
                    table: None,
                    name: wanted.clone(),
                    reason: "not present in any loaded archive".to_string(),
                });
            }
        }

        if selection.tables.is_empty() {
            return Err(NodeError::ReferenceNotFound(format!(
                "none of the tables {} were found",
                config.tables.join(", ")
            )));
        }
        for failure in &selection.failures {
            ctx.events.warn(format!("Table {} {}", failure.name, failure.reason));
        }

        let rows = selection.row_count();
        let failures = selection.failures.len();
        Ok(NodeOutput::with_primary(Payload::TableSelection(selection))
            .with_metadata("rows", rows)
            .with_metadata("failures", failures))
    }

    fn description(&self) -> &str {
        "Selects database tables from pack archives"
    }
}

#[derive(Debug, Deserialize)]
struct ColumnSelectionConfig {
    #[serde(default)]
    columns: Vec<String>,
}

pub struct ColumnSelectionNode;

#[async_trait]
impl NodeExecutor for ColumnSelectionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ColumnSelection
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: ColumnSelectionConfig = ctx.config()?;
        if config.columns.is_empty() {
            return Err(NodeError::MalformedConfiguration("no columns selected".to_string()));
        }
        let input = table_input(&ctx)?;

        let mut selection = ColumnSelection {
            source_files: input.source_files.clone(),
            ..Default::default()
        };
        for table in &input.tables {
            for column in &config.columns {
                if table.has_column(column) {
                    selection.columns.push(ColumnSlice {
                        table: table.clone(),
                        column: column.clone(),
                    });
                } else {
                    selection.failures.push(SelectionFailure {
                        table: Some(table.name.clone()),
                        name: column.clone(),
                        reason: "no such column".to_string(),
                    });
                }
            }
        }

        if selection.columns.is_empty() {
            return Err(NodeError::ReferenceNotFound(format!(
                "none of the columns {} exist in the selected tables",
                config.columns.join(", ")
            )));
        }

        let count = selection.columns.len();
        Ok(NodeOutput::with_primary(Payload::ColumnSelection(selection)).with_metadata("columns", count))
    }

    fn description(&self) -> &str {
        "Selects columns of the incoming tables"
    }
}
