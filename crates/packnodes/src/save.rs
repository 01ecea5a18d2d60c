use async_trait::async_trait;
use packcore::payload::ChangedColumnSelection;
use packcore::table::table_entry_path;
use packcore::{
    ArchiveEntry, DecodedTable, EntryData, NodeContext, NodeError, NodeExecutor, NodeKind,
    NodeOutput, Payload, TableData,
};
use serde::Deserialize;

/// Entry written for text payloads unless configured otherwise.
pub const DEFAULT_TEXT_ENTRY: &str = "text/packflow_output.txt";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveConfig {
    file_name: Option<String>,
    /// Overrides the entry file name of every written table.
    table_file_name: Option<String>,
}

fn table_entry(table: &TableData, file_override: Option<&str>) -> ArchiveEntry {
    let file = file_override.unwrap_or(&table.file_name);
    ArchiveEntry {
        name: table_entry_path(&table.name, file),
        data: EntryData::Table(DecodedTable {
            version: table.version,
            columns: table.columns.clone(),
            rows: table.rows.clone(),
        }),
    }
}

/// Applies every change to a copy of its table; changes to the same table
/// land in the same copy.
fn apply_changes(selection: &ChangedColumnSelection) -> Vec<TableData> {
    let mut tables: Vec<TableData> = Vec::new();
    for change in &selection.changes {
        let identity = change.table.identity();
        let position = match tables.iter().position(|t| t.identity() == identity) {
            Some(i) => i,
            None => {
                tables.push(change.table.clone());
                tables.len() - 1
            }
        };
        change.apply_to(&mut tables[position]);
    }
    tables
}

/// Writes the final payload into the run's output archive
pub struct SaveChangesNode;

#[async_trait]
impl NodeExecutor for SaveChangesNode {
    fn kind(&self) -> NodeKind {
        NodeKind::SaveChanges
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: SaveConfig = ctx.config()?;
        let table_file = config.table_file_name.as_deref();

        let entries: Vec<ArchiveEntry> = match ctx.input.single()? {
            Payload::Text(text) => vec![ArchiveEntry {
                name: config
                    .file_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TEXT_ENTRY.to_string()),
                data: EntryData::Text(text.clone()),
            }],
            Payload::ChangedColumnSelection(changes) => apply_changes(changes)
                .iter()
                .map(|t| table_entry(t, table_file))
                .collect(),
            Payload::TableSelection(selection) => selection
                .tables
                .iter()
                .map(|t| table_entry(t, table_file))
                .collect(),
            other => {
                return Err(NodeError::invalid_input(
                    "ChangedColumnSelection, Text or TableSelection",
                    other.port_type().to_string(),
                ))
            }
        };
        if entries.is_empty() {
            return Err(NodeError::MissingInput("nothing to save".to_string()));
        }

        let archive = ctx.output_archive();
        let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        {
            let lock = ctx.services.write_locks.lock_for(&archive);
            let _guard = lock.lock().await;
            ctx.check_cancelled()?;
            ctx.services.archives.write_entries(&archive, entries).await?;
        }

        tracing::info!("Saved {} entries to {}", names.len(), archive);
        ctx.events.info(format!("Saved {} to {}", names.join(", "), archive));
        Ok(NodeOutput::new()
            .with_metadata("archive", archive)
            .with_metadata("entries", names))
    }

    fn description(&self) -> &str {
        "Saves tables, changed columns or text into the run's output archive"
    }
}
