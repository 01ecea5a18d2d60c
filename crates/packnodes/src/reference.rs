//! Forward and reverse resolution of schema-declared table references.

use crate::common::{table_input, union_sources};
use async_trait::async_trait;
use packcore::payload::{SelectionFailure, TableSelection};
use packcore::table::{parse_table_entry_path, row_key};
use packcore::{
    EntryData, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row, TableData,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default, Deserialize)]
struct ReferenceConfig {
    /// Only follow references declared on this column.
    column: Option<String>,
    /// Only resolve these tables.
    tables: Option<Vec<String>>,
}

impl ReferenceConfig {
    fn wants_table(&self, table: &str) -> bool {
        self.tables
            .as_ref()
            .map_or(true, |t| t.is_empty() || t.iter().any(|n| n == table))
    }
}

/// One table to load. A row is kept when any of its requested columns holds
/// one of the keys collected for that column.
#[derive(Debug, Default)]
struct ResolveRequest {
    keys_by_column: BTreeMap<String, HashSet<String>>,
}

impl ResolveRequest {
    fn add(&mut self, column: &str, keys: HashSet<String>) {
        self.keys_by_column
            .entry(column.to_string())
            .or_default()
            .extend(keys);
    }

    fn matches(&self, row: &Row) -> bool {
        self.keys_by_column.iter().any(|(column, keys)| {
            row_key(row, std::slice::from_ref(column)).is_some_and(|k| keys.contains(&k))
        })
    }
}

/// Archives searched for referenced tables: the selection's own sources,
/// then the run's base archives.
fn search_path(ctx: &NodeContext, input: &TableSelection) -> Vec<String> {
    union_sources([&input.source_files, &ctx.options.base_archives])
}

fn collect_keys(input: &TableSelection, table: &str, column: &str) -> HashSet<String> {
    let column = [column.to_string()];
    input
        .tables
        .iter()
        .filter(|t| t.name == table)
        .flat_map(|t| t.rows.iter())
        .filter_map(|row| row_key(row, &column))
        .collect()
}

/// Loads every requested table from `archives`, keeping only matching rows.
async fn resolve(
    ctx: &NodeContext,
    archives: &[String],
    requests: BTreeMap<String, ResolveRequest>,
) -> Result<TableSelection, NodeError> {
    let mut result = TableSelection::default();
    let mut found: HashSet<String> = HashSet::new();

    for path in archives {
        ctx.check_cancelled()?;
        let archive = match ctx.services.archives.read_archive(path).await {
            Ok(archive) => archive,
            Err(e) => {
                ctx.events.warn(format!("Skipping {}: {}", path, e));
                continue;
            }
        };
        for entry in &archive.entries {
            let Some((table, file)) = parse_table_entry_path(&entry.name) else {
                continue;
            };
            let (Some(request), EntryData::Table(decoded)) = (requests.get(table), &entry.data) else {
                continue;
            };
            let rows: Vec<_> = decoded
                .rows
                .iter()
                .filter(|row| request.matches(row))
                .cloned()
                .collect();
            found.insert(table.to_string());
            if rows.is_empty() {
                continue;
            }
            let columns = ctx
                .services
                .schemas
                .schema_for(table, decoded.version)
                .map(|s| s.column_names())
                .unwrap_or_else(|| decoded.columns.clone());
            result.tables.push(TableData {
                name: table.to_string(),
                file_name: file.to_string(),
                source: path.clone(),
                version: decoded.version,
                columns,
                rows,
            });
            if !result.source_files.contains(path) {
                result.source_files.push(path.clone());
            }
        }
    }

    for table in requests.keys().filter(|t| !found.contains(*t)) {
        result.failures.push(SelectionFailure {
            table: None,
            name: table.clone(),
            reason: "not present in any searched archive".to_string(),
        });
    }
    if found.is_empty() {
        let names: Vec<&str> = requests.keys().map(String::as_str).collect();
        return Err(NodeError::ReferenceNotFound(format!(
            "referenced tables {} not found",
            names.join(", ")
        )));
    }
    Ok(result)
}

fn finish(ctx: &NodeContext, selection: TableSelection) -> NodeOutput {
    for failure in &selection.failures {
        ctx.events.warn(format!("Table {} {}", failure.name, failure.reason));
    }
    let rows = selection.row_count();
    NodeOutput::with_primary(Payload::TableSelection(selection)).with_metadata("rows", rows)
}

/// Follows references from the input tables to the tables they point at
pub struct ReferenceLookupNode;

#[async_trait]
impl NodeExecutor for ReferenceLookupNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ReferenceLookup
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: ReferenceConfig = ctx.config()?;
        let input = table_input(&ctx)?;

        let mut requests: BTreeMap<String, ResolveRequest> = BTreeMap::new();
        for table in &input.tables {
            let Some(schema) = ctx.services.schemas.schema_for(&table.name, table.version) else {
                continue;
            };
            for field in &schema.fields {
                let Some(reference) = &field.reference else {
                    continue;
                };
                if config.column.as_ref().is_some_and(|c| *c != field.name)
                    || !config.wants_table(&reference.table)
                {
                    continue;
                }
                let keys = collect_keys(input, &table.name, &field.name);
                requests
                    .entry(reference.table.clone())
                    .or_default()
                    .add(&reference.column, keys);
            }
        }

        if requests.is_empty() {
            let names: Vec<&str> = input.tables.iter().map(|t| t.name.as_str()).collect();
            return Err(NodeError::ReferenceNotFound(format!(
                "no matching references declared by {}",
                names.join(", ")
            )));
        }

        let selection = resolve(&ctx, &search_path(&ctx, input), requests).await?;
        Ok(finish(&ctx, selection))
    }

    fn description(&self) -> &str {
        "Loads the rows referenced by the incoming tables"
    }
}

/// Finds rows in other tables that reference the input rows
pub struct ReverseReferenceLookupNode;

#[async_trait]
impl NodeExecutor for ReverseReferenceLookupNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ReverseReferenceLookup
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: ReferenceConfig = ctx.config()?;
        let input = table_input(&ctx)?;

        let mut requests: BTreeMap<String, ResolveRequest> = BTreeMap::new();
        let mut seen = HashSet::new();
        for table in &input.tables {
            if !seen.insert(table.name.clone()) {
                continue;
            }
            for (referencing, field) in ctx.services.schemas.referencing(&table.name) {
                let Some(reference) = &field.reference else {
                    continue;
                };
                if !config.wants_table(&referencing) {
                    continue;
                }
                let keys = collect_keys(input, &table.name, &reference.column);
                requests.entry(referencing).or_default().add(&field.name, keys);
            }
        }

        if requests.is_empty() {
            let names: Vec<&str> = input.tables.iter().map(|t| t.name.as_str()).collect();
            return Err(NodeError::ReferenceNotFound(format!(
                "no tables reference {}",
                names.join(", ")
            )));
        }

        let selection = resolve(&ctx, &search_path(&ctx, input), requests).await?;
        Ok(finish(&ctx, selection))
    }

    fn description(&self) -> &str {
        "Loads rows of other tables that reference the incoming rows"
    }
}
