use crate::common::{require, table_input};
use async_trait::async_trait;
use packcore::payload::TableSelection;
use packcore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row, TableData, Value};
use serde::Deserialize;

/// TSV rendering of `table`, header line first. Cells holding a tab,
/// newline or quote are quoted.
pub fn table_to_tsv(table: &TableData) -> Result<String, NodeError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_writer(Vec::new());
    let failed = |e: csv::Error| NodeError::ExecutionFailed(format!("TSV dump of {}: {}", table.name, e));

    writer.write_record(&table.columns).map_err(failed)?;
    for row in &table.rows {
        let cells: Vec<String> = table
            .columns
            .iter()
            .map(|c| row.get(c).map(Value::to_string).unwrap_or_default())
            .collect();
        writer.write_record(&cells).map_err(failed)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| NodeError::ExecutionFailed(format!("TSV dump of {}: {}", table.name, e)))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| NodeError::ExecutionFailed(format!("TSV dump of {}: {}", table.name, e)))?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpConfig {
    output_path: Option<String>,
}

/// Renders tables as TSV text, optionally writing it to disk
pub struct DumpToTsvNode;

#[async_trait]
impl NodeExecutor for DumpToTsvNode {
    fn kind(&self) -> NodeKind {
        NodeKind::DumpToTsv
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: DumpConfig = ctx.config()?;
        let input = table_input(&ctx)?;

        let text = input
            .tables
            .iter()
            .map(|t| Ok(format!("# {}/{}\n{}", t.name, t.file_name, table_to_tsv(t)?)))
            .collect::<Result<Vec<_>, NodeError>>()?
            .join("\n\n");

        let mut output = NodeOutput::new();
        if let Some(path) = config.output_path.as_deref().filter(|p| !p.trim().is_empty()) {
            if let Some(parent) = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| NodeError::IoFailure(format!("{}: {}", parent.display(), e)))?;
            }
            tokio::fs::write(path, &text)
                .await
                .map_err(|e| NodeError::IoFailure(format!("{}: {}", path, e)))?;
            tracing::debug!("Dumped {} tables to {}", input.tables.len(), path);
            output = output.with_metadata("path", path);
        }
        output.primary = Some(Payload::Text(text));
        Ok(output.with_metadata("tables", input.tables.len()))
    }

    fn description(&self) -> &str {
        "Dumps tables as TSV text"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectorConfig {
    #[serde(default)]
    column: String,
    #[serde(default)]
    table_name: String,
    output_column: Option<String>,
}

/// Gathers the numeric values of one column across every table
pub struct ColumnCollectorNode;

#[async_trait]
impl NodeExecutor for ColumnCollectorNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ColumnCollector
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: CollectorConfig = ctx.config()?;
        require(&config.column, "column")?;
        require(&config.table_name, "tableName")?;
        let input = table_input(&ctx)?;

        if !input.tables.iter().any(|t| t.has_column(&config.column)) {
            return Err(NodeError::ReferenceNotFound(format!("column '{}'", config.column)));
        }
        let output_column = config.output_column.clone().unwrap_or_else(|| config.column.clone());
        let rows: Vec<Row> = input
            .tables
            .iter()
            .filter(|t| t.has_column(&config.column))
            .flat_map(|t| t.rows.iter())
            .filter_map(|row| {
                let value = row.get(&config.column)?;
                let collected = match value {
                    Value::Integer(_) | Value::Float(_) => value.clone(),
                    other => Value::Float(other.as_f64()?),
                };
                Some(Row::from([(output_column.clone(), collected)]))
            })
            .collect();

        let table = TableData::new(config.table_name.clone(), vec![output_column.clone()]).with_rows(rows);
        let count = table.rows.len();
        Ok(NodeOutput::with_primary(Payload::TableSelection(TableSelection::new(
            vec![table],
            input.source_files.clone(),
        )))
        .with_metadata("values", count))
    }

    fn description(&self) -> &str {
        "Collects numeric values of a column into a single-column table"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_and_quotes_tabs() {
        let mut row = Row::new();
        row.insert("key".into(), Value::from("a\tb"));
        row.insert("cost".into(), Value::Integer(5));
        let mut empty = Row::new();
        empty.insert("key".into(), Value::from("bow"));
        let table =
            TableData::new("units_tables", vec!["key".into(), "cost".into()]).with_rows(vec![row, empty]);
        assert_eq!(table_to_tsv(&table).unwrap(), "key\tcost\n\"a\tb\"\t5\nbow\t");
    }
}
