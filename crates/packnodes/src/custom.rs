use crate::common::require;
use async_trait::async_trait;
use packcore::payload::{CustomColumn, CustomSchema, TableSelection};
use packcore::schema::FieldType;
use packcore::{
    expect_input, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row,
    TableData, Value,
};
use serde::Deserialize;
use serde_json::Map;

/// Source name given to tables that were not read from an archive.
const CUSTOM_SOURCE: &str = "custom";

#[derive(Debug, Deserialize)]
struct CustomSchemaConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    columns: Vec<CustomColumn>,
}

/// Declares an ad hoc table layout
pub struct CustomSchemaNode;

#[async_trait]
impl NodeExecutor for CustomSchemaNode {
    fn kind(&self) -> NodeKind {
        NodeKind::CustomSchema
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: CustomSchemaConfig = ctx.config()?;
        require(&config.name, "name")?;
        if config.columns.is_empty() {
            return Err(NodeError::MalformedConfiguration("schema has no columns".to_string()));
        }
        if let Some(c) = config.columns.iter().find(|c| c.name.trim().is_empty()) {
            return Err(NodeError::MalformedConfiguration(format!(
                "unnamed {:?} column",
                c.field_type
            )));
        }
        Ok(NodeOutput::with_primary(Payload::CustomSchema(CustomSchema {
            name: config.name,
            columns: config.columns,
        })))
    }

    fn description(&self) -> &str {
        "Defines a custom table schema"
    }
}

#[derive(Debug, Deserialize)]
struct CustomRowsConfig {
    #[serde(default)]
    rows: Vec<Map<String, serde_json::Value>>,
}

/// Populates a custom schema with literal rows
pub struct CustomRowsInputNode;

#[async_trait]
impl NodeExecutor for CustomRowsInputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::CustomRowsInput
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: CustomRowsConfig = ctx.config()?;
        let schema = expect_input!(ctx.input, CustomSchema)?;

        let mut rows = Vec::with_capacity(config.rows.len());
        for (i, literal) in config.rows.iter().enumerate() {
            if let Some(unknown) = literal.keys().find(|k| !schema.columns.iter().any(|c| &c.name == *k)) {
                return Err(NodeError::MalformedConfiguration(format!(
                    "row {} sets unknown column '{}'",
                    i, unknown
                )));
            }
            let mut row = Row::new();
            for column in &schema.columns {
                let raw: Value = match literal.get(&column.name) {
                    Some(json) => serde_json::from_value(json.clone()).map_err(|e| {
                        NodeError::MalformedConfiguration(format!("row {} column '{}': {}", i, column.name, e))
                    })?,
                    None => Value::Null,
                };
                let value = column.field_type.coerce(&raw).map_err(|e| {
                    NodeError::MalformedConfiguration(format!("row {} column '{}': {}", i, column.name, e))
                })?;
                row.insert(column.name.clone(), value);
            }
            rows.push(row);
        }

        let table = TableData {
            source: CUSTOM_SOURCE.to_string(),
            ..TableData::new(
                schema.name.clone(),
                schema.columns.iter().map(|c| c.name.clone()).collect(),
            )
        }
        .with_rows(rows);
        let count = table.rows.len();
        Ok(
            NodeOutput::with_primary(Payload::TableSelection(TableSelection::new(vec![table], Vec::new())))
                .with_metadata("rows", count),
        )
    }

    fn description(&self) -> &str {
        "Creates rows of a custom schema from literal values"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadTsvConfig {
    #[serde(default)]
    file_path: String,
    table_name: Option<String>,
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_has_header")]
    has_header: bool,
    columns: Option<Vec<CustomColumn>>,
    #[serde(default)]
    skip_lines: usize,
}

fn default_delimiter() -> String {
    "\t".to_string()
}

fn default_has_header() -> bool {
    true
}

/// Reads a delimited text entry from the first loaded archive holding it
pub struct ReadTsvFromPackNode;

impl ReadTsvFromPackNode {
    fn delimiter(config: &ReadTsvConfig) -> Result<u8, NodeError> {
        match config.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(NodeError::MalformedConfiguration(format!(
                "delimiter must be a single byte, got {:?}",
                config.delimiter
            ))),
        }
    }

    fn parse(
        ctx: &NodeContext,
        config: &ReadTsvConfig,
        table_name: &str,
        text: &str,
    ) -> Result<(Vec<CustomColumn>, Vec<Row>), NodeError> {
        let body: String = text
            .lines()
            .skip(config.skip_lines)
            .flat_map(|line| [line, "\n"])
            .collect();

        // Metadata lines such as `#units_tables;5;db/...` are comments.
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(Self::delimiter(config)?)
            .has_headers(config.has_header)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::Headers)
            .from_reader(body.as_bytes());

        let header: Option<Vec<String>> = if config.has_header {
            let record = reader
                .headers()
                .map_err(|e| NodeError::ExecutionFailed(format!("header: {}", e)))?;
            (!record.is_empty()).then(|| record.iter().map(str::to_string).collect())
        } else {
            None
        };

        let columns: Vec<CustomColumn> = match (&config.columns, header) {
            (Some(columns), _) => columns.clone(),
            (None, Some(names)) => {
                let schema = ctx.services.schemas.schema_for(table_name, None);
                names
                    .into_iter()
                    .map(|name| CustomColumn {
                        field_type: schema
                            .and_then(|s| s.field(&name))
                            .map_or(FieldType::StringU8, |f| f.field_type),
                        name,
                    })
                    .collect()
            }
            (None, None) => {
                return Err(NodeError::MalformedConfiguration(
                    "without a header line the columns must be configured".to_string(),
                ))
            }
        };

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| NodeError::ExecutionFailed(format!("record {}: {}", i + 1, e)))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let mut row = Row::new();
            for (j, column) in columns.iter().enumerate() {
                let raw = record.get(j).unwrap_or_default();
                let value = column.field_type.parse(raw).map_err(|e| {
                    NodeError::ExecutionFailed(format!("record {} column '{}': {}", i + 1, column.name, e))
                })?;
                row.insert(column.name.clone(), value);
            }
            rows.push(row);
        }
        Ok((columns, rows))
    }
}

#[async_trait]
impl NodeExecutor for ReadTsvFromPackNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ReadTsvFromPack
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: ReadTsvConfig = ctx.config()?;
        require(&config.file_path, "filePath")?;
        Self::delimiter(&config)?;
        let packs = expect_input!(ctx.input, PackFiles)?;

        let (pack, text) = packs
            .loaded()
            .find_map(|(pack, archive)| {
                archive
                    .entry(&config.file_path)
                    .and_then(|e| e.data.as_text())
                    .map(|text| (pack, text))
            })
            .ok_or_else(|| NodeError::ReferenceNotFound(format!("text entry {}", config.file_path)))?;

        let table_name = config.table_name.clone().unwrap_or_else(|| {
            let file = packcore::archive::archive_name(&config.file_path);
            file.rsplit_once('.').map_or(file, |(stem, _)| stem).to_string()
        });
        let (columns, rows) = Self::parse(&ctx, &config, &table_name, text)?;

        let table = TableData {
            source: pack.path.clone(),
            ..TableData::new(table_name, columns.iter().map(|c| c.name.clone()).collect())
        }
        .with_rows(rows);
        let count = table.rows.len();
        Ok(NodeOutput::with_primary(Payload::TableSelection(TableSelection::new(
            vec![table],
            vec![pack.path.clone()],
        )))
        .with_metadata("rows", count))
    }

    fn description(&self) -> &str {
        "Reads a TSV entry from a pack into a table"
    }
}
