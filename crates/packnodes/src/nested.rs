use crate::common::Predicate;
use async_trait::async_trait;
use packcore::payload::{NestedRow, NestedTableSelection, TableSelection};
use packcore::table::{prefix_columns, prefix_row};
use packcore::{
    expect_input, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row,
    TableData, Value,
};
use serde::Deserialize;

fn nested_input(ctx: &NodeContext) -> Result<&NestedTableSelection, NodeError> {
    expect_input!(ctx.input, NestedTableSelection)
}

fn flat_table(nested: &NestedTableSelection, columns: Vec<String>, rows: Vec<Row>) -> TableSelection {
    let table = TableData {
        columns,
        rows,
        ..TableData::new(nested.source_table.clone(), Vec::new())
    };
    TableSelection::new(vec![table], nested.source_files.clone())
}

fn null_match(nested: &NestedTableSelection) -> Row {
    nested
        .nested_columns
        .iter()
        .map(|c| (format!("{}_{}", nested.nested_table, c), Value::Null))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlattenConfig {
    #[serde(default = "default_keep")]
    keep_unmatched: bool,
}

fn default_keep() -> bool {
    true
}

/// Expands each nested row into one flat row per match
pub struct FlattenNestedNode;

#[async_trait]
impl NodeExecutor for FlattenNestedNode {
    fn kind(&self) -> NodeKind {
        NodeKind::FlattenNested
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: FlattenConfig = ctx.config()?;
        let nested = nested_input(&ctx)?;

        let mut rows = Vec::new();
        for NestedRow { row, matches } in &nested.rows {
            let base = prefix_row(row, &nested.source_table);
            if matches.is_empty() {
                if config.keep_unmatched {
                    let mut flat = base;
                    flat.extend(null_match(nested));
                    rows.push(flat);
                }
                continue;
            }
            for m in matches {
                let mut flat = base.clone();
                flat.extend(prefix_row(m, &nested.nested_table));
                rows.push(flat);
            }
        }

        let mut columns = prefix_columns(&nested.source_columns, &nested.source_table);
        columns.extend(prefix_columns(&nested.nested_columns, &nested.nested_table));
        let selection = flat_table(nested, columns, rows);
        let count = selection.row_count();
        Ok(NodeOutput::with_primary(Payload::TableSelection(selection)).with_metadata("rows", count))
    }

    fn description(&self) -> &str {
        "Flattens nested join results into rows"
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum NestedOperation {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl NestedOperation {
    fn name(self) -> &'static str {
        match self {
            NestedOperation::Min => "min",
            NestedOperation::Max => "max",
            NestedOperation::Sum => "sum",
            NestedOperation::Avg => "avg",
            NestedOperation::Count => "count",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateNestedConfig {
    column: String,
    operation: NestedOperation,
    filter: Option<Predicate>,
    output_column: Option<String>,
}

/// Reduces the matches of each nested row
///
/// `min`/`max` keep the whole winning match next to the source row;
/// `sum`/`avg`/`count` append a single scalar column.
pub struct AggregateNestedNode;

#[async_trait]
impl NodeExecutor for AggregateNestedNode {
    fn kind(&self) -> NodeKind {
        NodeKind::AggregateNested
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: AggregateNestedConfig = ctx.config()?;
        crate::common::require(&config.column, "column")?;
        let nested = nested_input(&ctx)?;
        if config.operation != NestedOperation::Count && !nested.nested_columns.contains(&config.column) {
            return Err(NodeError::ReferenceNotFound(format!(
                "column '{}' in {}",
                config.column, nested.nested_table
            )));
        }

        let output_column = config
            .output_column
            .clone()
            .unwrap_or_else(|| format!("{}_{}", config.operation.name(), config.column));
        let mut columns = prefix_columns(&nested.source_columns, &nested.source_table);
        let row_preserving = matches!(config.operation, NestedOperation::Min | NestedOperation::Max);
        if row_preserving {
            columns.extend(prefix_columns(&nested.nested_columns, &nested.nested_table));
        } else {
            columns.push(output_column.clone());
        }

        let mut rows = Vec::with_capacity(nested.rows.len());
        for NestedRow { row, matches } in &nested.rows {
            let candidates: Vec<&Row> = matches
                .iter()
                .filter(|m| config.filter.as_ref().map_or(true, |f| f.test(m)))
                .collect();
            let values: Vec<&Value> = candidates
                .iter()
                .filter_map(|m| m.get(&config.column))
                .filter(|v| !v.is_null())
                .collect();

            let mut out = prefix_row(row, &nested.source_table);
            match config.operation {
                NestedOperation::Min | NestedOperation::Max => {
                    let pick = candidates
                        .iter()
                        .copied()
                        .filter(|m| m.get(&config.column).is_some_and(|v| !v.is_null()))
                        .reduce(|best, m| {
                            let ord = m[&config.column].compare(&best[&config.column]);
                            let better = if config.operation == NestedOperation::Min {
                                ord.is_lt()
                            } else {
                                ord.is_gt()
                            };
                            if better {
                                m
                            } else {
                                best
                            }
                        });
                    match pick {
                        Some(m) => out.extend(prefix_row(m, &nested.nested_table)),
                        None => out.extend(null_match(nested)),
                    }
                }
                NestedOperation::Count => {
                    out.insert(output_column.clone(), Value::Integer(candidates.len() as i64));
                }
                NestedOperation::Sum | NestedOperation::Avg => {
                    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                    let integral = values.iter().all(|v| matches!(v, Value::Integer(_)));
                    let value = if numbers.is_empty() {
                        Value::Null
                    } else if config.operation == NestedOperation::Sum {
                        Value::number(numbers.iter().sum(), integral)
                    } else {
                        Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
                    };
                    out.insert(output_column.clone(), value);
                }
            }
            rows.push(out);
        }

        let selection = flat_table(nested, columns, rows);
        let count = selection.row_count();
        Ok(NodeOutput::with_primary(Payload::TableSelection(selection)).with_metadata("rows", count))
    }

    fn description(&self) -> &str {
        "Aggregates the matches of each nested row"
    }
}
