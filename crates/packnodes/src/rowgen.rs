//! Row generation: a per-row transformation pipeline fanned out to up to
//! four output tables.

use crate::common::table_input;
use async_trait::async_trait;
use packcore::kind::MAX_ROW_OUTPUTS;
use packcore::payload::TableSelection;
use packcore::{
    CounterRegistry, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row,
    TableData, Value,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// File name of generated tables unless an output names its own.
pub const GENERATED_FILE_NAME: &str = "packflow_generated";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Operation {
    Prefix {
        value: String,
    },
    Suffix {
        value: String,
    },
    Add {
        value: f64,
    },
    Subtract {
        value: f64,
    },
    Multiply {
        value: f64,
    },
    Divide {
        value: f64,
    },
    Counter {
        #[serde(default)]
        start: i64,
        #[serde(rename = "counterKey")]
        counter_key: Option<String>,
    },
    /// Drops rows whose source cell does not equal `value`.
    Filter {
        #[serde(default)]
        value: Value,
        #[serde(default)]
        negate: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transformation {
    #[serde(flatten)]
    operation: Operation,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    output_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputSpec {
    table_name: String,
    #[serde(default)]
    file_name: Option<String>,
    /// Target column to source column (input column or transformation output).
    #[serde(default)]
    columns: BTreeMap<String, String>,
    #[serde(default)]
    static_values: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RowGenerationConfig {
    #[serde(default)]
    transformations: Vec<Transformation>,
    #[serde(default)]
    outputs: Vec<OutputSpec>,
}

impl RowGenerationConfig {
    fn check(&self) -> Result<(), NodeError> {
        let malformed = |msg: String| Err(NodeError::MalformedConfiguration(msg));
        if self.outputs.len() > MAX_ROW_OUTPUTS {
            return malformed(format!(
                "{} outputs configured, at most {} are supported",
                self.outputs.len(),
                MAX_ROW_OUTPUTS
            ));
        }
        for (i, t) in self.transformations.iter().enumerate() {
            let is_filter = matches!(t.operation, Operation::Filter { .. });
            let is_counter = matches!(t.operation, Operation::Counter { .. });
            if !is_filter && t.output_name.as_deref().map_or(true, str::is_empty) {
                return malformed(format!("transformation {} has no outputName", i));
            }
            if !is_counter && t.source.as_deref().map_or(true, str::is_empty) {
                return malformed(format!("transformation {} has no source column", i));
            }
            if matches!(t.operation, Operation::Divide { value } if value == 0.0) {
                return malformed(format!("transformation {} divides by zero", i));
            }
        }
        if let Some(o) = self.outputs.iter().find(|o| o.table_name.trim().is_empty()) {
            return malformed(format!("output with columns {:?} has no tableName", o.columns.keys()));
        }
        Ok(())
    }

    /// Every column name a row can carry once the pipeline ran.
    fn check_references(&self, input_columns: Vec<String>) -> Result<HashSet<String>, NodeError> {
        let mut known: HashSet<String> = input_columns.into_iter().collect();
        for t in &self.transformations {
            if let Some(source) = &t.source {
                if !known.contains(source) {
                    return Err(NodeError::ReferenceNotFound(format!("source column '{}'", source)));
                }
            }
            if let Some(name) = &t.output_name {
                known.insert(name.clone());
            }
        }
        for output in &self.outputs {
            if let Some(source) = output.columns.values().find(|s| !known.contains(*s)) {
                return Err(NodeError::ReferenceNotFound(format!(
                    "column '{}' mapped into {}",
                    source, output.table_name
                )));
            }
        }
        Ok(known)
    }
}

enum Step {
    Keep,
    Drop,
}

fn arithmetic(cell: &Value, operand: f64, op: &Operation, column: &str) -> Result<Value, NodeError> {
    if cell.is_null() {
        return Ok(Value::Null);
    }
    let n = cell.as_f64().ok_or_else(|| {
        NodeError::ExecutionFailed(format!("value '{}' in column '{}' is not numeric", cell, column))
    })?;
    let integral = matches!(cell, Value::Integer(_)) && operand.fract() == 0.0;
    Ok(match op {
        Operation::Add { .. } => Value::number(n + operand, integral),
        Operation::Subtract { .. } => Value::number(n - operand, integral),
        Operation::Multiply { .. } => Value::number(n * operand, integral),
        _ => Value::Float(n / operand),
    })
}

fn apply(
    t: &Transformation,
    row: &mut Row,
    counters: &mut CounterRegistry,
    node_id: &str,
) -> Result<Step, NodeError> {
    let source = t.source.as_deref().unwrap_or_default();
    let cell = row.get(source).cloned().unwrap_or_default();
    let value = match &t.operation {
        Operation::Prefix { value } => Value::String(format!("{}{}", value, cell)),
        Operation::Suffix { value } => Value::String(format!("{}{}", cell, value)),
        op @ (Operation::Add { value }
        | Operation::Subtract { value }
        | Operation::Multiply { value }
        | Operation::Divide { value }) => arithmetic(&cell, *value, op, source)?,
        Operation::Counter { start, counter_key } => {
            let output = t.output_name.as_deref().unwrap_or_default();
            let key = counter_key
                .clone()
                .unwrap_or_else(|| format!("{}:{}", node_id, output));
            Value::Integer(counters.next(&key, *start))
        }
        Operation::Filter { value, negate } => {
            return Ok(if cell.matches(value) != *negate { Step::Keep } else { Step::Drop });
        }
    };
    if let Some(name) = &t.output_name {
        row.insert(name.clone(), value);
    }
    Ok(Step::Keep)
}

/// Generates new rows from the input through a transformation pipeline
pub struct GenerateRowsNode;

impl GenerateRowsNode {
    fn build_output(ctx: &NodeContext, spec: &OutputSpec, rows: &[Row]) -> TableData {
        let schema = ctx.services.schemas.schema_for(&spec.table_name, None);
        let columns = match schema {
            Some(schema) => schema.column_names(),
            None => {
                let mut columns: Vec<String> = spec.columns.keys().cloned().collect();
                columns.extend(
                    spec.static_values
                        .keys()
                        .filter(|k| !spec.columns.contains_key(*k))
                        .cloned(),
                );
                columns
            }
        };
        if let Some(schema) = schema {
            for target in spec.columns.keys().chain(spec.static_values.keys()) {
                if schema.field(target).is_none() {
                    ctx.events.warn(format!(
                        "{} has no column '{}', value dropped",
                        spec.table_name, target
                    ));
                }
            }
        }

        let generated = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| {
                        let field = schema.and_then(|s| s.field(column));
                        let raw = if let Some(source) = spec.columns.get(column) {
                            row.get(source).cloned().unwrap_or_default()
                        } else if let Some(fixed) = spec.static_values.get(column) {
                            fixed.clone()
                        } else if let Some(same) = row.get(column) {
                            same.clone()
                        } else {
                            field.map(|f| f.default_value()).unwrap_or_default()
                        };
                        let value = match field {
                            Some(f) => f.field_type.coerce(&raw).unwrap_or(raw),
                            None => raw,
                        };
                        (column.clone(), value)
                    })
                    .collect()
            })
            .collect();

        TableData {
            name: spec.table_name.clone(),
            file_name: spec
                .file_name
                .clone()
                .unwrap_or_else(|| GENERATED_FILE_NAME.to_string()),
            source: String::new(),
            version: schema.map(|s| s.version),
            columns,
            rows: generated,
        }
    }
}

#[async_trait]
impl NodeExecutor for GenerateRowsNode {
    fn kind(&self) -> NodeKind {
        NodeKind::GenerateRows
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: RowGenerationConfig = ctx.config()?;
        config.check()?;
        let input = table_input(&ctx)?;
        config.check_references(input.combined_columns())?;

        let mut rows = Vec::with_capacity(input.row_count());
        {
            let mut counters = ctx.counters.lock().await;
            // Sequences advance only for rows that are kept, and only once the
            // whole input went through without error.
            let mut committed = counters.clone();
            'rows: for row in input.all_rows() {
                let mut working = row.clone();
                let mut tentative = committed.clone();
                for t in &config.transformations {
                    if let Step::Drop = apply(t, &mut working, &mut tentative, &ctx.node_id)? {
                        continue 'rows;
                    }
                }
                committed = tentative;
                rows.push(working);
            }
            *counters = committed;
        }
        tracing::debug!("GenerateRows {} produced {} rows", ctx.node_id, rows.len());

        if config.outputs.is_empty() {
            let mut columns = input.combined_columns();
            for name in config.transformations.iter().filter_map(|t| t.output_name.as_ref()) {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
            let template = input.tables.first().map(TableData::empty_like).unwrap_or_default();
            let table = TableData {
                columns,
                rows,
                ..template
            };
            let count = table.rows.len();
            let selection = TableSelection::new(vec![table], input.source_files.clone());
            return Ok(NodeOutput::with_primary(Payload::TableSelection(selection)).with_metadata("rows", count));
        }

        let mut output = NodeOutput::new();
        let mut all = Vec::with_capacity(config.outputs.len());
        for (i, spec) in config.outputs.iter().enumerate() {
            let table = Self::build_output(&ctx, spec, &rows);
            output = output
                .with_output(
                    format!("output{}", i),
                    Payload::TableSelection(TableSelection::new(
                        vec![table.clone()],
                        input.source_files.clone(),
                    )),
                )
                .with_metadata(format!("output{}", i), table.rows.len());
            all.push(table);
        }
        output.primary = Some(Payload::TableSelection(TableSelection::new(
            all,
            input.source_files.clone(),
        )));
        Ok(output.with_metadata("rows", rows.len()))
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
        let config: RowGenerationConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::MalformedConfiguration(e.to_string()))?;
        config.check()
    }

    fn description(&self) -> &str {
        "Generates rows through a transformation pipeline into up to four tables"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_transformations() {
        let t: Transformation = serde_json::from_value(serde_json::json!({
            "type": "counter",
            "start": 10000,
            "outputName": "id"
        }))
        .unwrap();
        assert!(matches!(t.operation, Operation::Counter { start: 10000, counter_key: None }));
        assert_eq!(t.output_name.as_deref(), Some("id"));
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        let op = Operation::Multiply { value: 2.0 };
        assert_eq!(arithmetic(&Value::Integer(21), 2.0, &op, "x").unwrap(), Value::Integer(42));
        let half = Operation::Multiply { value: 0.5 };
        assert_eq!(arithmetic(&Value::Integer(3), 0.5, &half, "x").unwrap(), Value::Float(1.5));
        assert!(arithmetic(&Value::from("abc"), 1.0, &op, "x").is_err());
    }
}
