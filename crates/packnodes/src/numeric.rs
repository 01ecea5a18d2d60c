use crate::common::union_sources;
use async_trait::async_trait;
use packcore::payload::{ChangedColumnSelection, ColumnChange};
use packcore::{
    expect_input, NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, Payload,
    Value,
};
use rhai::{Dynamic, Engine, Scope, AST};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AdjustmentConfig {
    #[serde(default)]
    expression: String,
}

/// Applies a user expression to every selected cell. The cell is bound to
/// `value`; integer cells are rounded back to integers.
pub struct NumericAdjustmentNode {
    engine: Engine,
}

impl NumericAdjustmentNode {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        // Expressions run once per cell; keep runaway scripts bounded.
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(16);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(1_000);
        Self { engine }
    }

    fn compile(&self, expression: &str) -> Result<AST, NodeError> {
        if expression.trim().is_empty() {
            return Err(NodeError::MalformedConfiguration("'expression' is required".to_string()));
        }
        self.engine
            .compile_expression(expression)
            .map_err(|e| NodeError::MalformedConfiguration(format!("expression '{}': {}", expression, e)))
    }

    fn evaluate(&self, ast: &AST, value: f64) -> Result<f64, NodeError> {
        let mut scope = Scope::new();
        scope.push("value", value);
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|e| NodeError::ExecutionFailed(format!("expression failed for {}: {}", value, e)))?;
        let n = if let Ok(f) = result.as_float() {
            f
        } else if let Ok(i) = result.as_int() {
            i as f64
        } else {
            return Err(NodeError::ExecutionFailed(format!(
                "expression returned {} instead of a number",
                result.type_name()
            )));
        };
        if !n.is_finite() {
            return Err(NodeError::ExecutionFailed(format!("expression produced {} for {}", n, value)));
        }
        Ok(n)
    }
}

impl Default for NumericAdjustmentNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for NumericAdjustmentNode {
    fn kind(&self) -> NodeKind {
        NodeKind::NumericAdjustment
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: AdjustmentConfig = ctx.config()?;
        let ast = self.compile(&config.expression)?;
        let selection = expect_input!(ctx.input, ColumnSelection)?;

        let mut changes = Vec::with_capacity(selection.columns.len());
        for slice in &selection.columns {
            ctx.check_cancelled()?;
            let mut values = Vec::with_capacity(slice.table.rows.len());
            for cell in slice.values() {
                if cell.is_null() {
                    values.push(Value::Null);
                    continue;
                }
                let n = cell.as_f64().ok_or_else(|| {
                    NodeError::ExecutionFailed(format!(
                        "{}.{} holds non-numeric value '{}'",
                        slice.table.name, slice.column, cell
                    ))
                })?;
                let adjusted = self.evaluate(&ast, n)?;
                values.push(Value::number(adjusted, matches!(cell, Value::Integer(_))));
            }
            changes.push(ColumnChange {
                table: slice.table.clone(),
                column: slice.column.clone(),
                values,
            });
        }

        let count = changes.len();
        Ok(NodeOutput::with_primary(Payload::ChangedColumnSelection(ChangedColumnSelection {
            changes,
            source_files: selection.source_files.clone(),
        }))
        .with_metadata("columns", count))
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
        let config: AdjustmentConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::MalformedConfiguration(e.to_string()))?;
        self.compile(&config.expression).map(|_| ())
    }

    fn description(&self) -> &str {
        "Adjusts numeric columns with an expression over `value`"
    }
}

fn changes_input(ctx: &NodeContext) -> Result<&ChangedColumnSelection, NodeError> {
    expect_input!(ctx.input, ChangedColumnSelection)
}

fn map_changes(input: &ChangedColumnSelection, f: impl Fn(&Value) -> Value) -> NodeOutput {
    let changes: Vec<ColumnChange> = input.changes.iter().map(|c| c.map_values(&f)).collect();
    NodeOutput::with_primary(Payload::ChangedColumnSelection(ChangedColumnSelection {
        changes,
        source_files: input.source_files.clone(),
    }))
}

#[derive(Debug, Deserialize)]
struct ClampConfig {
    min: f64,
}

pub struct ClampMinNode;

#[async_trait]
impl NodeExecutor for ClampMinNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ClampMin
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let ClampConfig { min } = ctx.config()?;
        let input = changes_input(&ctx)?;
        Ok(map_changes(input, |v| match (v, v.as_f64()) {
            (Value::Integer(_), Some(n)) if n < min => Value::Integer(min.ceil() as i64),
            (_, Some(n)) if n < min => Value::Float(min),
            _ => v.clone(),
        }))
    }

    fn description(&self) -> &str {
        "Raises changed values below a floor to the floor"
    }
}

pub struct RoundUpNode;

#[async_trait]
impl NodeExecutor for RoundUpNode {
    fn kind(&self) -> NodeKind {
        NodeKind::RoundUp
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = changes_input(&ctx)?;
        Ok(map_changes(input, |v| match v {
            Value::Float(f) => Value::Float(f.ceil()),
            Value::String(_) => v.as_f64().map_or_else(|| v.clone(), |n| Value::Float(n.ceil())),
            _ => v.clone(),
        }))
    }

    fn description(&self) -> &str {
        "Rounds changed values up to the next whole number"
    }
}

/// Unions several change sets; a later change to the same column of the
/// same table replaces an earlier one.
pub struct MergeChangesNode;

#[async_trait]
impl NodeExecutor for MergeChangesNode {
    fn kind(&self) -> NodeKind {
        NodeKind::MergeChanges
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let payloads: Vec<&Payload> = match &ctx.input {
            NodeInput::Many(items) => items.iter().collect(),
            other => other.payloads(),
        };
        if payloads.is_empty() {
            return Err(NodeError::MissingInput("changes".to_string()));
        }

        let mut merged: Vec<ColumnChange> = Vec::new();
        let mut sources = Vec::new();
        for payload in payloads {
            let Payload::ChangedColumnSelection(selection) = payload else {
                return Err(NodeError::invalid_input(
                    "ChangedColumnSelection",
                    payload.port_type().to_string(),
                ));
            };
            sources.push(&selection.source_files);
            for change in &selection.changes {
                let existing = merged
                    .iter_mut()
                    .find(|c| c.column == change.column && c.table.identity() == change.table.identity());
                match existing {
                    Some(slot) => *slot = change.clone(),
                    None => merged.push(change.clone()),
                }
            }
        }

        let count = merged.len();
        Ok(NodeOutput::with_primary(Payload::ChangedColumnSelection(ChangedColumnSelection {
            changes: merged,
            source_files: union_sources(sources),
        }))
        .with_metadata("columns", count))
    }

    fn description(&self) -> &str {
        "Merges several change sets into one"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_expressions_over_value() {
        let node = NumericAdjustmentNode::new();
        let ast = node.compile("value * 1.5 + 2").unwrap();
        assert_eq!(node.evaluate(&ast, 10.0).unwrap(), 17.0);
        assert!(node.compile("value *").is_err());
        let text = node.compile("\"abc\"").unwrap();
        assert!(node.evaluate(&text, 1.0).is_err());
    }
}
