use crate::common::{table_input, Predicate};
use async_trait::async_trait;
use packcore::payload::TableSelection;
use packcore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row, TableData, Value};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum AggregateFunction {
    Max,
    Min,
    Sum,
    Avg,
    Count,
    First,
    Last,
}

#[derive(Debug, Clone, Deserialize)]
struct Aggregation {
    name: String,
    #[serde(default)]
    column: Option<String>,
    function: AggregateFunction,
    /// Only rows satisfying this take part.
    condition: Option<Predicate>,
    /// Used when no row qualifies.
    default: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupByConfig {
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    aggregations: Vec<Aggregation>,
}

impl Aggregation {
    fn apply(&self, rows: &[&Row]) -> Value {
        let qualifying: Vec<&Row> = rows
            .iter()
            .copied()
            .filter(|r| self.condition.as_ref().map_or(true, |c| c.test(r)))
            .collect();
        let cells: Vec<&Value> = match &self.column {
            Some(column) => qualifying
                .iter()
                .filter_map(|r| r.get(column))
                .filter(|v| !v.is_null())
                .collect(),
            None => Vec::new(),
        };

        let result = match self.function {
            AggregateFunction::Count => {
                let n = if self.column.is_some() { cells.len() } else { qualifying.len() };
                return Value::Integer(n as i64);
            }
            AggregateFunction::First => cells.first().map(|v| (*v).clone()),
            AggregateFunction::Last => cells.last().map(|v| (*v).clone()),
            AggregateFunction::Max => cells.iter().copied().max_by(|a, b| a.compare(b)).cloned(),
            AggregateFunction::Min => cells.iter().copied().min_by(|a, b| a.compare(b)).cloned(),
            AggregateFunction::Sum | AggregateFunction::Avg => {
                let numbers: Vec<f64> = cells.iter().filter_map(|v| v.as_f64()).collect();
                if numbers.is_empty() {
                    None
                } else if self.function == AggregateFunction::Sum {
                    let integral = cells.iter().all(|v| matches!(v, Value::Integer(_)));
                    Some(Value::number(numbers.iter().sum(), integral))
                } else {
                    Some(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
                }
            }
        };
        result
            .or_else(|| self.default.clone())
            .unwrap_or(Value::Null)
    }
}

/// Groups rows and computes named aggregations per group
pub struct GroupByNode;

#[async_trait]
impl NodeExecutor for GroupByNode {
    fn kind(&self) -> NodeKind {
        NodeKind::GroupBy
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: GroupByConfig = ctx.config()?;
        let input = table_input(&ctx)?;
        let known = input.combined_columns();
        let referenced = config
            .group_by
            .iter()
            .chain(config.aggregations.iter().filter_map(|a| a.column.as_ref()));
        for column in referenced {
            if !known.contains(column) {
                return Err(NodeError::ReferenceNotFound(format!("column '{}'", column)));
            }
        }

        // Groups keep first-seen order.
        let mut order: Vec<(Vec<Value>, Vec<&Row>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for row in input.all_rows() {
            let key: Vec<Value> = config
                .group_by
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect();
            let fingerprint = serde_json::to_string(&key).unwrap_or_default();
            let slot = *positions.entry(fingerprint).or_insert_with(|| {
                order.push((key, Vec::new()));
                order.len() - 1
            });
            order[slot].1.push(row);
        }

        let mut rows = Vec::with_capacity(order.len());
        for (key, members) in &order {
            let mut out: Row = config.group_by.iter().cloned().zip(key.iter().cloned()).collect();
            for aggregation in &config.aggregations {
                out.insert(aggregation.name.clone(), aggregation.apply(members));
            }
            rows.push(out);
        }

        let mut columns = config.group_by.clone();
        columns.extend(config.aggregations.iter().map(|a| a.name.clone()));
        let template = input
            .tables
            .first()
            .map(TableData::empty_like)
            .unwrap_or_default();
        let table = TableData {
            columns,
            rows,
            ..template
        };
        let groups = table.rows.len();
        Ok(
            NodeOutput::with_primary(Payload::TableSelection(TableSelection::new(
                vec![table],
                input.source_files.clone(),
            )))
            .with_metadata("groups", groups),
        )
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
        let config: GroupByConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::MalformedConfiguration(e.to_string()))?;
        if let Some(a) = config
            .aggregations
            .iter()
            .find(|a| a.column.is_none() && a.function != AggregateFunction::Count)
        {
            return Err(NodeError::MalformedConfiguration(format!(
                "aggregation '{}' needs a column",
                a.name
            )));
        }
        Ok(())
    }

    fn description(&self) -> &str {
        "Groups rows by columns and aggregates each group"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tier: i64, cost: i64) -> Row {
        let mut r = Row::new();
        r.insert("tier".into(), Value::Integer(tier));
        r.insert("cost".into(), Value::Integer(cost));
        r
    }

    #[test]
    fn condition_falls_back_to_default() {
        let rows = [row(1, 100), row(1, 300)];
        let refs: Vec<&Row> = rows.iter().collect();
        let expensive = Aggregation {
            name: "max_cost".into(),
            column: Some("cost".into()),
            function: AggregateFunction::Max,
            condition: Some(Predicate {
                column: "cost".into(),
                value: Value::Integer(999),
                negate: false,
            }),
            default: Some(Value::Integer(-1)),
        };
        assert_eq!(expensive.apply(&refs), Value::Integer(-1));

        let total = Aggregation {
            name: "total".into(),
            column: Some("cost".into()),
            function: AggregateFunction::Sum,
            condition: None,
            default: None,
        };
        assert_eq!(total.apply(&refs), Value::Integer(400));
    }
}
