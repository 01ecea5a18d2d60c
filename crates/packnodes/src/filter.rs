use crate::common::{table_input, Predicate};
use async_trait::async_trait;
use packcore::payload::TableSelection;
use packcore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload, Row, Value};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Operator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Deserialize)]
struct FilterRule {
    #[serde(flatten)]
    predicate: Predicate,
    /// Combines this rule with the result of the rules before it.
    #[serde(default)]
    operator: Operator,
}

#[derive(Debug, Deserialize)]
struct FilterConfig {
    #[serde(default)]
    filters: Vec<FilterRule>,
    // Single-rule shorthand.
    column: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    negate: bool,
}

impl FilterConfig {
    fn rules(self) -> Result<Vec<FilterRule>, NodeError> {
        if !self.filters.is_empty() {
            return Ok(self.filters);
        }
        match self.column {
            Some(column) => Ok(vec![FilterRule {
                predicate: Predicate {
                    column,
                    value: self.value,
                    negate: self.negate,
                },
                operator: Operator::And,
            }]),
            None => Err(NodeError::MalformedConfiguration(
                "filter needs at least one rule".to_string(),
            )),
        }
    }
}

/// Evaluates the rules left to right; the first rule's operator is ignored.
fn evaluate(rules: &[FilterRule], row: &Row) -> bool {
    let mut rules = rules.iter();
    let Some(first) = rules.next() else {
        return true;
    };
    let mut acc = first.predicate.test(row);
    for rule in rules {
        acc = match rule.operator {
            Operator::And => acc && rule.predicate.test(row),
            Operator::Or => acc || rule.predicate.test(row),
        };
    }
    acc
}

/// Splits rows into a matching and an `else` output
pub struct FilterNode;

#[async_trait]
impl NodeExecutor for FilterNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let rules = ctx.config::<FilterConfig>()?.rules()?;
        let input = table_input(&ctx)?;

        let mut matched = TableSelection::new(Vec::new(), input.source_files.clone());
        let mut rejected = TableSelection::new(Vec::new(), input.source_files.clone());
        for table in &input.tables {
            let (yes, no): (Vec<Row>, Vec<Row>) =
                table.rows.iter().cloned().partition(|row| evaluate(&rules, row));
            matched.tables.push(table.empty_like().with_rows(yes));
            rejected.tables.push(table.empty_like().with_rows(no));
        }

        let (hits, misses) = (matched.row_count(), rejected.row_count());
        tracing::debug!("Filter {} matched {} rows, {} went to else", ctx.node_id, hits, misses);
        Ok(NodeOutput::with_primary(Payload::TableSelection(matched))
            .with_else(Payload::TableSelection(rejected))
            .with_metadata("matched", hits)
            .with_metadata("unmatched", misses))
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
        let config: FilterConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::MalformedConfiguration(e.to_string()))?;
        config.rules().map(|_| ())
    }

    fn description(&self) -> &str {
        "Filters rows by column values, sending the rest to the else output"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(column: &str, value: &str, operator: Operator) -> FilterRule {
        FilterRule {
            predicate: Predicate {
                column: column.into(),
                value: Value::from(value),
                negate: false,
            },
            operator,
        }
    }

    #[test]
    fn combines_left_to_right() {
        let mut row = Row::new();
        row.insert("a".into(), Value::from("x"));
        row.insert("b".into(), Value::from("y"));
        // (a == z AND b == y) OR a == x
        let rules = vec![
            rule("a", "z", Operator::And),
            rule("b", "y", Operator::And),
            rule("a", "x", Operator::Or),
        ];
        assert!(evaluate(&rules, &row));
        assert!(!evaluate(&rules[..2], &row));
    }
}
