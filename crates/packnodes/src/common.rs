//! Helpers shared by several executors.

use packcore::payload::TableSelection;
use packcore::{expect_input, NodeContext, NodeError, Row, Value};
use serde::Deserialize;

/// The table selection a single-input node was handed.
pub(crate) fn table_input(ctx: &NodeContext) -> Result<&TableSelection, NodeError> {
    expect_input!(ctx.input, TableSelection)
}

/// `column == value`, inverted by `negate`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Predicate {
    pub column: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub negate: bool,
}

impl Predicate {
    pub fn test(&self, row: &Row) -> bool {
        let cell = row.get(&self.column).unwrap_or(&Value::Null);
        cell.matches(&self.value) != self.negate
    }
}

/// Fails with `MalformedConfiguration` when `value` is empty.
pub(crate) fn require(value: &str, field: &str) -> Result<(), NodeError> {
    if value.trim().is_empty() {
        return Err(NodeError::MalformedConfiguration(format!("'{}' is required", field)));
    }
    Ok(())
}

/// Substitutes `{column}` placeholders with the row's cells. Unknown
/// placeholders are left untouched.
pub(crate) fn render_pattern(pattern: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub(crate) fn render_row(pattern: &str, row: &Row) -> String {
    render_pattern(pattern, |name| row.get(name).map(ToString::to_string))
}

/// Ordered union of source file lists without duplicates.
pub(crate) fn union_sources<'a>(lists: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for list in lists {
        for file in list {
            if !out.contains(file) {
                out.push(file.clone());
            }
        }
    }
    out
}
