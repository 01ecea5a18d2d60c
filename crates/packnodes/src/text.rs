//! Text rendering nodes.

use crate::common::{render_pattern, render_row, require, table_input};
use async_trait::async_trait;
use packcore::payload::TextGroup;
use packcore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct PatternConfig {
    #[serde(default)]
    pattern: String,
}

/// One line per row, rendered from a `{column}` pattern
pub struct ColumnsToTextNode;

#[async_trait]
impl NodeExecutor for ColumnsToTextNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ColumnsToText
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: PatternConfig = ctx.config()?;
        require(&config.pattern, "pattern")?;
        let input = table_input(&ctx)?;
        let lines: Vec<String> = input.all_rows().map(|row| render_row(&config.pattern, row)).collect();
        let count = lines.len();
        Ok(NodeOutput::with_primary(Payload::TextLines(lines)).with_metadata("lines", count))
    }

    fn description(&self) -> &str {
        "Renders each row as a line of text"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupedPatternConfig {
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    pattern: String,
}

/// Like [`ColumnsToTextNode`], with lines grouped by key columns in
/// first-seen order
pub struct GroupedColumnsToTextNode;

#[async_trait]
impl NodeExecutor for GroupedColumnsToTextNode {
    fn kind(&self) -> NodeKind {
        NodeKind::GroupedColumnsToText
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: GroupedPatternConfig = ctx.config()?;
        require(&config.pattern, "pattern")?;
        if config.group_by.is_empty() {
            return Err(NodeError::MalformedConfiguration("'groupBy' is required".to_string()));
        }
        let input = table_input(&ctx)?;

        let mut groups: Vec<TextGroup> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for row in input.all_rows() {
            let key = config
                .group_by
                .iter()
                .map(|c| row.get(c).map(ToString::to_string).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(", ");
            let slot = *positions.entry(key.clone()).or_insert_with(|| {
                groups.push(TextGroup {
                    key,
                    lines: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].lines.push(render_row(&config.pattern, row));
        }

        let count = groups.len();
        Ok(NodeOutput::with_primary(Payload::GroupedText(groups)).with_metadata("groups", count))
    }

    fn description(&self) -> &str {
        "Renders rows as text lines grouped by key columns"
    }
}

/// Applies `f` to every piece of text, keeping the payload's shape.
fn map_text(payload: &Payload, f: impl Fn(&str) -> String) -> Result<Payload, NodeError> {
    Ok(match payload {
        Payload::Text(text) => Payload::Text(f(text)),
        Payload::TextLines(lines) => Payload::TextLines(lines.iter().map(|l| f(l)).collect()),
        Payload::GroupedText(groups) => Payload::GroupedText(
            groups
                .iter()
                .map(|g| TextGroup {
                    key: g.key.clone(),
                    lines: g.lines.iter().map(|l| f(l)).collect(),
                })
                .collect(),
        ),
        other => {
            return Err(NodeError::invalid_input(
                "Text, TextLines or GroupedText",
                other.port_type().to_string(),
            ))
        }
    })
}

#[derive(Debug, Default, Deserialize)]
struct SurroundConfig {
    #[serde(default)]
    before: String,
    #[serde(default)]
    after: String,
}

pub struct TextSurroundNode;

#[async_trait]
impl NodeExecutor for TextSurroundNode {
    fn kind(&self) -> NodeKind {
        NodeKind::TextSurround
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: SurroundConfig = ctx.config()?;
        let payload = map_text(ctx.input.single()?, |t| format!("{}{}{}", config.before, t, config.after))?;
        Ok(NodeOutput::with_primary(payload))
    }

    fn description(&self) -> &str {
        "Wraps text in a prefix and suffix"
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppendConfig {
    #[serde(default)]
    text: String,
}

pub struct AppendTextNode;

#[async_trait]
impl NodeExecutor for AppendTextNode {
    fn kind(&self) -> NodeKind {
        NodeKind::AppendText
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: AppendConfig = ctx.config()?;
        let payload = map_text(ctx.input.single()?, |t| format!("{}{}", t, config.text))?;
        Ok(NodeOutput::with_primary(payload))
    }

    fn description(&self) -> &str {
        "Appends text"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinConfig {
    #[serde(default = "default_separator")]
    separator: String,
    #[serde(default = "default_group_separator")]
    group_separator: String,
    /// Rendered above each group; `{key}` is the group key.
    group_header: Option<String>,
}

fn default_separator() -> String {
    "\n".to_string()
}

fn default_group_separator() -> String {
    "\n\n".to_string()
}

/// Joins lines (and groups) into a single text
pub struct TextJoinNode;

#[async_trait]
impl NodeExecutor for TextJoinNode {
    fn kind(&self) -> NodeKind {
        NodeKind::TextJoin
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: JoinConfig = ctx.config()?;
        let text = match ctx.input.single()? {
            Payload::TextLines(lines) => lines.join(&config.separator),
            Payload::GroupedText(groups) => groups
                .iter()
                .map(|g| {
                    let body = g.lines.join(&config.separator);
                    match &config.group_header {
                        Some(header) => {
                            let header = render_pattern(header, |name| (name == "key").then(|| g.key.clone()));
                            format!("{}{}{}", header, config.separator, body)
                        }
                        None => body,
                    }
                })
                .collect::<Vec<_>>()
                .join(&config.group_separator),
            other => {
                return Err(NodeError::invalid_input(
                    "TextLines or GroupedText",
                    other.port_type().to_string(),
                ))
            }
        };
        let length = text.len();
        Ok(NodeOutput::with_primary(Payload::Text(text)).with_metadata("length", length))
    }

    fn description(&self) -> &str {
        "Joins text lines into one text"
    }
}
