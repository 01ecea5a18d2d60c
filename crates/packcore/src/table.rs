use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One table row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Separator used when several key columns form one composite key.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// A decoded database table taken from (or destined for) one archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableData {
    /// Table name, e.g. `land_units_tables`.
    pub name: String,
    /// Entry name inside the table folder, e.g. `data__`.
    pub file_name: String,
    /// Archive the table was read from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TableData {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            file_name: "data__".to_string(),
            columns,
            ..Default::default()
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Path of the table inside an archive.
    pub fn entry_path(&self) -> String {
        table_entry_path(&self.name, &self.file_name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Copy of the table with the same identity and no rows.
    pub fn empty_like(&self) -> Self {
        Self {
            rows: Vec::new(),
            ..self.clone()
        }
    }

    /// Identity used when several payloads touch the same table.
    pub fn identity(&self) -> (String, String, String) {
        (self.source.clone(), self.name.clone(), self.file_name.clone())
    }
}

pub fn table_entry_path(table: &str, file_name: &str) -> String {
    format!("db/{}/{}", table, file_name)
}

/// Splits `db/<table>/<file>` into its table and file parts.
pub fn parse_table_entry_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("db/")?;
    let (table, file) = rest.split_once('/')?;
    if table.is_empty() || file.is_empty() {
        return None;
    }
    Some((table, file))
}

/// Composite key of `row` over `columns`, or `None` if any key cell is null.
pub fn row_key(row: &Row, columns: &[String]) -> Option<String> {
    let mut key = String::new();
    for (i, column) in columns.iter().enumerate() {
        let value = row.get(column).filter(|v| !v.is_null())?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&canonical_key(value));
    }
    Some(key)
}

/// Text form of a key cell; whole floats collapse onto their integer form so
/// `5` and `5.0` join.
fn canonical_key(value: &Value) -> String {
    match value {
        Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (*f as i64).to_string(),
        other => other.to_string(),
    }
}

/// Copies `row` with every column renamed to `<prefix>_<column>`.
pub fn prefix_row(row: &Row, prefix: &str) -> Row {
    row.iter()
        .map(|(k, v)| (format!("{}_{}", prefix, k), v.clone()))
        .collect()
}

pub fn prefix_columns(columns: &[String], prefix: &str) -> Vec<String> {
    columns.iter().map(|c| format!("{}_{}", prefix, c)).collect()
}
