//! Typed payloads flowing over connections, one variant per port type.

use crate::archive::Archive;
use crate::schema::FieldType;
use crate::table::{Row, TableData};
use crate::{PortType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    PackFiles(PackFiles),
    TableSelection(TableSelection),
    NestedTableSelection(NestedTableSelection),
    IndexedTable(IndexedTable),
    ColumnSelection(ColumnSelection),
    ChangedColumnSelection(ChangedColumnSelection),
    Text(String),
    TextLines(Vec<String>),
    GroupedText(Vec<TextGroup>),
    CustomSchema(CustomSchema),
}

impl Payload {
    pub fn port_type(&self) -> PortType {
        match self {
            Payload::PackFiles(_) => PortType::PackFiles,
            Payload::TableSelection(_) => PortType::TableSelection,
            Payload::NestedTableSelection(_) => PortType::NestedTableSelection,
            Payload::IndexedTable(_) => PortType::IndexedTable,
            Payload::ColumnSelection(_) => PortType::ColumnSelection,
            Payload::ChangedColumnSelection(_) => PortType::ChangedColumnSelection,
            Payload::Text(_) => PortType::Text,
            Payload::TextLines(_) => PortType::TextLines,
            Payload::GroupedText(_) => PortType::GroupedText,
            Payload::CustomSchema(_) => PortType::CustomSchema,
        }
    }

    pub fn as_tables(&self) -> Option<&TableSelection> {
        match self {
            Payload::TableSelection(t) => Some(t),
            _ => None,
        }
    }
}

/// A loaded (or failed) archive reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackHandle {
    pub name: String,
    pub path: String,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub archive: Option<Arc<Archive>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackFiles {
    pub packs: Vec<PackHandle>,
}

impl PackFiles {
    pub fn loaded(&self) -> impl Iterator<Item = (&PackHandle, &Archive)> {
        self.packs
            .iter()
            .filter_map(|p| p.archive.as_deref().map(|a| (p, a)))
    }
}

/// A name that could not be resolved against the upstream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSelection {
    pub tables: Vec<TableData>,
    pub source_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SelectionFailure>,
}

impl TableSelection {
    pub fn new(tables: Vec<TableData>, source_files: Vec<String>) -> Self {
        Self {
            tables,
            source_files,
            failures: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Unions tables, source files and failures of several selections.
    /// Source files keep first-seen order without duplicates.
    pub fn merge_all<'a>(selections: impl IntoIterator<Item = &'a TableSelection>) -> TableSelection {
        let mut merged = TableSelection::default();
        for selection in selections {
            merged.tables.extend(selection.tables.iter().cloned());
            merged.failures.extend(selection.failures.iter().cloned());
            for file in &selection.source_files {
                if !merged.source_files.contains(file) {
                    merged.source_files.push(file.clone());
                }
            }
        }
        merged
    }

    /// All rows of all tables, in table order.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.tables.iter().flat_map(|t| t.rows.iter())
    }

    /// Column list of the first table, extended with columns of later ones.
    pub fn combined_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for table in &self.tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        columns
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NestedRow {
    pub row: Row,
    pub matches: Vec<Row>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedTableSelection {
    pub source_table: String,
    pub nested_table: String,
    pub source_columns: Vec<String>,
    pub nested_columns: Vec<String>,
    pub rows: Vec<NestedRow>,
    pub source_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedTable {
    pub table_name: String,
    pub key_columns: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Composite key to row positions, in row order.
    pub index: BTreeMap<String, Vec<usize>>,
    pub source_files: Vec<String>,
}

impl IndexedTable {
    pub fn matches(&self, key: &str) -> impl Iterator<Item = &Row> {
        self.index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.rows.get(i))
    }
}

/// One column of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSlice {
    pub table: TableData,
    pub column: String,
}

impl ColumnSlice {
    pub fn values(&self) -> Vec<Value> {
        self.table
            .rows
            .iter()
            .map(|r| r.get(&self.column).cloned().unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSelection {
    pub columns: Vec<ColumnSlice>,
    pub source_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SelectionFailure>,
}

/// New values for one column of one table, aligned with the table's rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnChange {
    pub table: TableData,
    pub column: String,
    pub values: Vec<Value>,
}

impl ColumnChange {
    pub fn original_values(&self) -> Vec<Value> {
        self.table
            .rows
            .iter()
            .map(|r| r.get(&self.column).cloned().unwrap_or_default())
            .collect()
    }

    /// Writes the new values into `table`.
    pub fn apply_to(&self, table: &mut TableData) {
        for (row, value) in table.rows.iter_mut().zip(&self.values) {
            row.insert(self.column.clone(), value.clone());
        }
    }

    pub fn map_values(&self, f: impl Fn(&Value) -> Value) -> ColumnChange {
        ColumnChange {
            table: self.table.clone(),
            column: self.column.clone(),
            values: self.values.iter().map(f).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedColumnSelection {
    pub changes: Vec<ColumnChange>,
    pub source_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextGroup {
    pub key: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomColumn {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomSchema {
    pub name: String,
    pub columns: Vec<CustomColumn>,
}
