//! Table schema definitions and the read-only schema registry.

use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage type of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldType {
    Boolean,
    I16,
    I32,
    I64,
    F32,
    F64,
    #[default]
    StringU8,
    StringU16,
    OptionalStringU8,
    OptionalStringU16,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(self, FieldType::I16 | FieldType::I32 | FieldType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::F32 | FieldType::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Value written into a generated row when nothing else supplies one.
    pub fn default_value(self) -> Value {
        match self {
            FieldType::Boolean => Value::Bool(false),
            t if t.is_integer() => Value::Integer(0),
            t if t.is_float() => Value::Float(0.0),
            _ => Value::String(String::new()),
        }
    }

    /// Converts raw text (TSV cells, literal rows) into a typed cell.
    pub fn parse(self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" | "" => Ok(Value::Bool(false)),
                other => Err(format!("'{}' is not a boolean", other)),
            },
            t if t.is_integer() => {
                if trimmed.is_empty() {
                    return Ok(Value::Integer(0));
                }
                trimmed
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| format!("'{}' is not an integer", trimmed))
            }
            t if t.is_float() => {
                if trimmed.is_empty() {
                    return Ok(Value::Float(0.0));
                }
                trimmed
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| format!("'{}' is not a number", trimmed))
            }
            _ => Ok(Value::String(raw.to_string())),
        }
    }

    /// Coerces an already typed cell to this field type.
    pub fn coerce(self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(self.default_value()),
            (FieldType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (t, Value::Integer(_)) if t.is_integer() => Ok(value.clone()),
            (t, Value::Float(f)) if t.is_integer() => Ok(Value::Integer(f.round() as i64)),
            (t, v) if t.is_float() && v.is_numeric() => Ok(Value::Float(v.as_f64().unwrap_or_default())),
            (t, v) if t.is_numeric() || t == FieldType::Boolean => self.parse(&v.to_string()),
            (_, v) => Ok(Value::String(v.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReference {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<FieldReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_key: false,
            reference: None,
            default_value: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.reference = Some(FieldReference {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn default_value(&self) -> Value {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.field_type.default_value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub version: u32,
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn key_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.is_key)
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Read-only lookup of table definitions, shared by every node of a run.
pub trait SchemaRegistry: Send + Sync {
    /// All known versions of a table definition.
    fn versions(&self, table: &str) -> Option<&[TableSchema]>;

    /// Names of every table the registry knows.
    fn table_names(&self) -> Vec<String>;

    /// The definition matching `version`, or the newest one when the
    /// version is unknown or absent.
    fn schema_for(&self, table: &str, version: Option<u32>) -> Option<&TableSchema> {
        let versions = self.versions(table)?;
        version
            .and_then(|v| versions.iter().find(|s| s.version == v))
            .or_else(|| versions.iter().max_by_key(|s| s.version))
    }

    /// Tables (with the referencing field) whose newest definition points at
    /// `table`.
    fn referencing(&self, table: &str) -> Vec<(String, FieldSchema)> {
        let mut found = Vec::new();
        let mut names = self.table_names();
        names.sort();
        for name in names {
            if let Some(schema) = self.schema_for(&name, None) {
                for field in &schema.fields {
                    if field.reference.as_ref().is_some_and(|r| r.table == table) {
                        found.push((name.clone(), field.clone()));
                    }
                }
            }
        }
        found
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemorySchemaRegistry {
    tables: HashMap<String, Vec<TableSchema>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, table: impl Into<String>, schema: TableSchema) {
        self.tables.entry(table.into()).or_default().push(schema);
    }

    pub fn with_table(mut self, table: impl Into<String>, schema: TableSchema) -> Self {
        self.insert(table, schema);
        self
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn versions(&self, table: &str) -> Option<&[TableSchema]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InMemorySchemaRegistry {
        InMemorySchemaRegistry::new()
            .with_table(
                "units_tables",
                TableSchema {
                    version: 1,
                    fields: vec![FieldSchema::new("key", FieldType::StringU8).key()],
                },
            )
            .with_table(
                "units_tables",
                TableSchema {
                    version: 3,
                    fields: vec![
                        FieldSchema::new("key", FieldType::StringU8).key(),
                        FieldSchema::new("cost", FieldType::I32),
                    ],
                },
            )
            .with_table(
                "armies_tables",
                TableSchema {
                    version: 0,
                    fields: vec![FieldSchema::new("unit", FieldType::StringU8)
                        .references("units_tables", "key")],
                },
            )
    }

    #[test]
    fn newest_version_is_the_fallback() {
        let reg = registry();
        assert_eq!(reg.schema_for("units_tables", Some(1)).unwrap().version, 1);
        assert_eq!(reg.schema_for("units_tables", Some(7)).unwrap().version, 3);
        assert_eq!(reg.schema_for("units_tables", None).unwrap().version, 3);
    }

    #[test]
    fn finds_referencing_tables() {
        let found = registry().referencing("units_tables");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "armies_tables");
        assert_eq!(found[0].1.name, "unit");
    }

    #[test]
    fn parses_typed_cells() {
        assert_eq!(FieldType::I32.parse(" 12 "), Ok(Value::Integer(12)));
        assert_eq!(FieldType::Boolean.parse("true"), Ok(Value::Bool(true)));
        assert!(FieldType::F32.parse("abc").is_err());
    }
}
