use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROW_ID_KEY: &str = "id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Select,
    Multiselect,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Text,
        ColumnType::Number,
        ColumnType::Date,
        ColumnType::Boolean,
        ColumnType::Select,
        ColumnType::Multiselect,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Select => "select",
            Self::Multiselect => "multiselect",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown column type `{0}`")]
pub struct ParseColumnTypeError(String);

impl FromStr for ColumnType {
    type Err = ParseColumnTypeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|column_type| column_type.as_str() == normalized)
            .ok_or_else(|| ParseColumnTypeError(raw.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::Text(value) => !value.is_empty(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub type RowValues = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// A row stores its cells keyed by column id. Stored rows are flat JSON objects, so the
/// values map is flattened next to `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub id: String,
    #[serde(flatten)]
    pub values: RowValues,
}

impl Row {
    #[must_use]
    pub fn get(&self, column_id: &str) -> Option<&CellValue> {
        self.values.get(column_id)
    }

    pub fn set(&mut self, column_id: impl Into<String>, value: CellValue) {
        let column_id = column_id.into();
        if column_id == ROW_ID_KEY {
            return;
        }
        self.values.insert(column_id, value);
    }

    pub fn remove(&mut self, column_id: &str) -> Option<CellValue> {
        self.values.remove(column_id)
    }

    pub fn merge(&mut self, data: &RowValues) {
        for (column_id, value) in data {
            self.set(column_id.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    #[must_use]
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == column_id)
    }

    #[must_use]
    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == row_id)
    }

    pub fn row_mut(&mut self, row_id: &str) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.id == row_id)
    }

    /// Row keys that no longer name a column of this table.
    #[must_use]
    pub fn stale_keys(&self) -> Vec<(&str, &str)> {
        let mut stale = Vec::new();
        for row in &self.rows {
            for key in row.values.keys() {
                if self.column(key).is_none() {
                    stale.push((row.id.as_str(), key.as_str()));
                }
            }
        }
        stale
    }

    /// Drops row values whose column was removed; returns how many cells were dropped.
    pub fn prune_stale_values(&mut self) -> usize {
        let columns = &self.columns;
        let mut dropped = 0;
        for row in &mut self.rows {
            let before = row.values.len();
            row.values
                .retain(|key, _| columns.iter().any(|column| &column.id == key));
            dropped += before - row.values.len();
        }
        dropped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Database {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Database {
    #[must_use]
    pub fn table(&self, table_id: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.id == table_id)
    }
}
