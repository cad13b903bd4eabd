//! In-memory typed table produced by the decoders.
//!
//! A [`TypedTable`] is owned by a single ingestion attempt. Its shape is checked
//! once at construction: unique non-empty column names, rows as wide as the
//! column list, and every non-null cell matching its column's [`SemanticType`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
    /// The decoder saw no value it could type (for example an all-null column).
    Unresolved,
}

impl SemanticType {
    fn admits(self, value: &Value) -> bool {
        match self {
            SemanticType::Unresolved => matches!(value, Value::Text(_)),
            other => value.semantic_type() == other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl Column {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

pub type Row = Vec<Option<Value>>;

#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("column {position} has an empty name")]
    EmptyColumnName { position: usize },
    #[error("duplicate column name '{name}'")]
    DuplicateColumn { name: String },
    #[error("row {row} has {found} value(s) but the table declares {expected} column(s)")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row} column '{column}' holds a {found:?} value but the column is {expected:?}")]
    CellType {
        row: usize,
        column: String,
        expected: SemanticType,
        found: SemanticType,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl TypedTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Result<Self, ShapeError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(ShapeError::EmptyColumnName { position: idx + 1 });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(ShapeError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
        }

        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ShapeError::RowWidth {
                    row: row_idx + 1,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
            for (column, cell) in columns.iter().zip(row) {
                if let Some(value) = cell
                    && !column.semantic_type.admits(value)
                {
                    return Err(ShapeError::CellType {
                        row: row_idx + 1,
                        column: column.name.clone(),
                        expected: column.semantic_type,
                        found: value.semantic_type(),
                    });
                }
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows.iter().map(move |row| row.get(index).and_then(Option::as_ref))
    }

    pub fn column_has_values(&self, index: usize) -> bool {
        self.column_values(index).any(|value| value.is_some())
    }

    pub fn column_has_nulls(&self, index: usize) -> bool {
        self.column_values(index).any(|value| value.is_none())
    }
}
