//! File decoders: path → [`TypedTable`].
//!
//! Every format funnels its cells through [`RawCell`] and [`build_table`], so
//! type inference behaves the same regardless of where the values came from.
//! Delimited text is sniffed token by token; formats with native types
//! (JSON, workbooks, parquet) only have their strings checked for timestamps.

mod csv;
mod excel;
mod json;
mod parquet;

use std::{fmt, io, path::Path, path::PathBuf};

use chrono::NaiveDateTime;
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use thiserror::Error;

use crate::{
    data::{Value, is_placeholder_token, parse_boolean, parse_timestamp, parse_typed_value},
    typed_table::{Column, SemanticType, ShapeError, TypedTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Csv,
    Excel,
    Json,
    Parquet,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(FileFormat::Csv),
            "xlsx" => Some(FileFormat::Excel),
            "json" => Some(FileFormat::Json),
            "parquet" => Some(FileFormat::Parquet),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Excel => "xlsx",
            FileFormat::Json => "json",
            FileFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub csv_delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            csv_delimiter: None,
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported file format: {}", .path.display())]
    Unsupported { path: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed CSV: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unreadable workbook: {0}")]
    Excel(#[from] calamine::Error),
    #[error("unreadable parquet file: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),
    #[error("arrow conversion failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("{0}")]
    Layout(String),
    #[error("row {row} column '{column}': {reason}")]
    Value {
        row: usize,
        column: String,
        reason: String,
    },
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl DecodeError {
    fn io(path: &Path, source: io::Error) -> Self {
        DecodeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn decode_file(path: &Path, options: &DecodeOptions) -> Result<TypedTable, DecodeError> {
    let format = FileFormat::from_path(path).ok_or_else(|| DecodeError::Unsupported {
        path: path.to_path_buf(),
    })?;
    let table = match format {
        FileFormat::Csv => csv::decode(path, options)?,
        FileFormat::Excel => excel::decode(path)?,
        FileFormat::Json => json::decode(path)?,
        FileFormat::Parquet => parquet::decode(path)?,
    };
    debug!(
        "Decoded {} as {format}: {} column(s), {} row(s)",
        path.display(),
        table.column_count(),
        table.row_count()
    );
    Ok(table)
}

/// A cell as read from the source, before the column type is known.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawCell {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    /// Untyped delimited-text token; every type is sniffed.
    Token(String),
    /// A value the source already declared as a string; only timestamps are sniffed.
    Text(String),
}

impl RawCell {
    fn render(&self) -> String {
        match self {
            RawCell::Null => String::new(),
            RawCell::Integer(i) => i.to_string(),
            RawCell::Float(f) => f.to_string(),
            RawCell::Boolean(b) => b.to_string(),
            RawCell::Timestamp(ts) => Value::Timestamp(*ts).as_display(),
            RawCell::Token(s) | RawCell::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    non_empty: usize,
    possible_boolean: bool,
    possible_integer: bool,
    possible_float: bool,
    possible_timestamp: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            non_empty: 0,
            possible_boolean: true,
            possible_integer: true,
            possible_float: true,
            possible_timestamp: true,
        }
    }

    fn observe(&mut self, cell: &RawCell) {
        match cell {
            RawCell::Null => return,
            RawCell::Integer(_) => {
                self.possible_boolean = false;
                self.possible_timestamp = false;
            }
            RawCell::Float(_) => {
                self.possible_boolean = false;
                self.possible_integer = false;
                self.possible_timestamp = false;
            }
            RawCell::Boolean(_) => {
                self.possible_integer = false;
                self.possible_float = false;
                self.possible_timestamp = false;
            }
            RawCell::Timestamp(_) => {
                self.possible_boolean = false;
                self.possible_integer = false;
                self.possible_float = false;
            }
            RawCell::Token(token) => {
                let trimmed = token.trim();
                if trimmed.is_empty() || is_placeholder_token(trimmed) {
                    return;
                }
                if self.possible_boolean && parse_boolean(trimmed).is_none() {
                    self.possible_boolean = false;
                }
                if self.possible_integer && trimmed.parse::<i64>().is_err() {
                    self.possible_integer = false;
                }
                if self.possible_float && trimmed.parse::<f64>().is_err() {
                    self.possible_float = false;
                }
                if self.possible_timestamp && parse_timestamp(trimmed).is_err() {
                    self.possible_timestamp = false;
                }
            }
            RawCell::Text(text) => {
                self.possible_boolean = false;
                self.possible_integer = false;
                self.possible_float = false;
                if self.possible_timestamp && parse_timestamp(text).is_err() {
                    self.possible_timestamp = false;
                }
            }
        }
        self.non_empty += 1;
    }

    fn decide(&self) -> SemanticType {
        if self.non_empty == 0 {
            SemanticType::Unresolved
        } else if self.possible_boolean {
            SemanticType::Boolean
        } else if self.possible_integer {
            SemanticType::Integer
        } else if self.possible_float {
            SemanticType::Float
        } else if self.possible_timestamp {
            SemanticType::Timestamp
        } else {
            SemanticType::Text
        }
    }
}

fn coerce(cell: RawCell, ty: SemanticType) -> Result<Option<Value>, String> {
    let value = match (cell, ty) {
        (RawCell::Null, _) => return Ok(None),
        (RawCell::Token(token), ty) => {
            return parse_typed_value(&token, ty).map_err(|err| err.to_string());
        }
        (cell, SemanticType::Text | SemanticType::Unresolved) => Value::Text(cell.render()),
        (RawCell::Integer(i), SemanticType::Integer) => Value::Integer(i),
        (RawCell::Integer(i), SemanticType::Float) => Value::Float(i as f64),
        (RawCell::Float(f), SemanticType::Float) => Value::Float(f),
        (RawCell::Boolean(b), SemanticType::Boolean) => Value::Boolean(b),
        (RawCell::Timestamp(ts), SemanticType::Timestamp) => Value::Timestamp(ts),
        (RawCell::Text(text), SemanticType::Timestamp) => {
            Value::Timestamp(parse_timestamp(&text).map_err(|err| err.to_string())?)
        }
        (cell, ty) => return Err(format!("cannot store '{}' as {ty:?}", cell.render())),
    };
    Ok(Some(value))
}

/// Infers a type per column and converts every cell to it.
pub(crate) fn build_table(
    headers: Vec<String>,
    rows: Vec<Vec<RawCell>>,
) -> Result<TypedTable, DecodeError> {
    let mut candidates = vec![TypeCandidate::new(); headers.len()];
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != headers.len() {
            return Err(ShapeError::RowWidth {
                row: row_idx + 1,
                expected: headers.len(),
                found: row.len(),
            }
            .into());
        }
        for (candidate, cell) in candidates.iter_mut().zip(row) {
            candidate.observe(cell);
        }
    }

    let columns: Vec<Column> = headers
        .into_iter()
        .zip(&candidates)
        .map(|(name, candidate)| Column::new(name, candidate.decide()))
        .collect();

    let mut typed_rows = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.into_iter().enumerate() {
        let mut typed = Vec::with_capacity(columns.len());
        for (column, cell) in columns.iter().zip(row) {
            let value = coerce(cell, column.semantic_type).map_err(|reason| DecodeError::Value {
                row: row_idx + 1,
                column: column.name.clone(),
                reason,
            })?;
            typed.push(value);
        }
        typed_rows.push(typed);
    }

    Ok(TypedTable::new(columns, typed_rows)?)
}

/// Blank headers get a positional name so every column stays addressable.
pub(crate) fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let trimmed = header.trim();
            if trimmed.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                trimmed.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(values: &[&str]) -> Vec<RawCell> {
        values.iter().map(|v| RawCell::Token(v.to_string())).collect()
    }

    fn decided(cells: &[RawCell]) -> SemanticType {
        let mut candidate = TypeCandidate::new();
        for cell in cells {
            candidate.observe(cell);
        }
        candidate.decide()
    }

    #[test]
    fn token_columns_resolve_to_narrowest_type() {
        assert_eq!(decided(&tokens(&["yes", "no", ""])), SemanticType::Boolean);
        assert_eq!(decided(&tokens(&["1", "22", "NA"])), SemanticType::Integer);
        assert_eq!(decided(&tokens(&["1", "2.5"])), SemanticType::Float);
        assert_eq!(
            decided(&tokens(&["2024-01-01", "2024-01-02 10:00:00"])),
            SemanticType::Timestamp
        );
        assert_eq!(decided(&tokens(&["1", "Paris"])), SemanticType::Text);
        assert_eq!(decided(&tokens(&["", "null"])), SemanticType::Unresolved);
    }

    #[test]
    fn native_cells_mix_integer_and_float_into_float() {
        let cells = vec![RawCell::Integer(1), RawCell::Float(2.5), RawCell::Null];
        assert_eq!(decided(&cells), SemanticType::Float);

        let strings = vec![RawCell::Text("42".into())];
        assert_eq!(decided(&strings), SemanticType::Text);
    }

    #[test]
    fn build_table_coerces_mixed_cells_to_text() {
        let table = build_table(
            vec!["mixed".into()],
            vec![vec![RawCell::Integer(7)], vec![RawCell::Boolean(true)]],
        )
        .unwrap();
        assert_eq!(table.columns()[0].semantic_type, SemanticType::Text);
        assert_eq!(table.rows()[0][0], Some(Value::Text("7".into())));
        assert_eq!(table.rows()[1][0], Some(Value::Text("true".into())));
    }

    #[test]
    fn build_table_rejects_ragged_rows() {
        let err = build_table(
            vec!["a".into(), "b".into()],
            vec![vec![RawCell::Integer(1)]],
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Shape(ShapeError::RowWidth { .. })));
    }

    #[test]
    fn format_detection_is_case_insensitive() {
        assert_eq!(
            FileFormat::from_path(Path::new("data/Sales.XLSX")),
            Some(FileFormat::Excel)
        );
        assert_eq!(FileFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileFormat::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn normalize_headers_names_blank_columns() {
        let headers = normalize_headers(vec![" id ".into(), "".into()]);
        assert_eq!(headers, vec!["id".to_string(), "column_2".to_string()]);
    }
}
