//! JSON input: an array of records, a column-oriented object
//! (`{"col": [..]}` or `{"col": {"0": ..}}`), or newline-delimited records.

use std::{fs, path::Path};

use itertools::Itertools;
use serde_json::{Map, Value as JsonValue};

use super::{DecodeError, RawCell, build_table};
use crate::typed_table::TypedTable;

type Record = Map<String, JsonValue>;

pub(super) fn decode(path: &Path) -> Result<TypedTable, DecodeError> {
    let raw = fs::read_to_string(path).map_err(|source| DecodeError::io(path, source))?;
    let records = match serde_json::from_str::<JsonValue>(&raw) {
        Ok(document) => records_from_document(document)?,
        Err(err) => parse_json_lines(&raw).ok_or(DecodeError::Json(err))?,
    };

    let headers: Vec<String> = records
        .iter()
        .flat_map(|record| record.keys().cloned())
        .unique()
        .collect();
    if headers.is_empty() {
        return Err(DecodeError::Layout(format!(
            "{} contains no columns",
            path.display()
        )));
    }

    let rows = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|header| record.get(header).map_or(RawCell::Null, raw_cell))
                .collect()
        })
        .collect();
    build_table(headers, rows)
}

fn records_from_document(document: JsonValue) -> Result<Vec<Record>, DecodeError> {
    match document {
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                JsonValue::Object(record) => Ok(record),
                other => Err(DecodeError::Layout(format!(
                    "Element {} is {} but records must be JSON objects",
                    idx + 1,
                    json_kind(&other)
                ))),
            })
            .collect(),
        JsonValue::Object(columns) => records_from_columns(columns),
        other => Err(DecodeError::Layout(format!(
            "Top-level JSON {} cannot be read as a table",
            json_kind(&other)
        ))),
    }
}

fn records_from_columns(columns: Record) -> Result<Vec<Record>, DecodeError> {
    let mut records: Vec<Record> = Vec::new();
    for (name, values) in columns {
        let cells: Vec<JsonValue> = match values {
            JsonValue::Array(items) => items,
            JsonValue::Object(by_index) => by_index.into_iter().map(|(_, v)| v).collect(),
            other => {
                return Err(DecodeError::Layout(format!(
                    "Column '{name}' is {} but column-oriented JSON needs arrays or objects",
                    json_kind(&other)
                )));
            }
        };
        if records.len() < cells.len() {
            records.resize_with(cells.len(), Record::new);
        }
        for (record, cell) in records.iter_mut().zip(cells) {
            record.insert(name.clone(), cell);
        }
    }
    Ok(records)
}

fn parse_json_lines(raw: &str) -> Option<Vec<Record>> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match serde_json::from_str::<JsonValue>(line) {
            Ok(JsonValue::Object(record)) => Some(record),
            _ => None,
        })
        .collect()
}

fn raw_cell(value: &JsonValue) -> RawCell {
    match value {
        JsonValue::Null => RawCell::Null,
        JsonValue::Bool(b) => RawCell::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => RawCell::Integer(i),
            None => n.as_f64().map_or(RawCell::Null, RawCell::Float),
        },
        JsonValue::String(s) => RawCell::Text(s.clone()),
        nested => RawCell::Text(nested.to_string()),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
