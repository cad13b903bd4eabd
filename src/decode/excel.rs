use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};

use super::{DecodeError, RawCell, build_table, normalize_headers};
use crate::typed_table::TypedTable;

/// Reads the first worksheet; its first row holds the column names.
pub(super) fn decode(path: &Path) -> Result<TypedTable, DecodeError> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook.sheet_names().first().cloned().ok_or_else(|| {
        DecodeError::Layout(format!("{} contains no worksheets", path.display()))
    })?;
    let range = workbook.worksheet_range(&sheet)?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| {
            DecodeError::Layout(format!("Worksheet '{sheet}' in {} is empty", path.display()))
        })?
        .iter()
        .map(|cell| match cell {
            Data::Empty => String::new(),
            other => other.to_string(),
        })
        .collect();

    let body = rows
        .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
        .map(|row| row.iter().map(raw_cell).collect())
        .collect();
    build_table(normalize_headers(headers), body)
}

fn raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Null,
        Data::Int(i) => RawCell::Integer(*i),
        Data::Float(f) => whole_number(*f).map_or(RawCell::Float(*f), RawCell::Integer),
        Data::Bool(b) => RawCell::Boolean(*b),
        Data::String(s) => RawCell::Text(s.clone()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map_or_else(|| RawCell::Float(dt.as_f64()), RawCell::Timestamp),
        Data::DateTimeIso(s) => RawCell::Text(s.clone()),
        Data::Error(_) => RawCell::Null,
        other => RawCell::Text(other.to_string()),
    }
}

/// Workbooks store every number as a float; whole values read as integers.
fn whole_number(value: f64) -> Option<i64> {
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    (value.fract() == 0.0 && value.abs() <= LIMIT).then_some(value as i64)
}
