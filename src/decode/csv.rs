use std::path::Path;

use super::{DecodeError, DecodeOptions, RawCell, build_table, normalize_headers};
use crate::{io_utils, typed_table::TypedTable};

pub(super) fn decode(path: &Path, options: &DecodeOptions) -> Result<TypedTable, DecodeError> {
    let delimiter = options.csv_delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER);
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)
        .map_err(|source| DecodeError::io(path, source))?;
    let headers = io_utils::reader_headers(&mut reader, options.encoding)
        .map_err(|err| DecodeError::Layout(format!("Reading header row: {err}")))?;
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(DecodeError::Layout(format!(
            "{} has no header row",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    let mut record = ::csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let decoded = io_utils::decode_record(&record, options.encoding).map_err(|err| {
            DecodeError::Layout(format!("Row {}: {err}", rows.len() + 1))
        })?;
        rows.push(decoded.into_iter().map(RawCell::Token).collect());
    }

    build_table(normalize_headers(headers), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Value, typed_table::SemanticType};
    use encoding_rs::WINDOWS_1252;
    use std::io::Write;
    use tempfile::Builder;

    fn write_csv(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().expect("temp csv");
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn decode_infers_column_types() {
        let file = write_csv(
            b"id,name,age,active,joined\n1,Alice,34,yes,2024-01-01\n2,Bob,,no,2024-02-01 09:30:00\n",
        );
        let table = decode(file.path(), &DecodeOptions::default()).unwrap();
        let types: Vec<_> = table.columns().iter().map(|c| c.semantic_type).collect();
        assert_eq!(
            types,
            vec![
                SemanticType::Integer,
                SemanticType::Text,
                SemanticType::Integer,
                SemanticType::Boolean,
                SemanticType::Timestamp,
            ]
        );
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[1][2], None);
        assert_eq!(table.rows()[0][1], Some(Value::Text("Alice".into())));
    }

    #[test]
    fn decode_honours_delimiter_and_encoding() {
        let file = write_csv(b"city;population\nK\xf6ln;1084831\n");
        let options = DecodeOptions {
            csv_delimiter: Some(b';'),
            encoding: WINDOWS_1252,
        };
        let table = decode(file.path(), &options).unwrap();
        assert_eq!(table.rows()[0][0], Some(Value::Text("Köln".into())));
        assert_eq!(table.rows()[0][1], Some(Value::Integer(1_084_831)));
    }

    #[test]
    fn tab_separated_input_needs_an_explicit_delimiter() {
        let file = write_csv(b"id\tname\n1\tAlice\n");

        let default = decode(file.path(), &DecodeOptions::default()).unwrap();
        assert_eq!(default.column_count(), 1);

        let options = DecodeOptions {
            csv_delimiter: Some(b'\t'),
            ..DecodeOptions::default()
        };
        let table = decode(file.path(), &options).unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.rows()[0][1], Some(Value::Text("Alice".into())));
    }

    #[test]
    fn decode_rejects_ragged_rows() {
        let file = write_csv(b"id,name\n1,Alice\n2\n");
        let err = decode(file.path(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Csv(_)), "unexpected error: {err}");
    }

    #[test]
    fn decode_header_only_file_yields_unresolved_columns() {
        let file = write_csv(b"id,name\n");
        let table = decode(file.path(), &DecodeOptions::default()).unwrap();
        assert_eq!(table.row_count(), 0);
        assert!(
            table
                .columns()
                .iter()
                .all(|c| c.semantic_type == SemanticType::Unresolved)
        );
    }
}
