use std::{fs::File, path::Path};

use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
        TimestampMicrosecondArray,
    },
    compute::cast,
    datatypes::{DataType, TimeUnit},
    util::display::{ArrayFormatter, FormatOptions},
};
use chrono::DateTime;

use super::DecodeError;
use crate::{
    data::Value,
    typed_table::{Column, Row, SemanticType, TypedTable},
};

/// Parquet columns carry their own types, so no sniffing happens here.
pub(super) fn decode(path: &Path) -> Result<TypedTable, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::io(path, source))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let columns: Vec<Column> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| Column::new(field.name().clone(), semantic_type_for(field.data_type())))
        .collect();

    let mut rows: Vec<Row> = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let mut extracted = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            extracted.push(extract_column(batch.column(idx), column.semantic_type)?);
        }
        for row_idx in 0..batch.num_rows() {
            rows.push(
                extracted
                    .iter_mut()
                    .map(|values| values[row_idx].take())
                    .collect(),
            );
        }
    }

    Ok(TypedTable::new(columns, rows)?)
}

fn semantic_type_for(data_type: &DataType) -> SemanticType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => SemanticType::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => SemanticType::Float,
        DataType::Boolean => SemanticType::Boolean,
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
            SemanticType::Timestamp
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => SemanticType::Text,
        _ => SemanticType::Unresolved,
    }
}

fn extract_column(array: &ArrayRef, ty: SemanticType) -> Result<Vec<Option<Value>>, DecodeError> {
    let values = match ty {
        SemanticType::Integer => {
            let casted = cast(array, &DataType::Int64)?;
            let typed = downcast::<Int64Array>(&casted)?;
            (0..typed.len())
                .map(|i| typed.is_valid(i).then(|| Value::Integer(typed.value(i))))
                .collect()
        }
        SemanticType::Float => {
            let casted = cast(array, &DataType::Float64)?;
            let typed = downcast::<Float64Array>(&casted)?;
            (0..typed.len())
                .map(|i| typed.is_valid(i).then(|| Value::Float(typed.value(i))))
                .collect()
        }
        SemanticType::Boolean => {
            let typed = downcast::<BooleanArray>(array)?;
            (0..typed.len())
                .map(|i| typed.is_valid(i).then(|| Value::Boolean(typed.value(i))))
                .collect()
        }
        SemanticType::Timestamp => {
            let casted = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
            let typed = downcast::<TimestampMicrosecondArray>(&casted)?;
            (0..typed.len())
                .map(|i| {
                    typed
                        .is_valid(i)
                        .then(|| DateTime::from_timestamp_micros(typed.value(i)))
                        .flatten()
                        .map(|ts| Value::Timestamp(ts.naive_utc()))
                })
                .collect()
        }
        SemanticType::Text => {
            let casted = cast(array, &DataType::Utf8)?;
            let typed = downcast::<StringArray>(&casted)?;
            (0..typed.len())
                .map(|i| typed.is_valid(i).then(|| Value::Text(typed.value(i).to_string())))
                .collect()
        }
        SemanticType::Unresolved => {
            let options = FormatOptions::default();
            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
            (0..array.len())
                .map(|i| {
                    array
                        .is_valid(i)
                        .then(|| Value::Text(formatter.value(i).to_string()))
                })
                .collect()
        }
    };
    Ok(values)
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T, DecodeError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        DecodeError::Layout(format!(
            "Unexpected arrow array type {}",
            array.data_type()
        ))
    })
}
