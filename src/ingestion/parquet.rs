//! Parquet reading, used to load published artifacts back into a [`DataSet`].

use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parquet::basic::{ConvertedType, Type as PhysicalType};
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{self, DataSet, DataType, Schema, Value};

/// Read a Parquet file into an in-memory `DataSet`, inferring the schema from the file.
pub fn read_parquet_from_path(path: impl AsRef<Path>) -> IngestionResult<DataSet> {
    let reader = SerializedFileReader::try_from(path.as_ref())?;
    read_parquet(reader)
}

/// Read Parquet bytes (e.g. a fetched artifact) into an in-memory `DataSet`.
pub fn read_parquet_bytes(bytes: &[u8]) -> IngestionResult<DataSet> {
    read_parquet(SerializedFileReader::new(Bytes::copy_from_slice(bytes))?)
}

fn read_parquet<R: ChunkReader + 'static>(reader: SerializedFileReader<R>) -> IngestionResult<DataSet> {
    let schema = schema_of(&reader)?;

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx0, row_res) in reader.get_row_iter(None)?.enumerate() {
        let row_num = idx0 + 1;
        let row = row_res?;

        let mut out_row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (f, (_, field)) in schema.fields.iter().zip(row.get_column_iter()) {
            out_row.push(convert_parquet_field(row_num, &f.name, f.data_type, field)?);
        }
        rows.push(out_row);
    }

    Ok(DataSet::new(schema, rows))
}

fn schema_of<R: ChunkReader + 'static>(reader: &SerializedFileReader<R>) -> IngestionResult<Schema> {
    let cols = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns();
    let mut fields = Vec::with_capacity(cols.len());
    for c in cols {
        let data_type = match (c.physical_type(), c.converted_type()) {
            (PhysicalType::INT64, ConvertedType::TIMESTAMP_MILLIS) => DataType::Timestamp,
            (PhysicalType::INT32, ConvertedType::DATE) => DataType::Date,
            (PhysicalType::INT32 | PhysicalType::INT64, _) => DataType::Int64,
            (PhysicalType::FLOAT | PhysicalType::DOUBLE, _) => DataType::Float64,
            (PhysicalType::BOOLEAN, _) => DataType::Bool,
            (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8 | ConvertedType::NONE) => DataType::Utf8,
            (physical, converted) => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "unsupported parquet column '{}' ({physical:?}/{converted:?})",
                        c.path().string()
                    ),
                });
            }
        };
        fields.push(types::Field::new(c.name(), data_type));
    }
    Ok(Schema::new(fields))
}

fn convert_parquet_field(row: usize, column: &str, data_type: DataType, f: &Field) -> IngestionResult<Value> {
    if let Field::Null = f {
        return Ok(Value::Null);
    }
    let mismatch = |message: &str| IngestionError::ParseError {
        row,
        column: column.to_string(),
        raw: f.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => match f {
            Field::Str(s) => Ok(Value::Utf8(s.clone())),
            _ => Err(mismatch("expected string")),
        },
        DataType::Bool => match f {
            Field::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(mismatch("expected bool")),
        },
        DataType::Int64 => match f {
            Field::Byte(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Short(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Int(v) => Ok(Value::Int64(i64::from(*v))),
            Field::Long(v) => Ok(Value::Int64(*v)),
            Field::UByte(v) => Ok(Value::Int64(i64::from(*v))),
            Field::UShort(v) => Ok(Value::Int64(i64::from(*v))),
            Field::UInt(v) => Ok(Value::Int64(i64::from(*v))),
            Field::ULong(v) => i64::try_from(*v)
                .map(Value::Int64)
                .map_err(|_| mismatch("u64 out of range for i64")),
            _ => Err(mismatch("expected integer")),
        },
        DataType::Float64 => match f {
            Field::Float(v) => Ok(Value::Float64(f64::from(*v))),
            Field::Double(v) => Ok(Value::Float64(*v)),
            _ => Err(mismatch("expected number")),
        },
        DataType::Date => match f {
            Field::Date(days) => epoch_date()
                .checked_add_signed(TimeDelta::days(i64::from(*days)))
                .map(Value::Date)
                .ok_or_else(|| mismatch("date out of range")),
            _ => Err(mismatch("expected date")),
        },
        DataType::Timestamp => match f {
            Field::TimestampMillis(ms) | Field::Long(ms) => DateTime::from_timestamp_millis(*ms)
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .ok_or_else(|| mismatch("timestamp out of range")),
            _ => Err(mismatch("expected timestamp")),
        },
    }
}

pub(crate) fn epoch_date() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}
