//! Serialize a [`DataSet`] to Snappy-compressed Parquet and publish it to the staging zone.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parquet::basic::{Compression, ConvertedType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use tracing::info;

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::parquet::epoch_date;
use crate::resolver::split_object_key;
use crate::store::ObjectStore;
use crate::types::{DataSet, DataType, Schema, Value};

/// Extension of published artifacts.
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Where an artifact was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
    pub bytes: usize,
}

/// Output bucket: `intake` replaced by `staging` inside `input_bucket`.
///
/// This is a plain textual substitution of every occurrence.
pub fn output_bucket(input_bucket: &str, intake: &str, staging: &str) -> String {
    input_bucket.replace(intake, staging)
}

/// Output key: the input key's directory plus `<output_file_name>.parquet`.
pub fn output_key(input_key: &str, output_file_name: &str) -> String {
    let (dir, _) = split_object_key(input_key);
    if dir.is_empty() {
        format!("{output_file_name}.{ARTIFACT_EXTENSION}")
    } else {
        format!("{dir}/{output_file_name}.{ARTIFACT_EXTENSION}")
    }
}

/// Encode `dataset` as a single-row-group Parquet file with Snappy compression.
///
/// The file is staged in an anonymous temporary file, released when this function returns
/// whether encoding succeeds or not.
pub fn encode_parquet(dataset: &DataSet) -> IngestionResult<Vec<u8>> {
    let schema = Arc::new(parquet_schema(&dataset.schema)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );

    let mut file = tempfile::tempfile()?;
    let mut writer = SerializedFileWriter::new(file.try_clone()?, schema, props)?;
    let mut rg = writer.next_row_group()?;
    let mut col_idx: usize = 0;
    while let Some(mut col) = rg.next_column()? {
        write_column(col.untyped(), dataset, col_idx)?;
        col.close()?;
        col_idx += 1;
    }
    rg.close()?;
    writer.close()?;

    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Encode `dataset` and store it at `bucket`/`key`.
pub fn publish_artifact(
    store: &dyn ObjectStore,
    dataset: &DataSet,
    bucket: &str,
    key: &str,
) -> IngestionResult<ArtifactLocation> {
    let bytes = encode_parquet(dataset)?;
    let len = bytes.len();
    store.put(bucket, key, bytes)?;
    info!(bucket, key, bytes = len, rows = dataset.row_count(), "published artifact");
    Ok(ArtifactLocation {
        bucket: bucket.to_string(),
        key: key.to_string(),
        bytes: len,
    })
}

fn parquet_schema(schema: &Schema) -> IngestionResult<Type> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let (physical, converted) = match field.data_type {
            DataType::Int64 => (PhysicalType::INT64, ConvertedType::NONE),
            DataType::Float64 => (PhysicalType::DOUBLE, ConvertedType::NONE),
            DataType::Bool => (PhysicalType::BOOLEAN, ConvertedType::NONE),
            DataType::Utf8 => (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8),
            DataType::Date => (PhysicalType::INT32, ConvertedType::DATE),
            DataType::Timestamp => (PhysicalType::INT64, ConvertedType::TIMESTAMP_MILLIS),
        };
        let column = Type::primitive_type_builder(&field.name, physical)
            .with_repetition(Repetition::OPTIONAL)
            .with_converted_type(converted)
            .build()?;
        fields.push(Arc::new(column));
    }
    Ok(Type::group_type_builder("schema").with_fields(fields).build()?)
}

/// Non-null values of column `idx`, converted with `extract`; any other variant is an error.
fn non_null<T>(dataset: &DataSet, idx: usize, extract: impl Fn(&Value) -> Option<T>) -> IngestionResult<Vec<T>> {
    let field = &dataset.schema.fields[idx];
    let mut out = Vec::with_capacity(dataset.row_count());
    for value in dataset.column(idx) {
        if let Value::Null = value {
            continue;
        }
        match extract(value) {
            Some(v) => out.push(v),
            None => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "column '{}' is {:?} but holds {value:?}",
                        field.name, field.data_type
                    ),
                });
            }
        }
    }
    Ok(out)
}

fn write_column(writer: &mut ColumnWriter<'_>, dataset: &DataSet, idx: usize) -> IngestionResult<()> {
    let field = &dataset.schema.fields[idx];
    let defs: Vec<i16> = dataset
        .column(idx)
        .map(|v| if matches!(v, Value::Null) { 0 } else { 1 })
        .collect();

    match (writer, field.data_type) {
        (ColumnWriter::Int64ColumnWriter(w), DataType::Int64) => {
            let values = non_null(dataset, idx, |v| match v {
                Value::Int64(x) => Some(*x),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (ColumnWriter::Int64ColumnWriter(w), DataType::Timestamp) => {
            let values = non_null(dataset, idx, |v| match v {
                Value::Timestamp(ts) => Some(ts.and_utc().timestamp_millis()),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (ColumnWriter::Int32ColumnWriter(w), DataType::Date) => {
            let epoch = epoch_date();
            let values = non_null(dataset, idx, |v| match v {
                Value::Date(d) => i32::try_from(d.signed_duration_since(epoch).num_days()).ok(),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (ColumnWriter::DoubleColumnWriter(w), DataType::Float64) => {
            let values = non_null(dataset, idx, |v| match v {
                Value::Float64(x) => Some(*x),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (ColumnWriter::BoolColumnWriter(w), DataType::Bool) => {
            let values = non_null(dataset, idx, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (ColumnWriter::ByteArrayColumnWriter(w), DataType::Utf8) => {
            let values = non_null(dataset, idx, |v| match v {
                Value::Utf8(s) => Some(ByteArray::from(s.as_str())),
                _ => None,
            })?;
            w.write_batch(&values, Some(defs.as_slice()), None)?;
        }
        (_, data_type) => {
            return Err(IngestionError::SchemaMismatch {
                message: format!("no parquet writer for column '{}' ({data_type:?})", field.name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::parquet::read_parquet_bytes;
    use crate::store::MemoryObjectStore;
    use crate::types::Field;
    use chrono::NaiveDate;

    fn sample() -> DataSet {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::Utf8),
                Field::new("score", DataType::Float64),
                Field::new("active", DataType::Bool),
                Field::new("day", DataType::Date),
                Field::new("seen", DataType::Timestamp),
            ]),
            vec![
                vec![
                    Value::Int64(1),
                    Value::Utf8("Ada".to_string()),
                    Value::Float64(98.5),
                    Value::Bool(true),
                    Value::Date(day),
                    Value::Timestamp(day.and_hms_milli_opt(10, 30, 0, 250).unwrap()),
                ],
                vec![
                    Value::Int64(2),
                    Value::Null,
                    Value::Null,
                    Value::Bool(false),
                    Value::Date(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()),
                    Value::Null,
                ],
            ],
        )
    }

    #[test]
    fn round_trip_preserves_names_types_and_values() {
        let ds = sample();
        let bytes = encode_parquet(&ds).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");

        let back = read_parquet_bytes(&bytes).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn encoding_is_deterministic() {
        let ds = sample();
        assert_eq!(encode_parquet(&ds).unwrap(), encode_parquet(&ds).unwrap());
    }

    #[test]
    fn mistyped_value_is_rejected() {
        let ds = DataSet::new(
            Schema::new(vec![Field::new("id", DataType::Int64)]),
            vec![vec![Value::Utf8("x".to_string())]],
        );
        let err = encode_parquet(&ds).unwrap_err();
        assert!(err.to_string().contains("column 'id'"));
    }

    #[test]
    fn output_location_substitutes_zone_and_keeps_directory() {
        assert_eq!(
            output_bucket("acme-input-raw-eu", "input-raw", "staging-zone"),
            "acme-staging-zone-eu"
        );
        assert_eq!(output_key("district_a/2024/sales.csv", "sales_20240105"), "district_a/2024/sales_20240105.parquet");
        assert_eq!(output_key("sales.csv", "sales"), "sales.parquet");
    }

    #[test]
    fn publish_puts_the_encoded_bytes() {
        let store = MemoryObjectStore::new();
        let loc = publish_artifact(&store, &sample(), "stage", "d/out.parquet").unwrap();
        let stored = store.object("stage", "d/out.parquet").unwrap();
        assert_eq!(stored.len(), loc.bytes);
        assert_eq!(store.calls().writes(), 1);
    }
}
