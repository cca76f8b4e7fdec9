//! Typed parsing of a whole delimited file.

use chrono::{NaiveDate, NaiveDateTime};
use encoding_rs::Encoding;
use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::rules::{ValidationRules, normalize_header};
use crate::store::ObjectStore;
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Fetch the full object, decode it as `encoding` and parse it against `rules`, splitting
/// records with `terminator`.
///
/// Without `columns_details` every header column is kept as a string column. The sample-time
/// checks are not repeated here.
pub fn parse_object(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    rules: &ValidationRules,
    encoding: &'static Encoding,
    terminator: csv::Terminator,
) -> IngestionResult<DataSet> {
    let bytes = store.get_full(bucket, key)?;
    let (text, had_errors) = encoding.decode_with_bom_removal(&bytes);
    if had_errors {
        return Err(IngestionError::Decode {
            encoding: encoding.name().to_string(),
            key: key.to_string(),
        });
    }
    debug!(key, bytes = bytes.len(), encoding = encoding.name(), "fetched full object");

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(rules.field_delimiter().byte())
        .terminator(terminator)
        .from_reader(text.as_bytes());
    let schema = match rules.schema() {
        Some(schema) => schema,
        None => untyped_schema(rdr.headers()?)?,
    };
    ingest_csv_from_reader(&mut rdr, &schema)
}

/// One string column per header field, named by its trimmed text.
fn untyped_schema(headers: &csv::StringRecord) -> IngestionResult<Schema> {
    let mut seen = std::collections::HashSet::new();
    let mut fields = Vec::with_capacity(headers.len());
    for h in headers {
        let name = h.trim();
        if name.is_empty() || !seen.insert(normalize_header(name)) {
            return Err(IngestionError::SchemaMismatch {
                message: format!("header field '{name}' is empty or repeated; columns are not declared"),
            });
        }
        fields.push(Field::new(name, DataType::Utf8));
    }
    Ok(Schema::new(fields))
}

/// Ingest CSV data from an existing CSV reader.
///
/// Rules:
///
/// - CSV must have headers.
/// - Headers must contain all schema fields (order can differ; matching trims and ignores case).
/// - Every row must have as many fields as the header.
/// - Each value is parsed according to the schema field type; empty cells are null.
/// - String cells are kept verbatim. Other types ignore surrounding whitespace, and a
///   whitespace-only cell is null.
pub fn ingest_csv_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    schema: &Schema,
) -> IngestionResult<DataSet> {
    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();

    // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let wanted = normalize_header(&field.name);
        match headers.iter().position(|h| *h == wanted) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "missing required column '{field}'. headers={headers:?}",
                        field = field.name
                    ),
                });
            }
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (row_idx0, result) in rdr.records().enumerate() {
        // Report 1-based row number for users; +1 again because header is row 1.
        let user_row = row_idx0 + 2;
        let record = result?;

        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (field, &csv_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let raw = record.get(csv_idx).unwrap_or("");
            row.push(parse_typed_value(user_row, field, raw)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

fn parse_typed_value(row: usize, field: &Field, raw: &str) -> IngestionResult<Value> {
    if field.data_type == DataType::Utf8 {
        return Ok(if raw.is_empty() {
            Value::Null
        } else {
            Value::Utf8(raw.to_owned())
        });
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    let fail = |message: String| IngestionError::ParseError {
        row,
        column: field.name.clone(),
        raw: raw.to_owned(),
        message,
    };
    let format = field.format.as_deref().unwrap_or(crate::rules::DEFAULT_DATE_FORMAT);

    match field.data_type {
        DataType::Utf8 => Ok(Value::Utf8(raw.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| fail(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| fail(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(fail),
        DataType::Date => NaiveDate::parse_from_str(trimmed, format)
            .map(Value::Date)
            .map_err(|e| fail(format!("{e} (format '{format}')"))),
        DataType::Timestamp => NaiveDateTime::parse_from_str(trimmed, format)
            .map(Value::Timestamp)
            .map_err(|e| fail(format!("{e} (format '{format}')"))),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}
