//! Derived date columns and the output file name they imply.

use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::rules::{ColumnPeriod, DateDetails, FileNameDate, Period, normalize_header};
use crate::types::{DataSet, DataType, Field, Value};

/// Apply `details` (if any) to `dataset` and compute the output file name.
///
/// Without date details the dataset is returned untouched and the name is `output_base`.
pub fn derive_dates(
    mut dataset: DataSet,
    details: Option<&DateDetails>,
    file_name: &str,
    output_base: &str,
) -> IngestionResult<(DataSet, String)> {
    let name = match details {
        None => output_base.to_string(),
        Some(DateDetails::FileName(rule)) => from_file_name(&mut dataset, rule, file_name, output_base)?,
        Some(DateDetails::ColumnPeriod(rule)) => from_column_period(&mut dataset, rule, output_base)?,
    };
    debug!(file_name, output_name = %name, "derived output name");
    Ok((dataset, name))
}

fn from_file_name(
    dataset: &mut DataSet,
    rule: &FileNameDate,
    file_name: &str,
    output_base: &str,
) -> IngestionResult<String> {
    let caps = rule.pattern.captures(file_name).ok_or_else(|| IngestionError::SchemaMismatch {
        message: format!(
            "file name '{file_name}' does not match date pattern '{}'",
            rule.pattern.as_str()
        ),
    })?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let date = NaiveDate::parse_from_str(raw, &rule.format).map_err(|e| IngestionError::ParseError {
        row: 0,
        column: rule.column.clone(),
        raw: raw.to_string(),
        message: format!("{e} (format '{}')", rule.format),
    })?;

    ensure_new_column(dataset, &rule.column)?;
    dataset.push_column(Field::new(&rule.column, DataType::Date), |_| Value::Date(date));
    Ok(format!("{output_base}_{}", format_date(date, &rule.name_format)?))
}

fn from_column_period(dataset: &mut DataSet, rule: &ColumnPeriod, output_base: &str) -> IngestionResult<String> {
    let wanted = normalize_header(&rule.source_column);
    let src = dataset
        .schema
        .fields
        .iter()
        .position(|f| normalize_header(&f.name) == wanted)
        .ok_or_else(|| IngestionError::SchemaMismatch {
            message: format!("date source column '{}' is not declared", rule.source_column),
        })?;
    match dataset.schema.fields[src].data_type {
        DataType::Date | DataType::Timestamp => {}
        other => {
            return Err(IngestionError::SchemaMismatch {
                message: format!(
                    "date source column '{}' is {other:?}, expected a date",
                    rule.source_column
                ),
            });
        }
    }
    ensure_new_column(dataset, &rule.column)?;

    let period = rule.period;
    let mut earliest: Option<NaiveDate> = None;
    dataset.push_column(Field::new(&rule.column, DataType::Date), |row| {
        match row[src].as_date().and_then(|d| truncate(d, period)) {
            Some(start) => {
                earliest = Some(earliest.map_or(start, |e| e.min(start)));
                Value::Date(start)
            }
            None => Value::Null,
        }
    });

    match earliest {
        Some(start) => Ok(format!("{output_base}_{}", format_date(start, &rule.name_format)?)),
        None => Ok(output_base.to_string()),
    }
}

fn ensure_new_column(dataset: &DataSet, column: &str) -> IngestionResult<()> {
    let wanted = normalize_header(column);
    if dataset.schema.field_names().any(|n| normalize_header(n) == wanted) {
        return Err(IngestionError::SchemaMismatch {
            message: format!("derived column '{column}' already exists"),
        });
    }
    Ok(())
}

/// First day of the period containing `date`.
fn truncate(date: NaiveDate, period: Period) -> Option<NaiveDate> {
    match period {
        Period::Day => Some(date),
        Period::Month => date.with_day(1),
        Period::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    }
}

fn format_date(date: NaiveDate, format: &str) -> IngestionResult<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(format)).map_err(|_| IngestionError::Config {
        message: format!("invalid date name format '{format}'"),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schema;
    use serde_json::json;

    fn details(v: serde_json::Value) -> DateDetails {
        serde_json::from_value(v).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bookings() -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("booked", DataType::Date),
            ]),
            vec![
                vec![Value::Int64(1), Value::Date(d(2024, 3, 17))],
                vec![Value::Int64(2), Value::Date(d(2024, 2, 29))],
                vec![Value::Int64(3), Value::Null],
            ],
        )
    }

    #[test]
    fn without_details_name_is_the_base() {
        let (ds, name) = derive_dates(bookings(), None, "sales.csv", "sales").unwrap();
        assert_eq!(name, "sales");
        assert_eq!(ds, bookings());
    }

    #[test]
    fn file_name_strategy_adds_constant_column() {
        let rule = details(json!({
            "strategy": "file_name",
            "pattern": r"sales_(\d{8})",
            "format": "%Y%m%d",
            "column": "report_date"
        }));
        let (ds, name) = derive_dates(bookings(), Some(&rule), "sales_20240105.csv", "sales").unwrap();

        assert_eq!(name, "sales_20240105");
        assert_eq!(ds.schema.index_of("report_date"), Some(2));
        assert!(ds.column(2).all(|v| *v == Value::Date(d(2024, 1, 5))));
    }

    #[test]
    fn file_name_strategy_fails_when_name_has_no_date() {
        let rule = details(json!({
            "strategy": "file_name",
            "pattern": r"sales_(\d{8})",
            "format": "%Y%m%d",
            "column": "report_date"
        }));
        let err = derive_dates(bookings(), Some(&rule), "sales.csv", "sales").unwrap_err();
        assert!(err.to_string().contains("does not match date pattern"));
    }

    #[test]
    fn column_period_truncates_and_names_by_earliest() {
        let rule = details(json!({
            "strategy": "column_period",
            "source_column": "Booked",
            "column": "booked_month",
            "period": "month",
            "name_format": "%Y%m"
        }));
        let (ds, name) = derive_dates(bookings(), Some(&rule), "b.csv", "bookings").unwrap();

        assert_eq!(name, "bookings_202402");
        assert_eq!(
            ds.column(2).cloned().collect::<Vec<_>>(),
            vec![Value::Date(d(2024, 3, 1)), Value::Date(d(2024, 2, 1)), Value::Null]
        );
    }

    #[test]
    fn column_period_requires_a_temporal_source() {
        let rule = details(json!({
            "strategy": "column_period",
            "source_column": "id",
            "column": "id_year",
            "period": "year"
        }));
        assert!(derive_dates(bookings(), Some(&rule), "b.csv", "bookings").is_err());
    }

    #[test]
    fn derived_column_must_not_shadow_a_declared_one() {
        let rule = details(json!({
            "strategy": "column_period",
            "source_column": "booked",
            "column": "BOOKED",
            "period": "day"
        }));
        assert!(derive_dates(bookings(), Some(&rule), "b.csv", "bookings").is_err());
    }
}
