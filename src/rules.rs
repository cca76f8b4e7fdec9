//! Routing and validation-rule records.
//!
//! Records arrive from the [`crate::store::RuleStore`] as loosely-typed JSON. They are decoded
//! once, at load time, into the typed shapes below; a record that does not decode (unknown
//! data type, bad regex, unknown encoding label, multi-character delimiter...) is rejected
//! with [`IngestionError::InvalidRules`] before any file bytes are touched.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::format::{Fixed, Item, Numeric, StrftimeItems};
use encoding_rs::Encoding;
use regex::Regex;
use serde::Deserialize;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataType, Field, Schema};

/// Format applied to `date` columns that do not declare one.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Normalise header text for comparisons: trim and case-fold.
pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A compiled regular expression that matches only at the start of the input.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    /// `true` if the pattern matches a prefix of `input`.
    pub fn matches_prefix(&self, input: &str) -> bool {
        self.0.find(input).is_some_and(|m| m.start() == 0)
    }

    /// Capture groups of the first match, if any.
    pub fn captures<'h>(&self, input: &'h str) -> Option<regex::Captures<'h>> {
        self.0.captures(input)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.0.as_str()).finish()
    }
}

impl TryFrom<String> for Pattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pattern::new(&value).map_err(|e| format!("invalid regex '{value}': {e}"))
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// One routing entry: a file-name pattern and the source it belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingEntry {
    pub file_name_regex: Pattern,
    pub district_key: String,
    pub output_base_file_name: String,
    /// Lower values are tried first; entries without a priority count as `0`.
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntries {
    List(Vec<RoutingEntry>),
    Map(BTreeMap<String, RoutingEntry>),
}

/// Routing entries in evaluation order.
///
/// A list keeps its order, a map is evaluated in key order; either is then stably sorted by
/// `priority`.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawEntries")]
pub struct RoutingEntries(Vec<RoutingEntry>);

impl From<RawEntries> for RoutingEntries {
    fn from(raw: RawEntries) -> Self {
        let mut entries = match raw {
            RawEntries::List(entries) => entries,
            RawEntries::Map(entries) => entries.into_values().collect(),
        };
        entries.sort_by_key(|e| e.priority.unwrap_or(0));
        Self(entries)
    }
}

impl RoutingEntries {
    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.0.iter()
    }
}

/// Directory-level routing record, stored under the file's directory path.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingRecord {
    #[serde(default)]
    pub document_key: String,
    pub files: RoutingEntries,
}

impl RoutingRecord {
    /// Decode a routing record loaded from `key`.
    pub fn from_record(key: &str, record: serde_json::Value) -> IngestionResult<Self> {
        serde_json::from_value(record).map_err(|e| IngestionError::InvalidRules {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// First entry (in evaluation order) whose pattern matches `file_name`.
    pub fn route(&self, file_name: &str) -> Option<&RoutingEntry> {
        self.files
            .iter()
            .find(|entry| entry.file_name_regex.matches_prefix(file_name))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accepted file extensions, lower-cased and without a leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct FileExtensions(Vec<String>);

impl From<OneOrMany> for FileExtensions {
    fn from(raw: OneOrMany) -> Self {
        let list = match raw {
            OneOrMany::One(ext) => vec![ext],
            OneOrMany::Many(exts) => exts,
        };
        Self(
            list.iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }
}

impl FileExtensions {
    pub fn new<I, S>(exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(OneOrMany::Many(exts.into_iter().map(Into::into).collect()))
    }

    /// `true` if `file_name` ends with `.<ext>` for one of the accepted extensions.
    pub fn accepts(&self, file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        self.0.iter().any(|ext| {
            lower
                .strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
        })
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Declared text encoding of a source.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EncodingRule {
    /// Detect from the sample.
    Auto,
    /// Confirm the sample against this encoding.
    Expected(&'static Encoding),
}

impl fmt::Debug for EncodingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingRule::Auto => f.write_str("Auto"),
            EncodingRule::Expected(enc) => f.debug_tuple("Expected").field(&enc.name()).finish(),
        }
    }
}

impl TryFrom<String> for EncodingRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let label = value.trim();
        if label.eq_ignore_ascii_case("auto") {
            return Ok(EncodingRule::Auto);
        }
        Encoding::for_label(label.as_bytes())
            .map(EncodingRule::Expected)
            .ok_or_else(|| format!("unsupported encoding '{value}'"))
    }
}

impl<'de> Deserialize<'de> for EncodingRule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EncodingRule::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Single-byte field delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Delimiter(u8);

impl Delimiter {
    pub const COMMA: Delimiter = Delimiter(b',');

    pub fn byte(self) -> u8 {
        self.0
    }
}

impl TryFrom<String> for Delimiter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "\\t" | "tab" => return Ok(Delimiter(b'\t')),
            _ => {}
        }
        match value.as_bytes() {
            [b] if b.is_ascii() && *b != b'\n' && *b != b'\r' && *b != b'"' => Ok(Delimiter(*b)),
            _ => Err(format!("delimiter must be a single ASCII character, got '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DeclaredType {
    #[serde(alias = "str", alias = "object")]
    String,
    #[serde(alias = "int64", alias = "integer")]
    Int,
    #[serde(alias = "float64", alias = "double")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "datetime")]
    Date,
}

#[derive(Deserialize)]
struct RawColumnSpec {
    header: String,
    data_type: DeclaredType,
    #[serde(default)]
    date_format: Option<String>,
}

/// How a declared column is typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Int,
    Float,
    Bool,
    Date { format: String },
    Timestamp { format: String },
}

/// A declared column: its header text and type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawColumnSpec")]
pub struct ColumnSpec {
    pub header: String,
    pub kind: ColumnKind,
}

impl TryFrom<RawColumnSpec> for ColumnSpec {
    type Error = String;

    fn try_from(raw: RawColumnSpec) -> Result<Self, Self::Error> {
        if raw.header.trim().is_empty() {
            return Err("column header must not be empty".to_string());
        }
        let kind = match raw.data_type {
            DeclaredType::String => ColumnKind::String,
            DeclaredType::Int => ColumnKind::Int,
            DeclaredType::Float => ColumnKind::Float,
            DeclaredType::Bool => ColumnKind::Bool,
            DeclaredType::Date => {
                let format = raw
                    .date_format
                    .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
                temporal_kind(&raw.header, format)?
            }
        };
        Ok(Self {
            header: raw.header,
            kind,
        })
    }
}

fn temporal_kind(header: &str, format: String) -> Result<ColumnKind, String> {
    let mut has_time = false;
    let mut complete = false;
    let (mut hour, mut hour12, mut meridiem, mut minute) = (false, false, false, false);
    for item in StrftimeItems::new(&format) {
        match item {
            Item::Error => {
                return Err(format!("column '{header}': invalid date_format '{format}'"));
            }
            Item::Numeric(Numeric::Hour, _) => hour = true,
            Item::Numeric(Numeric::Hour12, _) => hour12 = true,
            Item::Numeric(Numeric::Minute, _) => minute = true,
            Item::Fixed(Fixed::UpperAmPm | Fixed::LowerAmPm) => meridiem = true,
            Item::Numeric(Numeric::Second | Numeric::Nanosecond, _) => has_time = true,
            Item::Numeric(Numeric::Timestamp, _) | Item::Fixed(Fixed::RFC2822 | Fixed::RFC3339) => {
                complete = true;
            }
            _ => {}
        }
    }
    has_time |= complete || hour || hour12 || minute;
    if !has_time {
        return Ok(ColumnKind::Date { format });
    }
    if !complete && !((hour || (hour12 && meridiem)) && minute) {
        return Err(format!(
            "column '{header}': date_format '{format}' has a time of day without both hour and minute"
        ));
    }
    Ok(ColumnKind::Timestamp { format })
}

impl ColumnSpec {
    /// The table field this column parses into.
    pub fn field(&self) -> Field {
        match &self.kind {
            ColumnKind::String => Field::new(&self.header, DataType::Utf8),
            ColumnKind::Int => Field::new(&self.header, DataType::Int64),
            ColumnKind::Float => Field::new(&self.header, DataType::Float64),
            ColumnKind::Bool => Field::new(&self.header, DataType::Bool),
            ColumnKind::Date { format } => Field::with_format(&self.header, DataType::Date, format),
            ColumnKind::Timestamp { format } => {
                Field::with_format(&self.header, DataType::Timestamp, format)
            }
        }
    }
}

/// Calendar period a date is truncated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
    Year,
}

fn default_name_format() -> String {
    "%Y%m%d".to_string()
}

/// Derive a constant date column from a date embedded in the file name.
#[derive(Debug, Clone, Deserialize)]
pub struct FileNameDate {
    /// Pattern whose first capture group (or whole match) holds the date text.
    pub pattern: Pattern,
    /// Format of the captured text.
    pub format: String,
    /// Name of the column to add.
    pub column: String,
    /// Format of the date in the output file name.
    #[serde(default = "default_name_format")]
    pub name_format: String,
}

/// Derive a period-start column from an existing date or timestamp column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnPeriod {
    pub source_column: String,
    pub column: String,
    pub period: Period,
    #[serde(default = "default_name_format")]
    pub name_format: String,
}

/// Rules for derived date columns, selected by the `strategy` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DateDetails {
    FileName(FileNameDate),
    ColumnPeriod(ColumnPeriod),
}

/// Validation rules of a source. Every key is optional; an absent key skips its check.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub file_extension: Option<FileExtensions>,
    pub encoding: Option<EncodingRule>,
    pub delimiter: Option<Delimiter>,
    pub columns_count: Option<usize>,
    pub columns_details: Option<Vec<ColumnSpec>>,
    pub date_details: Option<DateDetails>,
}

impl ValidationRules {
    /// Field delimiter, `,` when not declared.
    pub fn field_delimiter(&self) -> Delimiter {
        self.delimiter.unwrap_or(Delimiter::COMMA)
    }

    /// Declared encoding, auto-detection when not declared.
    pub fn encoding_rule(&self) -> EncodingRule {
        self.encoding.unwrap_or(EncodingRule::Auto)
    }

    /// Table schema built from `columns_details`, in declaration order.
    pub fn schema(&self) -> Option<Schema> {
        self.columns_details
            .as_ref()
            .map(|cols| Schema::new(cols.iter().map(ColumnSpec::field).collect()))
    }

    fn check(&self) -> Result<(), String> {
        if let Some(cols) = &self.columns_details {
            if cols.is_empty() {
                return Err("columns_details must not be empty".to_string());
            }
            let mut seen = HashSet::new();
            for col in cols {
                if !seen.insert(normalize_header(&col.header)) {
                    return Err(format!("duplicate column '{}'", col.header));
                }
            }
            match self.columns_count {
                Some(count) if count != cols.len() => {
                    return Err(format!(
                        "columns_count={count} disagrees with {} columns_details",
                        cols.len()
                    ));
                }
                _ => {}
            }
        }
        if self.columns_count == Some(0) {
            return Err("columns_count must be > 0".to_string());
        }
        Ok(())
    }
}

/// Schema and validation configuration for one data source.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDescriptor {
    #[serde(default)]
    pub document_key: String,
    #[serde(default)]
    pub validation_rules: ValidationRules,
}

impl RuleDescriptor {
    /// Decode and check a rules record loaded from `key`.
    pub fn from_record(key: &str, record: serde_json::Value) -> IngestionResult<Self> {
        let invalid = |message: String| IngestionError::InvalidRules {
            key: key.to_string(),
            message,
        };
        let descriptor: RuleDescriptor =
            serde_json::from_value(record).map_err(|e| invalid(e.to_string()))?;
        descriptor.validation_rules.check().map_err(invalid)?;
        Ok(descriptor)
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.validation_rules
    }
}
