//! Structural validation from a sample of the file.
//!
//! Checks run in a fixed order and stop at the first failure: extension (no bytes fetched),
//! encoding (first range only), then column count and column names on the sampled header.
//! A rule key that is absent skips its check.

use std::collections::HashSet;

use encoding_rs::Encoding;
use thiserror::Error;
use tracing::debug;

use crate::config::SamplerOptions;
use crate::error::{IngestionError, IngestionResult};
use crate::rules::{Delimiter, EncodingRule, ValidationRules, normalize_header};
use crate::store::ObjectStore;

use super::encoding::{EncodingCheck, RecordDelimiters, confirm_encoding, file_extension, record_terminator};
use super::sampler::{FileExtract, Sampler};

/// Why a file was refused before parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralFailure {
    #[error("'{file_name}' does not have an accepted extension (expected one of {expected:?})")]
    Extension { file_name: String, expected: Vec<String> },

    #[error("encoding not confirmed: expected {expected}, found {found}")]
    Encoding { expected: String, found: String },

    #[error("unsupported file type: extension {extension:?} decoded as {encoding}")]
    UnsupportedFileType {
        extension: Option<String>,
        encoding: String,
    },

    #[error("file has a header but no data row")]
    NoDataRow,

    #[error("header could not be read: {message}")]
    UnreadableHeader { message: String },

    #[error("expected {expected} columns, header has {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("column names do not match: missing {missing:?}, unexpected {unexpected:?}")]
    ColumnNames {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

/// What the later stages need from a file that passed.
#[derive(Debug, Clone)]
pub struct ValidatedSample {
    /// Encoding confirmed (or detected) on the sample; the full parse decodes with it.
    pub encoding: &'static Encoding,
    /// Record terminator for the file type; the full parse splits records with it.
    pub terminator: csv::Terminator,
    pub extract: FileExtract,
    /// Normalised header fields.
    pub header: Vec<String>,
    pub sampled_bytes: usize,
    pub fetches: usize,
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Pass(ValidatedSample),
    Fail(StructuralFailure),
}

/// Extension check. Passes when the rules declare no extension.
pub fn check_extension(file_name: &str, rules: &ValidationRules) -> Result<(), StructuralFailure> {
    match &rules.file_extension {
        Some(exts) if !exts.accepts(file_name) => Err(StructuralFailure::Extension {
            file_name: file_name.to_string(),
            expected: exts.as_slice().to_vec(),
        }),
        _ => Ok(()),
    }
}

/// Split a header record on `delimiter` (honouring quotes) and normalise each field.
pub fn split_header(header: &str, delimiter: Delimiter) -> Result<Vec<String>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter.byte())
        .from_reader(header.as_bytes());
    match rdr.records().next() {
        Some(record) => Ok(record?.iter().map(normalize_header).collect()),
        None => Ok(Vec::new()),
    }
}

/// Column-count check. Passes when the rules declare no count.
pub fn check_column_count(header: &[String], rules: &ValidationRules) -> Result<(), StructuralFailure> {
    match rules.columns_count {
        Some(expected) if expected != header.len() => Err(StructuralFailure::ColumnCount {
            expected,
            found: header.len(),
        }),
        _ => Ok(()),
    }
}

/// Column-name check against `columns_details`, order-insensitive. Passes when no columns
/// are declared.
pub fn check_column_names(header: &[String], rules: &ValidationRules) -> Result<(), StructuralFailure> {
    let Some(columns) = &rules.columns_details else {
        return Ok(());
    };
    let expected: Vec<String> = columns.iter().map(|c| normalize_header(&c.header)).collect();
    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let unexpected: Vec<String> = header
        .iter()
        .filter(|h| !expected_set.contains(h.as_str()) || !seen.insert(h.as_str()))
        .cloned()
        .collect();
    let missing: Vec<String> = expected
        .iter()
        .filter(|e| !seen.contains(e.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(StructuralFailure::ColumnNames { missing, unexpected })
    }
}

/// Run every structural check for one object.
///
/// Returns `Ok(Verdict::Fail(..))` for rule violations; `Err` is reserved for hard failures
/// (store errors, empty files, sample overflow).
pub fn validate_structure(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    file_name: &str,
    rules: &ValidationRules,
    delimiters: &RecordDelimiters,
    sampler_options: SamplerOptions,
) -> IngestionResult<Verdict> {
    if let Err(failure) = check_extension(file_name, rules) {
        return Ok(Verdict::Fail(failure));
    }

    let mut sampler = Sampler::new(store, bucket, key, sampler_options);
    sampler.grow()?;

    let encoding = match confirm_encoding(sampler.bytes(), rules.encoding_rule()) {
        EncodingCheck::Confirmed(encoding) => encoding,
        EncodingCheck::Mismatch { expected, detected } => {
            return Ok(Verdict::Fail(StructuralFailure::Encoding {
                expected: expected.name().to_string(),
                found: detected.name().to_string(),
            }));
        }
    };
    debug!(key, encoding = encoding.name(), "encoding confirmed");

    let Some((record_delimiter, terminator)) = delimiters
        .lookup(file_name, encoding)
        .and_then(|d| record_terminator(d).map(|t| (d, t)))
    else {
        return Ok(Verdict::Fail(StructuralFailure::UnsupportedFileType {
            extension: file_extension(file_name),
            encoding: encoding.name().to_string(),
        }));
    };

    let extract = match sampler.extract(encoding, record_delimiter) {
        Ok(extract) => extract,
        Err(IngestionError::Decode { .. }) => {
            let expected = match rules.encoding_rule() {
                EncodingRule::Expected(enc) => enc.name(),
                EncodingRule::Auto => encoding.name(),
            };
            return Ok(Verdict::Fail(StructuralFailure::Encoding {
                expected: expected.to_string(),
                found: "invalid byte sequence beyond the first range".to_string(),
            }));
        }
        Err(e) => return Err(e),
    };
    debug!(key, fetches = sampler.fetches(), "extracted header and first row");

    if extract.first_row.is_none() {
        return Ok(Verdict::Fail(StructuralFailure::NoDataRow));
    }

    let header = match split_header(&extract.header, rules.field_delimiter()) {
        Ok(header) => header,
        Err(e) => {
            return Ok(Verdict::Fail(StructuralFailure::UnreadableHeader {
                message: e.to_string(),
            }));
        }
    };

    if let Err(failure) = check_column_count(&header, rules).and_then(|()| check_column_names(&header, rules)) {
        return Ok(Verdict::Fail(failure));
    }

    Ok(Verdict::Pass(ValidatedSample {
        encoding,
        terminator,
        extract,
        header,
        sampled_bytes: sampler.bytes().len(),
        fetches: sampler.fetches(),
    }))
}
