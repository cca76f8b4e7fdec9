use thiserror::Error;

use crate::store::StoreError;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned by the pipeline stages.
///
/// Structural validation failures are not errors: they are reported as
/// [`crate::pipeline::Outcome::Rejected`]. Everything here is a hard failure surfaced to the
/// invoking harness.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (temporary files, local stores).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader error (including rows with the wrong number of fields).
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet encode/decode error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// An external collaborator (object store, rule store, topic directory) failed.
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] StoreError),

    /// A rule or routing record could not be loaded or is malformed.
    #[error("invalid rules at '{key}': {message}")]
    InvalidRules { key: String, message: String },

    /// Pipeline configuration is missing or inconsistent.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The arrival notification could not be understood.
    #[error("invalid arrival event: {message}")]
    Event { message: String },

    /// The sampled content is empty.
    #[error("the file is empty: {key}")]
    EmptyFile { key: String },

    /// The sample hit a cap before two complete records were seen.
    #[error("sample of '{key}' reached {bytes} bytes after {fetches} fetches without two complete records")]
    SampleOverflow {
        key: String,
        bytes: usize,
        fetches: usize,
    },

    /// The full object is not valid in its confirmed encoding.
    #[error("'{key}' is not valid {encoding}")]
    Decode { encoding: String, key: String },

    /// The input does not conform to the declared columns.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A value could not be parsed into the declared [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

/// Failure taxonomy used for alerting and for the harness' retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EmptyFile,
    SampleOverflow,
    ParseFailure,
    UpstreamUnavailable,
    Misconfiguration,
}

impl IngestionError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestionError::EmptyFile { .. } => FailureKind::EmptyFile,
            IngestionError::SampleOverflow { .. } => FailureKind::SampleOverflow,
            IngestionError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => FailureKind::UpstreamUnavailable,
                _ => FailureKind::ParseFailure,
            },
            IngestionError::Decode { .. }
            | IngestionError::SchemaMismatch { .. }
            | IngestionError::ParseError { .. } => FailureKind::ParseFailure,
            IngestionError::Io(_) | IngestionError::Upstream(_) | IngestionError::Parquet(_) => {
                FailureKind::UpstreamUnavailable
            }
            IngestionError::InvalidRules { .. }
            | IngestionError::Config { .. }
            | IngestionError::Event { .. } => FailureKind::Misconfiguration,
        }
    }
}
