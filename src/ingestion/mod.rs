//! Sampling, structural validation and typed parsing of arriving files.
//!
//! The stages, in the order [`crate::pipeline::Pipeline`] runs them:
//!
//! - [`sampler`]: incremental range fetches until two records are available
//! - [`encoding`]: encoding confirmation and the record delimiter table
//! - [`validation`]: extension, encoding, column count and column names
//! - [`csv`]: typed parsing of the full object
//!
//! [`parquet`] reads published artifacts back; [`observability`] holds the observer hooks.

pub mod csv;
pub mod encoding;
pub mod observability;
pub mod parquet;
pub mod sampler;
pub mod validation;

pub use encoding::RecordDelimiters;
pub use observability::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, TracingObserver,
};
pub use validation::{StructuralFailure, ValidatedSample, Verdict, validate_structure};
