//! `intake-validation` validates delimited files arriving in an intake bucket and republishes the
//! ones that conform to their source's rules as typed Parquet artifacts in a staging bucket.
//!
//! The primary entrypoint is [`pipeline::Pipeline`]: give it a [`config::PipelineConfig`], an
//! [`store::ObjectStore`] and a [`store::RuleStore`], then call
//! [`pipeline::Pipeline::process`] for each arriving object (or
//! [`pipeline::Pipeline::handle_event`] for a whole notification).
//!
//! ## What happens to a file
//!
//! 1. **Resolution**: the object key's directory selects a routing record; the first entry whose
//!    pattern matches the file name names the source and its rules.
//! 2. **Structural validation**: extension (no bytes fetched), encoding, column count and column
//!    names are checked on a small sample grown by range fetches.
//! 3. **Typed parsing**: the full object is decoded and each column parsed into its declared type.
//!    A single bad value rejects the whole file.
//! 4. **Date derivation**: optional derived date columns and a dated output name.
//! 5. **Publication**: Snappy-compressed Parquet under the same directory in the staging bucket.
//!
//! Structural failures come back as [`pipeline::Outcome::Rejected`]. Empty files, sample
//! overflow, parse failures and unavailable collaborators are [`IngestionError`]s, classified
//! by [`error::FailureKind`].
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use intake_validation::config::PipelineConfig;
//! use intake_validation::pipeline::{Outcome, Pipeline};
//! use intake_validation::store::{MemoryObjectStore, MemoryRuleStore};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), intake_validation::IngestionError> {
//! let mut rules = MemoryRuleStore::new();
//! rules.insert(
//!     "district_a",
//!     json!({"files": [{
//!         "file_name_regex": "people",
//!         "district_key": "district_a#people",
//!         "output_base_file_name": "people"
//!     }]}),
//! );
//! rules.insert(
//!     "district_a#people",
//!     json!({"validation_rules": {
//!         "file_extension": "csv",
//!         "columns_count": 3,
//!         "columns_details": [
//!             {"header": "id", "data_type": "int"},
//!             {"header": "name", "data_type": "string"},
//!             {"header": "date", "data_type": "date", "date_format": "%Y-%m-%d"}
//!         ]
//!     }}),
//! );
//!
//! let objects = Arc::new(MemoryObjectStore::new());
//! objects.insert("acme-input-raw", "district_a/people.csv", "id,name,date\n1,Alice,2024-01-05\n");
//!
//! let pipeline = Pipeline::new(
//!     PipelineConfig::new("acme-input-raw", "acme-staging-zone"),
//!     objects.clone(),
//!     Arc::new(rules),
//! )?;
//!
//! match pipeline.process("acme-input-raw", "district_a/people.csv")? {
//!     Outcome::Ingested(stats) => {
//!         assert_eq!(stats.rows, 1);
//!         assert_eq!(stats.output_bucket, "acme-staging-zone");
//!         assert_eq!(stats.output_key, "district_a/people.parquet");
//!     }
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber. Attach
//! [`ingestion::TracingObserver`] (or your own [`ingestion::IngestionObserver`]) to a pipeline to
//! get one event per file outcome.
//!
//! ## Modules
//!
//! - [`pipeline`]: per-file orchestration and arrival events
//! - [`execution`]: parallel batch execution with metrics
//! - [`resolver`] and [`rules`]: routing and rule records
//! - [`ingestion`]: sampling, encoding, structural validation, typed parsing, observers
//! - [`dates`]: derived date columns and output names
//! - [`writer`]: Parquet encoding and publication
//! - [`notify`]: topic lookup
//! - [`store`]: capability traits and in-memory/local implementations
//! - [`config`], [`types`], [`error`]

pub mod config;
pub mod dates;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod notify;
pub mod pipeline;
pub mod resolver;
pub mod rules;
pub mod store;
pub mod types;
pub mod writer;

pub use error::{IngestionError, IngestionResult};
