//! Per-file ingestion pipeline.
//!
//! Most callers build one [`Pipeline`] per deployment and call [`Pipeline::handle_event`] (or
//! [`Pipeline::process`]) for every arrival notification. A file goes through:
//!
//! 1. rule resolution ([`crate::resolver`]),
//! 2. structural validation on a sample ([`crate::ingestion::validation`]),
//! 3. typed parsing of the full object ([`crate::ingestion::csv`]),
//! 4. date derivation ([`crate::dates`]),
//! 5. artifact publication ([`crate::writer`]).
//!
//! Structural failures are returned as [`Outcome::Rejected`]; they are decisions, not errors.
//! Everything else that stops a file (empty file, sample overflow, parse failure, unavailable
//! collaborators, broken rules) is an [`IngestionError`].

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dates::derive_dates;
use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::csv::parse_object;
use crate::ingestion::encoding::RecordDelimiters;
use crate::ingestion::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use crate::ingestion::validation::{StructuralFailure, Verdict, validate_structure};
use crate::resolver::{Resolution, resolve_rules};
use crate::store::{ObjectStore, RuleStore};
use crate::writer::{output_bucket, output_key, publish_artifact};

/// One object named by an arrival notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalRecord {
    pub bucket: String,
    pub key: String,
}

/// An arrival notification, possibly carrying several objects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArrivalEvent {
    pub records: Vec<ArrivalRecord>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "Records", default)]
    records: Vec<RawRecord>,
}

#[derive(Deserialize)]
struct RawRecord {
    s3: RawS3,
}

#[derive(Deserialize)]
struct RawS3 {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Deserialize)]
struct RawObject {
    key: String,
}

impl ArrivalEvent {
    /// An event naming a single object.
    pub fn single(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            records: vec![ArrivalRecord {
                bucket: bucket.into(),
                key: key.into(),
            }],
        }
    }

    /// Decode an object-created notification (`{"Records": [{"s3": {"bucket": {"name"}, "object": {"key"}}}]}`).
    ///
    /// Object keys are taken as-is.
    pub fn from_json(json: &str) -> IngestionResult<Self> {
        let raw: RawEvent = serde_json::from_str(json).map_err(|e| IngestionError::Event {
            message: e.to_string(),
        })?;
        Ok(Self {
            records: raw
                .records
                .into_iter()
                .map(|r| ArrivalRecord {
                    bucket: r.s3.bucket.name,
                    key: r.s3.object.key,
                })
                .collect(),
        })
    }
}

/// What happened to one arriving object.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The object is not in the intake bucket; nothing was read.
    Ignored { bucket: String },
    /// No routing entry matches the file; nothing was written.
    Unresolved { document_key: String, file_name: String },
    /// The file failed structural validation; nothing was written.
    Rejected { key: String, reason: StructuralFailure },
    /// An artifact was published.
    Ingested(IngestionStats),
}

/// Validates arriving files and publishes them as Parquet artifacts.
pub struct Pipeline {
    config: PipelineConfig,
    objects: Arc<dyn ObjectStore>,
    rules: Arc<dyn RuleStore>,
    delimiters: RecordDelimiters,
    observer: Option<Arc<dyn IngestionObserver>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("delimiters", &self.delimiters)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline; the configuration is validated first.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use intake_validation::config::PipelineConfig;
    /// use intake_validation::ingestion::TracingObserver;
    /// use intake_validation::pipeline::{ArrivalEvent, Pipeline};
    /// use intake_validation::store::{LocalObjectStore, MemoryRuleStore};
    ///
    /// # fn main() -> Result<(), intake_validation::IngestionError> {
    /// let rules = MemoryRuleStore::from_json(&std::fs::read_to_string("rules.json")?)
    ///     .map_err(|e| intake_validation::IngestionError::Config { message: e.to_string() })?;
    /// let pipeline = Pipeline::new(
    ///     PipelineConfig::from_env()?,
    ///     Arc::new(LocalObjectStore::new("./buckets")),
    ///     Arc::new(rules),
    /// )?
    /// .with_observer(Arc::new(TracingObserver));
    ///
    /// let event = ArrivalEvent::from_json(&std::fs::read_to_string("event.json")?)?;
    /// for outcome in pipeline.handle_event(&event) {
    ///     println!("{:?}", outcome?);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        config: PipelineConfig,
        objects: Arc<dyn ObjectStore>,
        rules: Arc<dyn RuleStore>,
    ) -> IngestionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            objects,
            rules,
            delimiters: RecordDelimiters::default(),
            observer: None,
        })
    }

    /// Report outcomes to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the record delimiter table.
    pub fn with_record_delimiters(mut self, delimiters: RecordDelimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every record of `event`, in order. One record failing does not stop the others.
    pub fn handle_event(&self, event: &ArrivalEvent) -> Vec<IngestionResult<Outcome>> {
        event
            .records
            .iter()
            .map(|r| self.process(&r.bucket, &r.key))
            .collect()
    }

    /// Process one arriving object.
    ///
    /// When an observer is configured, this reports:
    ///
    /// - `on_success` when an artifact was published
    /// - `on_rejected` when the file failed structural validation
    /// - `on_failure` on error, with a computed severity
    /// - `on_alert` on error when the severity is >= `alert_at_or_above`
    pub fn process(&self, bucket: &str, key: &str) -> IngestionResult<Outcome> {
        if bucket != self.config.intake_bucket {
            debug!(bucket, key, intake = %self.config.intake_bucket, "not the intake bucket; ignored");
            return Ok(Outcome::Ignored {
                bucket: bucket.to_string(),
            });
        }

        let ctx = IngestionContext {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        let result = self.run(bucket, key);

        if let Some(obs) = self.observer.as_ref() {
            match &result {
                Ok(Outcome::Ingested(stats)) => obs.on_success(&ctx, stats),
                Ok(Outcome::Rejected { reason, .. }) => obs.on_rejected(&ctx, &reason.to_string()),
                Ok(Outcome::Ignored { .. } | Outcome::Unresolved { .. }) => {}
                Err(e) => {
                    let sev = IngestionSeverity::for_error(e);
                    obs.on_failure(&ctx, sev, e);
                    if sev >= self.config.alert_at_or_above {
                        obs.on_alert(&ctx, sev, e);
                    }
                }
            }
        }

        result
    }

    fn run(&self, bucket: &str, key: &str) -> IngestionResult<Outcome> {
        let resolved = match resolve_rules(self.rules.as_ref(), key)? {
            Resolution::Resolved(resolved) => resolved,
            Resolution::Unresolved {
                document_key,
                file_name,
            } => {
                info!(bucket, key, "no routing entry for file; skipped");
                return Ok(Outcome::Unresolved {
                    document_key,
                    file_name,
                });
            }
        };
        let rules = resolved.descriptor.rules();

        let sample = match validate_structure(
            self.objects.as_ref(),
            bucket,
            key,
            &resolved.file_name,
            rules,
            &self.delimiters,
            self.config.sampler,
        )? {
            Verdict::Pass(sample) => sample,
            Verdict::Fail(reason) => {
                return Ok(Outcome::Rejected {
                    key: key.to_string(),
                    reason,
                });
            }
        };
        debug!(
            key,
            encoding = sample.encoding.name(),
            sampled_bytes = sample.sampled_bytes,
            fetches = sample.fetches,
            "structural validation passed"
        );

        let table = parse_object(
            self.objects.as_ref(),
            bucket,
            key,
            rules,
            sample.encoding,
            sample.terminator,
        )?;
        let (table, output_name) = derive_dates(
            table,
            rules.date_details.as_ref(),
            &resolved.file_name,
            &resolved.output_base_file_name,
        )?;

        let target_bucket = output_bucket(bucket, &self.config.intake_bucket, &self.config.staging_bucket);
        let target_key = output_key(key, &output_name);
        let location = publish_artifact(self.objects.as_ref(), &table, &target_bucket, &target_key)?;

        Ok(Outcome::Ingested(IngestionStats {
            rows: table.row_count(),
            columns: table.schema.fields.len(),
            output_bucket: location.bucket,
            output_key: location.key,
        }))
    }
}
