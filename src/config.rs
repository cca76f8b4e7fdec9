//! Pipeline configuration.
//!
//! Deployments usually configure the pipeline from environment variables
//! ([`PipelineConfig::from_env`]); embedders can also deserialize it or build it directly.

use std::env;

use serde::Deserialize;

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::IngestionSeverity;

/// Caps and step size of the incremental sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    /// Bytes requested per range fetch.
    pub chunk_bytes: usize,
    /// Maximum number of range fetches.
    pub max_fetches: usize,
    /// Hard ceiling on sampled bytes.
    pub max_sample_bytes: usize,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: 2_500,
            max_fetches: 10,
            max_sample_bytes: 1_000_000,
        }
    }
}

/// Settings of one pipeline deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    /// Bucket watched for arriving files; events for other buckets are ignored.
    pub intake_bucket: String,
    /// Bucket-name fragment substituted for `intake_bucket` to obtain the output bucket.
    pub staging_bucket: String,
    #[serde(default)]
    pub sampler: SamplerOptions,
    /// Failures at or above this severity are also reported through `on_alert`.
    #[serde(default = "default_alert_threshold")]
    pub alert_at_or_above: IngestionSeverity,
}

fn default_alert_threshold() -> IngestionSeverity {
    IngestionSeverity::Critical
}

impl PipelineConfig {
    pub fn new(intake_bucket: impl Into<String>, staging_bucket: impl Into<String>) -> Self {
        Self {
            intake_bucket: intake_bucket.into(),
            staging_bucket: staging_bucket.into(),
            sampler: SamplerOptions::default(),
            alert_at_or_above: default_alert_threshold(),
        }
    }

    /// Read configuration from the process environment.
    ///
    /// Required: `INPUT_RAW_BUCKET`, `STAGING_ZONE_BUCKET`. Optional: `SAMPLE_CHUNK_BYTES`,
    /// `SAMPLE_MAX_FETCHES`, `SAMPLE_MAX_BYTES`.
    pub fn from_env() -> IngestionResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> IngestionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| IngestionError::Config {
                message: format!("{name} is not set"),
            })
        };
        let optional_usize = |name: &str, default: usize| -> IngestionResult<usize> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| IngestionError::Config {
                    message: format!("{name}='{raw}' is not a non-negative integer"),
                }),
            }
        };

        let defaults = SamplerOptions::default();
        let config = Self {
            intake_bucket: required("INPUT_RAW_BUCKET")?,
            staging_bucket: required("STAGING_ZONE_BUCKET")?,
            sampler: SamplerOptions {
                chunk_bytes: optional_usize("SAMPLE_CHUNK_BYTES", defaults.chunk_bytes)?,
                max_fetches: optional_usize("SAMPLE_MAX_FETCHES", defaults.max_fetches)?,
                max_sample_bytes: optional_usize("SAMPLE_MAX_BYTES", defaults.max_sample_bytes)?,
            },
            alert_at_or_above: default_alert_threshold(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> IngestionResult<()> {
        let fail = |message: String| Err(IngestionError::Config { message });
        if self.intake_bucket.is_empty() || self.staging_bucket.is_empty() {
            return fail("bucket names must not be empty".to_string());
        }
        // The output bucket is a textual substitution; an intake name inside the staging
        // name would be rewritten twice on the way out.
        if self.staging_bucket.contains(&self.intake_bucket) {
            return fail(format!(
                "staging bucket '{}' contains intake bucket name '{}'",
                self.staging_bucket, self.intake_bucket
            ));
        }
        let s = &self.sampler;
        if s.chunk_bytes == 0 || s.max_fetches == 0 || s.max_sample_bytes == 0 {
            return fail("sampler caps must be > 0".to_string());
        }
        Ok(())
    }
}
