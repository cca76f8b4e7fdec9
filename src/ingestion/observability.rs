use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{FailureKind, IngestionError};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (a file was rejected by its rules).
    Warning,
    /// Error-level event (the file could not be ingested).
    Error,
    /// Critical error (an external collaborator or the deployment is broken).
    Critical,
}

impl IngestionSeverity {
    /// Severity of a hard failure.
    pub fn for_error(error: &IngestionError) -> Self {
        match error.kind() {
            FailureKind::ParseFailure | FailureKind::EmptyFile | FailureKind::SampleOverflow => {
                IngestionSeverity::Error
            }
            FailureKind::UpstreamUnavailable | FailureKind::Misconfiguration => {
                IngestionSeverity::Critical
            }
        }
    }
}

/// Context about one file being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionContext {
    pub bucket: String,
    pub key: String,
}

/// Stats reported on successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    /// Number of ingested rows.
    pub rows: usize,
    /// Number of output columns, derived columns included.
    pub columns: usize,
    /// Where the artifact was written.
    pub output_bucket: String,
    pub output_key: String,
}

/// Observer interface for ingestion outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when an artifact was written.
    fn on_success(&self, _ctx: &IngestionContext, _stats: &IngestionStats) {}

    /// Called when a file fails structural validation (no artifact is written).
    fn on_rejected(&self, _ctx: &IngestionContext, _reason: &str) {}

    /// Called when processing fails with an error.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: &IngestionStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_rejected(&self, ctx: &IngestionContext, reason: &str) {
        for o in &self.observers {
            o.on_rejected(ctx, reason);
        }
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits ingestion events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: &IngestionStats) {
        info!(
            bucket = %ctx.bucket,
            key = %ctx.key,
            rows = stats.rows,
            columns = stats.columns,
            output = %format!("{}/{}", stats.output_bucket, stats.output_key),
            "ingested"
        );
    }

    fn on_rejected(&self, ctx: &IngestionContext, reason: &str) {
        warn!(bucket = %ctx.bucket, key = %ctx.key, reason, "rejected");
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(bucket = %ctx.bucket, key = %ctx.key, ?severity, %error, "ingestion failed");
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(bucket = %ctx.bucket, key = %ctx.key, ?severity, %error, alert = true, "ingestion failed");
    }
}
