use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::FailureKind;

/// How one record ended, as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Ignored,
    Unresolved,
    Rejected,
    Ingested,
    Failed(FailureKind),
}

/// Execution events emitted by the executor.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { records: usize },
    ThrottleWaited { duration: Duration },
    RecordStarted { bucket: String, key: String },
    RecordFinished {
        bucket: String,
        key: String,
        status: RecordStatus,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Emits execution events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(?elapsed, %metrics, "batch finished");
            }
            other => debug!(event = ?other, "execution event"),
        }
    }
}

/// Real-time metrics for a batch run.
///
/// The executor updates these counters during execution; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,

    records_processed: AtomicU64,
    ingested: AtomicU64,
    rejected: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_records: AtomicUsize,
    max_active_records: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_records: AtomicUsize::new(0),
            max_active_records: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.records_processed.store(0, Ordering::SeqCst);
        self.ingested.store(0, Ordering::SeqCst);
        self.rejected.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_records.store(0, Ordering::SeqCst);
        self.max_active_records.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub fn on_record_start(&self) {
        let now = self.active_records.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_records, now);
    }

    pub fn on_record_end(&self, status: RecordStatus) {
        let _ = self.records_processed.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_records.fetch_sub(1, Ordering::SeqCst);
        let counter = match status {
            RecordStatus::Ingested => &self.ingested,
            RecordStatus::Rejected => &self.rejected,
            RecordStatus::Ignored | RecordStatus::Unresolved => &self.skipped,
            RecordStatus::Failed(_) => &self.failed,
        };
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let _ = self.throttle_wait_ns.fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            records_processed: self.records_processed.load(Ordering::SeqCst),
            ingested: self.ingested.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_records: self.max_active_records.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub records_processed: u64,
    pub ingested: u64,
    pub rejected: u64,
    /// Ignored (foreign bucket) and unresolved records.
    pub skipped: u64,
    pub failed: u64,
    pub throttle_wait: Duration,
    pub max_active_records: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, processed={}, ingested={}, rejected={}, skipped={}, failed={}, max_active={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.records_processed,
            self.ingested,
            self.rejected,
            self.skipped,
            self.failed,
            self.max_active_records,
            self.throttle_wait,
            self.elapsed
        )
    }
}
