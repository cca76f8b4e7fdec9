//! Batch execution of arrival records with configurable parallelism.
//!
//! This module sits "above" [`crate::pipeline`] and provides:
//!
//! - Parallel execution of independent records on a bounded thread pool
//! - Resource limits / throttling (in-flight records)
//! - Real-time metrics + observer hooks for monitoring
//!
//! Records share no mutable state; each one owns its sample and table for the duration of its
//! run.

mod observer;
mod semaphore;

use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::error::{IngestionError, IngestionResult};
use crate::pipeline::{ArrivalEvent, ArrivalRecord, Outcome, Pipeline};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, RecordStatus,
    TracingExecutionObserver,
};

use semaphore::Semaphore;

/// Configuration for the [`BatchExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the executor.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on concurrently processed records.
    ///
    /// This is an additional throttle on top of `num_threads`.
    pub max_in_flight: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            max_in_flight: n.max(1),
        }
    }
}

/// Runs a [`Pipeline`] over many arrival records in parallel.
pub struct BatchExecutor {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl BatchExecutor {
    /// Create a new executor with the given options.
    ///
    /// Fails if `max_in_flight == 0`, `num_threads == Some(0)`, or the pool cannot be built.
    pub fn new(opts: ExecutionOptions) -> IngestionResult<Self> {
        if opts.max_in_flight == 0 {
            return Err(IngestionError::Config {
                message: "max_in_flight must be > 0".to_string(),
            });
        }
        if opts.num_threads == Some(0) {
            return Err(IngestionError::Config {
                message: "num_threads must be > 0 when set".to_string(),
            });
        }

        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| IngestionError::Config {
                message: format!("failed to build thread pool: {e}"),
            })?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process the records of every event; results follow record order.
    pub fn run_events(&self, pipeline: &Pipeline, events: &[ArrivalEvent]) -> Vec<IngestionResult<Outcome>> {
        let records: Vec<ArrivalRecord> = events.iter().flat_map(|e| e.records.iter().cloned()).collect();
        self.run(pipeline, &records)
    }

    /// Process `records` in parallel; results follow record order.
    pub fn run(&self, pipeline: &Pipeline, records: &[ArrivalRecord]) -> Vec<IngestionResult<Outcome>> {
        self.pool.install(|| self.run_impl(pipeline, records))
    }

    fn run_impl(&self, pipeline: &Pipeline, records: &[ArrivalRecord]) -> Vec<IngestionResult<Outcome>> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            records: records.len(),
        });

        let sem = Semaphore::new(self.opts.max_in_flight);
        let results: Vec<IngestionResult<Outcome>> = records
            .par_iter()
            .map(|record| {
                let permit = sem.acquire();
                if !permit.waited.is_zero() {
                    self.metrics.on_throttle_wait(permit.waited);
                    self.emit(ExecutionEvent::ThrottleWaited {
                        duration: permit.waited,
                    });
                }

                self.metrics.on_record_start();
                self.emit(ExecutionEvent::RecordStarted {
                    bucket: record.bucket.clone(),
                    key: record.key.clone(),
                });

                let result = pipeline.process(&record.bucket, &record.key);
                let status = status_of(&result);

                self.emit(ExecutionEvent::RecordFinished {
                    bucket: record.bucket.clone(),
                    key: record.key.clone(),
                    status,
                });
                self.metrics.on_record_end(status);
                drop(permit);
                result
            })
            .collect();

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });

        results
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

fn status_of(result: &IngestionResult<Outcome>) -> RecordStatus {
    match result {
        Ok(Outcome::Ignored { .. }) => RecordStatus::Ignored,
        Ok(Outcome::Unresolved { .. }) => RecordStatus::Unresolved,
        Ok(Outcome::Rejected { .. }) => RecordStatus::Rejected,
        Ok(Outcome::Ingested(_)) => RecordStatus::Ingested,
        Err(e) => RecordStatus::Failed(e.kind()),
    }
}
