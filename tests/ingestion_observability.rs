use std::sync::{Arc, Mutex};

use intake_validation::config::PipelineConfig;
use intake_validation::ingestion::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
};
use intake_validation::pipeline::Pipeline;
use intake_validation::store::{MemoryObjectStore, MemoryRuleStore, ObjectStore, StoreError};
use serde_json::json;

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<IngestionStats>>,
    rejections: Mutex<Vec<String>>,
    failures: Mutex<Vec<IngestionSeverity>>,
    alerts: Mutex<Vec<IngestionSeverity>>,
}

impl IngestionObserver for RecordingObserver {
    fn on_success(&self, _ctx: &IngestionContext, stats: &IngestionStats) {
        self.successes.lock().unwrap().push(stats.clone());
    }

    fn on_rejected(&self, _ctx: &IngestionContext, reason: &str) {
        self.rejections.lock().unwrap().push(reason.to_string());
    }

    fn on_failure(
        &self,
        _ctx: &IngestionContext,
        severity: IngestionSeverity,
        _error: &intake_validation::IngestionError,
    ) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(
        &self,
        _ctx: &IngestionContext,
        severity: IngestionSeverity,
        _error: &intake_validation::IngestionError,
    ) {
        self.alerts.lock().unwrap().push(severity);
    }
}

/// Object store whose every call fails, as an unreachable backend would.
struct UnavailableStore;

impl ObjectStore for UnavailableStore {
    fn get_range(&self, _bucket: &str, _key: &str, _start: u64, _end: u64) -> Result<Vec<u8>, StoreError> {
        Err(unavailable())
    }

    fn get_full(&self, _bucket: &str, _key: &str) -> Result<Vec<u8>, StoreError> {
        Err(unavailable())
    }

    fn put(&self, _bucket: &str, _key: &str, _bytes: Vec<u8>) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

fn unavailable() -> StoreError {
    StoreError::Backend {
        operation: "request".to_string(),
        message: "connection reset".to_string(),
    }
}

fn rules() -> Arc<MemoryRuleStore> {
    let mut rules = MemoryRuleStore::new();
    rules.insert(
        "in",
        json!({"files": [{"file_name_regex": "ids", "district_key": "ids", "output_base_file_name": "ids"}]}),
    );
    rules.insert(
        "ids",
        json!({"validation_rules": {
            "file_extension": "csv",
            "columns_details": [{"header": "id", "data_type": "int"}]
        }}),
    );
    Arc::new(rules)
}

fn pipeline(objects: Arc<dyn ObjectStore>, observer: Arc<RecordingObserver>) -> Pipeline {
    Pipeline::new(PipelineConfig::new("raw", "stage"), objects, rules())
        .unwrap()
        .with_observer(observer)
}

#[test]
fn observer_receives_failure_and_alert_on_critical_upstream_error() {
    let obs = Arc::new(RecordingObserver::default());
    let p = pipeline(Arc::new(UnavailableStore), obs.clone());

    // Unreachable store -> Upstream error -> Critical
    let _ = p.process("raw", "in/ids.csv").unwrap_err();

    assert_eq!(obs.failures.lock().unwrap().clone(), vec![IngestionSeverity::Critical]);
    assert_eq!(obs.alerts.lock().unwrap().clone(), vec![IngestionSeverity::Critical]);
}

#[test]
fn observer_receives_failure_without_alert_for_non_critical_error() {
    let obs = Arc::new(RecordingObserver::default());
    let objects = Arc::new(MemoryObjectStore::new());
    objects.insert("raw", "in/ids.csv", "id\nseven\n");
    let p = pipeline(objects, obs.clone());

    // Parse failure -> Error severity (not Critical) -> should not alert
    let _ = p.process("raw", "in/ids.csv").unwrap_err();

    assert_eq!(obs.failures.lock().unwrap().clone(), vec![IngestionSeverity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[test]
fn lowered_threshold_alerts_on_errors() {
    let obs = Arc::new(RecordingObserver::default());
    let objects = Arc::new(MemoryObjectStore::new());
    objects.insert("raw", "in/ids.csv", "i\n");
    let mut config = PipelineConfig::new("raw", "stage");
    config.alert_at_or_above = IngestionSeverity::Error;
    let p = Pipeline::new(config, objects, rules()).unwrap().with_observer(obs.clone());

    let _ = p.process("raw", "in/ids.csv").unwrap_err();

    assert_eq!(obs.alerts.lock().unwrap().clone(), vec![IngestionSeverity::Error]);
}

#[test]
fn rejection_and_success_are_reported_to_every_observer() {
    let first = Arc::new(RecordingObserver::default());
    let second = Arc::new(RecordingObserver::default());
    let observers: Vec<Arc<dyn IngestionObserver>> = vec![
        first.clone() as Arc<dyn IngestionObserver>,
        second.clone() as Arc<dyn IngestionObserver>,
    ];
    let composite = Arc::new(CompositeObserver::new(observers));

    let objects = Arc::new(MemoryObjectStore::new());
    objects.insert("raw", "in/ids.csv", "id\n1\n2\n");
    objects.insert("raw", "in/ids.json", "[]");
    let p = Pipeline::new(PipelineConfig::new("raw", "stage"), objects, rules())
        .unwrap()
        .with_observer(composite);

    p.process("raw", "in/ids.csv").unwrap();
    p.process("raw", "in/ids.json").unwrap();

    for obs in [&first, &second] {
        let successes = obs.successes.lock().unwrap().clone();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].rows, 2);
        assert_eq!(successes[0].output_key, "in/ids.parquet");

        let rejections = obs.rejections.lock().unwrap().clone();
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].contains("ids.json"), "{}", rejections[0]);
        assert!(obs.failures.lock().unwrap().is_empty());
    }
}
