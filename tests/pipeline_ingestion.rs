use std::sync::Arc;

use chrono::NaiveDate;
use intake_validation::config::{PipelineConfig, SamplerOptions};
use intake_validation::error::FailureKind;
use intake_validation::ingestion::{RecordDelimiters, StructuralFailure};
use intake_validation::ingestion::parquet::{read_parquet_bytes, read_parquet_from_path};
use intake_validation::ingestion::sampler::Sampler;
use intake_validation::pipeline::{ArrivalEvent, Outcome, Pipeline};
use intake_validation::store::{LocalObjectStore, MemoryObjectStore, MemoryRuleStore, ObjectStore};
use intake_validation::types::{DataType, Value};
use intake_validation::IngestionError;
use serde_json::json;

const RAW: &str = "acme-input-raw";
const STAGING: &str = "acme-staging-zone";

fn rule_store() -> MemoryRuleStore {
    let mut rules = MemoryRuleStore::new();
    rules.insert(
        "district_a",
        json!({
            "document_key": "district_a",
            "files": [
                {"file_name_regex": r"people", "district_key": "district_a#people", "output_base_file_name": "people"},
                {"file_name_regex": r"sales_\d{8}", "district_key": "district_a#sales", "output_base_file_name": "sales"}
            ]
        }),
    );
    rules.insert(
        "district_a#people",
        json!({
            "document_key": "district_a#people",
            "validation_rules": {
                "file_extension": "csv",
                "delimiter": ",",
                "columns_count": 3,
                "columns_details": [
                    {"header": "id", "data_type": "int"},
                    {"header": "name", "data_type": "string"},
                    {"header": "date", "data_type": "date", "date_format": "%Y-%m-%d"}
                ]
            }
        }),
    );
    rules.insert(
        "district_a#sales",
        json!({
            "validation_rules": {
                "file_extension": ["csv", "txt"],
                "encoding": "windows-1252",
                "delimiter": ";",
                "columns_details": [
                    {"header": "store", "data_type": "string"},
                    {"header": "amount", "data_type": "float"}
                ],
                "date_details": {
                    "strategy": "file_name",
                    "pattern": r"sales_(\d{8})",
                    "format": "%Y%m%d",
                    "column": "sales_date"
                }
            }
        }),
    );
    rules
}

struct Fixture {
    objects: Arc<MemoryObjectStore>,
    rules: Arc<MemoryRuleStore>,
    pipeline: Pipeline,
}

fn fixture() -> Fixture {
    let objects = Arc::new(MemoryObjectStore::new());
    let rules = Arc::new(rule_store());
    let pipeline = Pipeline::new(PipelineConfig::new(RAW, STAGING), objects.clone(), rules.clone()).unwrap();
    Fixture {
        objects,
        rules,
        pipeline,
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[test]
fn matching_file_is_published_as_typed_parquet() {
    let fx = fixture();
    fx.objects
        .insert(RAW, "district_a/people.csv", "id,name,date\n1,Alice,2024-01-05\n2,Bob,\n");

    let outcome = fx.pipeline.process(RAW, "district_a/people.csv").unwrap();
    let stats = match outcome {
        Outcome::Ingested(stats) => stats,
        other => panic!("expected ingestion, got {other:?}"),
    };
    assert_eq!(stats.rows, 2);
    assert_eq!(stats.columns, 3);
    assert_eq!(stats.output_bucket, STAGING);
    assert_eq!(stats.output_key, "district_a/people.parquet");

    let bytes = fx.objects.object(STAGING, "district_a/people.parquet").unwrap();
    let table = read_parquet_bytes(&bytes).unwrap();
    assert_eq!(table.schema.field_names().collect::<Vec<_>>(), ["id", "name", "date"]);
    assert_eq!(table.schema.fields[2].data_type, DataType::Date);
    assert_eq!(
        table.rows,
        vec![
            vec![Value::Int64(1), Value::Utf8("Alice".to_string()), Value::Date(d(2024, 1, 5))],
            vec![Value::Int64(2), Value::Utf8("Bob".to_string()), Value::Null],
        ]
    );
}

#[test]
fn header_with_missing_column_is_rejected_without_output() {
    let fx = fixture();
    fx.objects.insert(RAW, "district_a/people.csv", "id,name\n1,Alice\n");

    let outcome = fx.pipeline.process(RAW, "district_a/people.csv").unwrap();
    assert_eq!(
        outcome,
        Outcome::Rejected {
            key: "district_a/people.csv".to_string(),
            reason: StructuralFailure::ColumnCount { expected: 3, found: 2 },
        }
    );
    assert_eq!(fx.objects.calls().full_reads(), 0);
    assert_eq!(fx.objects.calls().writes(), 0);
}

#[test]
fn tiny_file_is_an_empty_file_error() {
    let fx = fixture();
    fx.objects.insert(RAW, "district_a/people.csv", "i\n");

    let err = fx.pipeline.process(RAW, "district_a/people.csv").unwrap_err();
    assert!(matches!(err, IngestionError::EmptyFile { .. }), "{err}");
    assert_eq!(err.kind(), FailureKind::EmptyFile);
    assert_eq!(fx.objects.calls().writes(), 0);
}

#[test]
fn bad_date_fails_the_whole_file() {
    let fx = fixture();
    fx.objects.insert(
        RAW,
        "district_a/people.csv",
        "id,name,date\n1,Alice,2024-01-05\n2,Bob,not-a-date\n",
    );

    let err = fx.pipeline.process(RAW, "district_a/people.csv").unwrap_err();
    assert_eq!(err.kind(), FailureKind::ParseFailure);
    assert!(err.to_string().contains("row 3 column 'date'"), "{err}");
    assert_eq!(fx.objects.calls().writes(), 0);
}

#[test]
fn foreign_bucket_is_ignored_without_any_call() {
    let fx = fixture();
    fx.objects.insert("someone-else", "district_a/people.csv", "id,name,date\n1,Alice,2024-01-05\n");

    let outcome = fx.pipeline.process("someone-else", "district_a/people.csv").unwrap();
    assert_eq!(
        outcome,
        Outcome::Ignored {
            bucket: "someone-else".to_string()
        }
    );
    assert_eq!(fx.objects.calls().total(), 0);
    assert_eq!(fx.rules.reads(), 0);
}

#[test]
fn unrouted_file_produces_nothing() {
    let fx = fixture();
    fx.objects.insert(RAW, "district_a/inventory.csv", "sku,qty\nA,1\n");

    let outcome = fx.pipeline.process(RAW, "district_a/inventory.csv").unwrap();
    assert!(matches!(outcome, Outcome::Unresolved { ref file_name, .. } if file_name == "inventory.csv"));
    assert_eq!(fx.objects.calls().total(), 0);
}

#[test]
fn dated_output_name_and_declared_encoding() {
    let fx = fixture();
    let (content, _, _) = encoding_rs::WINDOWS_1252.encode("Store;Amount\nCafé Crème;12.5\nPâtisserie à l'Opéra;3\nBrûlerie Française;4\n");
    fx.objects.insert(RAW, "district_a/sales_20240105.csv", content.into_owned());

    let outcome = fx.pipeline.process(RAW, "district_a/sales_20240105.csv").unwrap();
    let stats = match outcome {
        Outcome::Ingested(stats) => stats,
        other => panic!("expected ingestion, got {other:?}"),
    };
    assert_eq!(stats.output_key, "district_a/sales_20240105.parquet");
    assert_eq!(stats.columns, 3);

    let table = read_parquet_bytes(&fx.objects.object(STAGING, &stats.output_key).unwrap()).unwrap();
    assert_eq!(table.rows[0][0], Value::Utf8("Café Crème".to_string()));
    assert_eq!(table.rows[1][2], Value::Date(d(2024, 1, 5)));
}

#[test]
fn registered_record_delimiter_is_used_by_the_full_parse() {
    let objects = Arc::new(MemoryObjectStore::new());
    objects.insert(RAW, "district_a/people.csv", "id,name,date~1,Al,2024-01-05~2,Bo,~");
    let mut delimiters = RecordDelimiters::empty();
    delimiters.register("csv", None, "~").unwrap();
    let pipeline = Pipeline::new(PipelineConfig::new(RAW, STAGING), objects.clone(), Arc::new(rule_store()))
        .unwrap()
        .with_record_delimiters(delimiters);

    let outcome = pipeline.process(RAW, "district_a/people.csv").unwrap();
    assert!(matches!(outcome, Outcome::Ingested(ref s) if s.rows == 2), "{outcome:?}");

    let table = read_parquet_bytes(&objects.object(STAGING, "district_a/people.parquet").unwrap()).unwrap();
    assert_eq!(
        table.rows,
        vec![
            vec![Value::Int64(1), Value::Utf8("Al".to_string()), Value::Date(d(2024, 1, 5))],
            vec![Value::Int64(2), Value::Utf8("Bo".to_string()), Value::Null],
        ]
    );
}

#[test]
fn republishing_the_same_input_is_byte_identical() {
    let fx = fixture();
    fx.objects
        .insert(RAW, "district_a/people.csv", "id,name,date\n1,Alice,2024-01-05\n2,Bob,2024-02-01\n");

    fx.pipeline.process(RAW, "district_a/people.csv").unwrap();
    let first = fx.objects.object(STAGING, "district_a/people.parquet").unwrap();
    fx.pipeline.process(RAW, "district_a/people.csv").unwrap();
    let second = fx.objects.object(STAGING, "district_a/people.parquet").unwrap();

    assert_eq!(first, second);
    assert_eq!(fx.objects.calls().writes(), 2);
}

#[test]
fn event_records_are_processed_independently() {
    let fx = fixture();
    fx.objects.insert(RAW, "district_a/people.csv", "id,name,date\n1,Alice,2024-01-05\n");
    fx.objects.insert(RAW, "district_a/people_v2.txt", "id,name,date\n1,Alice,2024-01-05\n");

    let event = ArrivalEvent::from_json(&format!(
        r#"{{"Records": [
            {{"s3": {{"bucket": {{"name": "{RAW}"}}, "object": {{"key": "district_a/people_v2.txt"}}}}}},
            {{"s3": {{"bucket": {{"name": "{RAW}"}}, "object": {{"key": "district_a/people.csv"}}}}}}
        ]}}"#
    ))
    .unwrap();

    let results = fx.pipeline.handle_event(&event);
    assert!(matches!(
        results[0],
        Ok(Outcome::Rejected {
            reason: StructuralFailure::Extension { .. },
            ..
        })
    ));
    assert!(matches!(results[1], Ok(Outcome::Ingested(_))));
}

#[test]
fn sampler_terminates_within_caps_for_records_under_25000_bytes() {
    let options = SamplerOptions::default();
    for header_len in [8, 2_499, 2_500, 2_501, 9_999, 17_000, 24_000] {
        let header = "h".repeat(header_len);
        let mut content = format!("{header}\nrow\n");
        content.push_str(&"tail\n".repeat(500));

        let store = MemoryObjectStore::new();
        store.insert(RAW, "k.csv", content);
        let mut sampler = Sampler::new(&store, RAW, "k.csv", options);
        let extract = sampler.extract(encoding_rs::UTF_8, "\n").unwrap();

        assert_eq!(extract.header.len(), header_len);
        assert_eq!(extract.first_row.as_deref(), Some("row"));
        assert!(sampler.fetches() <= 10, "{header_len}: {} fetches", sampler.fetches());
        assert!(sampler.bytes().len() <= 1_000_000);
        assert_eq!(store.calls().range_reads(), sampler.fetches());
    }
}

#[test]
fn sampler_overflow_is_reported_once_caps_are_spent() {
    let store = MemoryObjectStore::new();
    store.insert(RAW, "k.csv", "x".repeat(40_000));

    let mut sampler = Sampler::new(&store, RAW, "k.csv", SamplerOptions::default());
    let err = sampler.extract(encoding_rs::UTF_8, "\n").unwrap_err();

    assert!(matches!(
        err,
        IngestionError::SampleOverflow {
            bytes: 25_000,
            fetches: 10,
            ..
        }
    ));
    assert_eq!(err.kind(), FailureKind::SampleOverflow);
}

#[test]
fn local_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(LocalObjectStore::new(dir.path()));
    objects
        .put(RAW, "district_a/people.csv", b"ID, Name ,DATE\r\n7,Zoe,2023-12-31\r\n".to_vec())
        .unwrap();

    let pipeline = Pipeline::new(PipelineConfig::new(RAW, STAGING), objects.clone(), Arc::new(rule_store())).unwrap();
    let outcome = pipeline.process(RAW, "district_a/people.csv").unwrap();
    assert!(matches!(outcome, Outcome::Ingested(ref s) if s.rows == 1), "{outcome:?}");

    let written = dir.path().join(STAGING).join("district_a").join("people.parquet");
    let table = read_parquet_from_path(written).unwrap();
    assert_eq!(table.rows[0][2], Value::Date(d(2023, 12, 31)));
}
