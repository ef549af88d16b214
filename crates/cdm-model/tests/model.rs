//! Tests for cdm-model types.

use std::io::Write;

use cdm_model::{
    CdmError, Column, FormatPolicy, MappingRule, RowBatch, RuleDocument, RunConfig, RunLog,
    TermMapping, Value,
};
use proptest::prelude::*;

const RULES: &str = r#"{
  "metadata": { "dataset": "covid_demo", "date_created": "2021-06-01T10:00:00" },
  "cdm": {
    "person": {
      "male 3025": {
        "person_id": { "source_table": "Demographics.csv", "source_field": "ID" },
        "gender_concept_id": {
          "source_table": "Demographics.csv",
          "source_field": "Sex",
          "term_mapping": { "Male": 8507 }
        },
        "birth_datetime": {
          "source_table": "Demographics.csv",
          "source_field": "Age",
          "operations": ["get_datetime"]
        }
      }
    },
    "observation": {
      "smoker 1001": {
        "person_id": { "source_table": "Questionnaire.csv", "source_field": "ID" },
        "observation_concept_id": {
          "source_table": "Questionnaire.csv",
          "source_field": "Smoker",
          "term_mapping": 4041306
        }
      }
    }
  }
}"#;

#[test]
fn rule_document_parses_maps_and_constants() {
    let doc: RuleDocument = serde_json::from_str(RULES).expect("parse rules");
    assert_eq!(doc.metadata.dataset, "covid_demo");
    assert_eq!(doc.tables().collect::<Vec<_>>(), vec!["observation", "person"]);
    assert_eq!(doc.rule_count(), 5);

    let person = &doc.cdm["person"]["male 3025"];
    match person["gender_concept_id"].term_mapping.as_ref() {
        Some(TermMapping::Map(map)) => assert_eq!(map.get("Male"), Some(&Value::Int(8507))),
        other => panic!("expected value map, got {other:?}"),
    }
    assert_eq!(person["birth_datetime"].operations, vec!["get_datetime"]);

    let obs = &doc.cdm["observation"]["smoker 1001"];
    assert_eq!(
        obs["observation_concept_id"].term_mapping,
        Some(TermMapping::Constant(Value::Int(4041306)))
    );
    assert_eq!(
        doc.source_tables().into_iter().collect::<Vec<_>>(),
        vec!["Demographics.csv", "Questionnaire.csv"]
    );
}

#[test]
fn rule_document_serializes_back() {
    let doc: RuleDocument = serde_json::from_str(RULES).expect("parse rules");
    let json = serde_json::to_string(&doc).expect("serialize");
    let round: RuleDocument = serde_json::from_str(&json).expect("reparse");
    assert_eq!(round, doc);
}

#[test]
fn array_term_mapping_is_rejected() {
    let raw = r#"{"source_table": "a", "source_field": "b", "term_mapping": [1, 2]}"#;
    assert!(serde_json::from_str::<MappingRule>(raw).is_err());
}

#[test]
fn run_config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "format_policy = \"off\"\nresume = true\nstart_index = 100").expect("write");
    let config = RunConfig::from_toml_file(file.path()).expect("load config");
    assert_eq!(config.format_policy, FormatPolicy::Off);
    assert!(config.resume);
    assert_eq!(config.start_index, 100);
}

#[test]
fn run_config_missing_file_reports_path() {
    let err = RunConfig::from_toml_file(std::path::Path::new("/nonexistent/run.toml"))
        .expect_err("missing file");
    assert!(matches!(err, CdmError::Io { .. }));
}

#[test]
fn run_log_serializes() {
    let mut log = RunLog::new("demo", "5.3.1");
    log.record_written("person", 3, "person.tsv".to_string());
    log.finish();
    let json = log.to_json().expect("serialize");
    let round: RunLog = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(round, log);
}

proptest! {
    #[test]
    fn concat_preserves_total_height(sizes in proptest::collection::vec(0usize..20, 1..6)) {
        let batches: Vec<RowBatch> = sizes
            .iter()
            .map(|n| {
                let values = (0..*n as i64).map(Value::Int).collect();
                RowBatch::new(vec![Column::new("x", values)]).expect("batch")
            })
            .collect();
        let stacked = RowBatch::concat(batches).expect("concat");
        prop_assert_eq!(stacked.height(), sizes.iter().sum::<usize>());
    }

    #[test]
    fn filter_keeps_exactly_marked_rows(keep in proptest::collection::vec(any::<bool>(), 0..40)) {
        let values = (0..keep.len() as i64).map(Value::Int).collect();
        let batch = RowBatch::new(vec![Column::new("x", values)]).expect("batch");
        let kept = batch.filter(&keep).expect("filter");
        prop_assert_eq!(kept.height(), keep.iter().filter(|k| **k).count());
        prop_assert_eq!(kept.column("x").expect("x").len(), kept.height());
    }
}
