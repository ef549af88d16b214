use cdm_map::{delta, filter_tables, load_rules, parse_rules, save_rules};
use cdm_model::{CdmError, MappingRule};

const V1: &str = r#"{
  "metadata": { "dataset": "demo", "date_created": "2021-06-01" },
  "cdm": {
    "person": {
      "male 3025": {
        "person_id": { "source_table": "Demographics.csv", "source_field": "ID" },
        "gender_concept_id": {
          "source_table": "Demographics.csv", "source_field": "Sex",
          "term_mapping": { "M": 8507 }
        }
      }
    },
    "condition_occurrence": {
      "fever 437663": {
        "person_id": { "source_table": "Symptoms.csv", "source_field": "ID" },
        "condition_start_datetime": { "source_table": "Symptoms.csv", "source_field": "date" }
      }
    }
  }
}"#;

#[test]
fn delta_keeps_new_and_changed_rule_sets() {
    let previous = parse_rules(V1).expect("v1");
    let mut current = previous.clone();
    current
        .cdm
        .get_mut("person")
        .and_then(|sets| sets.get_mut("male 3025"))
        .expect("rule set")
        .insert(
            "year_of_birth".to_string(),
            MappingRule::new("Demographics.csv", "Age").with_operation("extract_year"),
        );
    current.cdm.entry("observation".to_string()).or_default().insert(
        "smoker".to_string(),
        [(
            "person_id".to_string(),
            MappingRule::new("Questionnaire.csv", "ID"),
        )]
        .into_iter()
        .collect(),
    );

    let diff = delta(&current, &previous);
    assert_eq!(diff.tables().collect::<Vec<_>>(), vec!["observation", "person"]);
    assert!(diff.cdm["person"].contains_key("male 3025"));
    assert_eq!(diff.metadata.dataset, "demo");

    let nothing = delta(&previous, &previous);
    assert!(nothing.cdm.is_empty());
}

#[test]
fn unknown_operations_fail_validation() {
    let raw = V1.replace(
        r#""source_field": "date" }"#,
        r#""source_field": "date", "operations": ["explode"] }"#,
    );
    assert!(matches!(parse_rules(&raw), Err(CdmError::UnknownOperation(_))));
}

#[test]
fn blank_source_fails_validation() {
    let raw = V1.replace(r#""source_field": "ID" }"#, r#""source_field": "" }"#);
    assert!(matches!(parse_rules(&raw), Err(CdmError::InvalidRules(_))));
}

#[test]
fn rules_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rules.json");
    let doc = parse_rules(V1).expect("parse");
    save_rules(&path, &doc).expect("save");
    let loaded = load_rules(&path).expect("load");
    assert_eq!(loaded, doc);

    let only_person = filter_tables(&loaded, &["PERSON"]);
    assert_eq!(only_person.tables().collect::<Vec<_>>(), vec!["person"]);
}

#[test]
fn malformed_json_reports_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").expect("write");
    assert!(matches!(load_rules(&path), Err(CdmError::Json { .. })));
}
