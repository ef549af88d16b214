//! Shared fixtures: a three-table schema, source batches and a rule document.

#![allow(dead_code)]

use std::collections::BTreeMap;

use cdm_ingest::{MemorySource, SourceCollection};
use cdm_model::{
    Column, FieldDefinition, LogicalType, MappingRule, RowBatch, RuleDocument, RuleSet,
    TableDefinition, TermMapping, Value,
};
use cdm_standards::SchemaVersion;

pub fn schema() -> SchemaVersion {
    use LogicalType::{Date, Float, Integer, Timestamp};
    SchemaVersion::new(
        "5.3.1",
        vec![
            TableDefinition::new(
                "person",
                vec![
                    FieldDefinition::new("person_id", Integer).primary_key(),
                    FieldDefinition::new("gender_concept_id", Integer).required(),
                    FieldDefinition::new("year_of_birth", Integer).required(),
                    FieldDefinition::new("birth_datetime", Timestamp),
                    FieldDefinition::new("person_source_value", LogicalType::Text {
                        max_len: Some(50),
                    }),
                ],
            )
            .identity(),
            TableDefinition::new(
                "condition_occurrence",
                vec![
                    FieldDefinition::new("condition_occurrence_id", Integer).primary_key(),
                    FieldDefinition::new("person_id", Integer).required(),
                    FieldDefinition::new("condition_concept_id", Integer).required(),
                    FieldDefinition::new("condition_start_date", Date).required(),
                    FieldDefinition::new("condition_start_datetime", Timestamp),
                ],
            ),
            TableDefinition::new(
                "observation",
                vec![
                    FieldDefinition::new("observation_id", Integer).primary_key(),
                    FieldDefinition::new("person_id", Integer).required(),
                    FieldDefinition::new("observation_concept_id", Integer).required(),
                    FieldDefinition::new("value_as_number", Float),
                ],
            ),
        ],
    )
}

fn text_column(name: &str, values: &[&str]) -> Column {
    Column::new(name, values.iter().map(|v| Value::text(*v)).collect())
}

pub fn demographics(ids: &[&str]) -> RowBatch {
    let sexes: Vec<&str> = ids
        .iter()
        .enumerate()
        .map(|(i, _)| if i % 2 == 0 { "M" } else { "F" })
        .collect();
    let births: Vec<String> = ids
        .iter()
        .enumerate()
        .map(|(i, _)| format!("19{:02}-03-04 05:06:07", 50 + i))
        .collect();
    let births: Vec<&str> = births.iter().map(String::as_str).collect();
    RowBatch::new(vec![
        text_column("ID", ids),
        text_column("Sex", &sexes),
        text_column("BirthDate", &births),
    ])
    .expect("demographics batch")
}

/// `(subject, code, date)` rows.
pub fn diagnoses(rows: &[(&str, &str, &str)]) -> RowBatch {
    let ids: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let codes: Vec<&str> = rows.iter().map(|r| r.1).collect();
    let dates: Vec<&str> = rows.iter().map(|r| r.2).collect();
    RowBatch::new(vec![
        text_column("ID", &ids),
        text_column("Code", &codes),
        text_column("Date", &dates),
    ])
    .expect("diagnoses batch")
}

/// `(subject, concept, value)` rows.
pub fn labs(rows: &[(&str, &str, &str)]) -> RowBatch {
    let ids: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let concepts: Vec<&str> = rows.iter().map(|r| r.1).collect();
    let values: Vec<&str> = rows.iter().map(|r| r.2).collect();
    RowBatch::new(vec![
        text_column("ID", &ids),
        text_column("Concept", &concepts),
        text_column("Value", &values),
    ])
    .expect("labs batch")
}

pub fn default_diagnoses() -> RowBatch {
    diagnoses(&[
        ("P1", "201826", "2020-01-01 08:00:00"),
        ("P2", "320128", "2020-02-01 09:30:00"),
        ("P1", "201826", "2020-01-01 08:00:00"),
        ("P9", "201826", "2020-03-01 10:00:00"),
        ("P3", "437663", "2021-06-15 12:00:00"),
    ])
}

pub fn default_labs() -> RowBatch {
    labs(&[("P1", "3004249", "120.5"), ("P2", "3012888", "80")])
}

pub fn sources(people: RowBatch, diagnoses: RowBatch, labs: RowBatch) -> SourceCollection {
    SourceCollection::new()
        .with_source(MemorySource::new("Demographics.csv", people))
        .and_then(|c| c.with_source(MemorySource::new("Diagnoses.csv", diagnoses)))
        .and_then(|c| c.with_source(MemorySource::new("Labs.csv", labs)))
        .expect("sources")
}

pub fn default_sources() -> SourceCollection {
    sources(
        demographics(&["P1", "P2", "P3", "P4", "P5"]),
        default_diagnoses(),
        default_labs(),
    )
}

fn rule_set(rules: Vec<(&str, MappingRule)>) -> RuleSet {
    rules
        .into_iter()
        .map(|(field, rule)| (field.to_string(), rule))
        .collect()
}

pub fn rules() -> RuleDocument {
    let gender = TermMapping::Map(BTreeMap::from([
        ("M".to_string(), Value::Int(8507)),
        ("F".to_string(), Value::Int(8532)),
    ]));
    let person = rule_set(vec![
        ("person_id", MappingRule::new("Demographics.csv", "ID")),
        (
            "gender_concept_id",
            MappingRule::new("Demographics.csv", "Sex").with_term_mapping(gender),
        ),
        ("birth_datetime", MappingRule::new("Demographics.csv", "BirthDate")),
        ("person_source_value", MappingRule::new("Demographics.csv", "ID")),
    ]);
    let condition = rule_set(vec![
        ("person_id", MappingRule::new("Diagnoses.csv", "ID")),
        ("condition_concept_id", MappingRule::new("Diagnoses.csv", "Code")),
        ("condition_start_datetime", MappingRule::new("Diagnoses.csv", "Date")),
    ]);
    let observation = rule_set(vec![
        ("person_id", MappingRule::new("Labs.csv", "ID")),
        ("observation_concept_id", MappingRule::new("Labs.csv", "Concept")),
        ("value_as_number", MappingRule::new("Labs.csv", "Value")),
    ]);

    let mut document = RuleDocument::default();
    document.metadata.dataset = "demo".to_string();
    document.cdm.insert(
        "person".to_string(),
        BTreeMap::from([("demographics".to_string(), person)]),
    );
    document.cdm.insert(
        "condition_occurrence".to_string(),
        BTreeMap::from([("diagnoses".to_string(), condition)]),
    );
    document.cdm.insert(
        "observation".to_string(),
        BTreeMap::from([("labs".to_string(), observation)]),
    );
    document
}

pub fn ints(batch: &RowBatch, column: &str) -> Vec<i64> {
    batch
        .column(column)
        .expect("column")
        .values
        .iter()
        .map(|v| v.as_i64().expect("integer"))
        .collect()
}
