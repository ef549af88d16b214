use std::path::Path;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use cdm_core::{AnalysisOutcome, RunSummary};
use cdm_model::{RuleDocument, TableDefinition};
use cdm_standards::SchemaVersion;

pub fn print_run_summary(summary: &RunSummary) {
    let log = &summary.run_log;
    println!("Dataset: {}", log.dataset);
    println!("CDM version: {}", log.cdm_version);
    println!("New identifiers: {}", log.new_identifiers);

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Existing"),
        header_cell("Written"),
        header_cell("Chunks"),
        header_cell("Duplicates"),
        header_cell("Orphans"),
        header_cell("Errors"),
    ]);
    apply_summary_table_style(&mut table);
    for index in 1..=6 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    let mut total_written = 0usize;
    let mut total_errors = 0usize;
    for (name, entry) in &log.tables {
        let written = entry.rows_written;
        total_written += written;
        total_errors += entry.error_count();
        table.add_row(vec![
            Cell::new(name)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            dim_cell(entry.existing_rows),
            Cell::new(written),
            dim_cell(entry.chunks),
            count_cell(entry.duplicates_dropped, Color::Yellow),
            count_cell(entry.orphaned_rows, Color::Yellow),
            count_cell(entry.error_count(), Color::Red),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        dim_cell("-"),
        Cell::new(total_written).add_attribute(Attribute::Bold),
        dim_cell("-"),
        dim_cell("-"),
        dim_cell("-"),
        count_cell(total_errors, Color::Red).add_attribute(Attribute::Bold),
    ]);
    println!("{table}");
    println!("Elapsed: {:.2}s", summary.elapsed.as_secs_f64());

    let errors: Vec<String> = log
        .tables
        .iter()
        .flat_map(|(name, entry)| {
            entry.rule_sets.iter().flat_map(move |(rule_set, set_log)| {
                set_log
                    .errors
                    .iter()
                    .map(move |err| format!("{name}/{rule_set}: {err}"))
            })
        })
        .collect();
    if !errors.is_empty() {
        eprintln!("Skipped instances:");
        for error in &errors {
            eprintln!("- {error}");
        }
    }
    if !log.warnings.is_empty() {
        eprintln!("Sink warnings:");
        for warning in &log.warnings {
            eprintln!("- {warning}");
        }
    }
}

pub fn print_tables(schema: &SchemaVersion) {
    println!("CDM version: {}", schema.name());
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Fields"),
        header_cell("Description"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    for definition in schema.tables() {
        let name = if definition.is_identity {
            Cell::new(format!("{} (identity)", definition.name))
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(&definition.name)
        };
        table.add_row(vec![
            name,
            Cell::new(definition.fields.len()),
            Cell::new(definition.description.clone().unwrap_or_default()),
        ]);
    }
    println!("{table}");
}

pub fn print_fields(definition: &TableDefinition) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Field"),
        header_cell("Type"),
        header_cell("Required"),
        header_cell("Key"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Center);
    align_column(&mut table, 3, CellAlignment::Center);
    for field in &definition.fields {
        table.add_row(vec![
            Cell::new(&field.name),
            Cell::new(field.logical_type),
            flag_cell(field.required),
            flag_cell(field.is_primary_key),
        ]);
    }
    println!("{}", definition.name);
    println!("{table}");
}

pub fn print_delta(document: &RuleDocument, out: &Path) {
    if document.cdm.is_empty() {
        println!("No rule sets changed.");
    } else {
        let mut table = Table::new();
        table.set_header(vec![
            header_cell("Table"),
            header_cell("Rule set"),
            header_cell("Fields"),
        ]);
        apply_table_style(&mut table);
        align_column(&mut table, 2, CellAlignment::Right);
        for (name, rule_sets) in &document.cdm {
            for (rule_set, rules) in rule_sets {
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(rule_set),
                    Cell::new(rules.len()),
                ]);
            }
        }
        println!("{table}");
    }
    println!("Delta written to {}", out.display());
}

pub fn print_analyses(outcomes: &[AnalysisOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(result) => {
                let mut table = Table::new();
                table.set_header(vec![header_cell("Value"), header_cell("Count")]);
                apply_table_style(&mut table);
                align_column(&mut table, 1, CellAlignment::Right);
                for (label, count) in &result.counts {
                    table.add_row(vec![Cell::new(label), Cell::new(count)]);
                }
                println!("{}", result.name);
                println!("{table}");
            }
            Err(err) => eprintln!("{}: {err}", outcome.name),
        }
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn flag_cell(flag: bool) -> Cell {
    if flag {
        Cell::new("✓")
            .fg(Color::Green)
            .add_attribute(Attribute::Bold)
    } else {
        dim_cell("-")
    }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
