use std::sync::Arc;
use std::time::Duration;

use casegrid_core::{CaseRow, ColumnDescriptor, ColumnType};
use casegrid_engine::scheduler::ManualClock;
use casegrid_engine::{EngineOptions, FilterView, GridState, GroupId, RuleError, ValidationEngine, Verdict};

fn flag_rule(value: &str, _t: ColumnType) -> Result<Verdict, RuleError> {
    match value.trim() {
        "" | "0" | "1" => Ok(Verdict::valid()),
        other => Ok(Verdict::invalid(format!("'{other}' is not 0 or 1"))),
    }
}

/// serial, isPatient, clinical 0..n
fn clinical_columns(n: usize) -> Vec<ColumnDescriptor> {
    let mut cols = vec![
        ColumnDescriptor::serial(),
        ColumnDescriptor::singleton(ColumnType::IsPatient),
    ];
    cols.extend((0..n).map(|i| ColumnDescriptor::group_member(ColumnType::Clinical, i)));
    cols
}

fn clinical_col(cell_index: usize) -> usize {
    2 + cell_index
}

fn new_engine(columns: Vec<ColumnDescriptor>, clock: &ManualClock) -> ValidationEngine {
    ValidationEngine::new(Arc::new(flag_rule), columns, EngineOptions::default()).with_clock(clock.clone())
}

fn clinical_row(values: &[&str]) -> CaseRow {
    CaseRow::new()
        .with_text("isPatient", "1")
        .with_list("clinicalSymptoms", values.iter().copied())
}

// -------------------------------------------------------------------------
// Structural remap
// -------------------------------------------------------------------------

#[test]
fn insert_columns_shifts_group_error() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(3), &clock);
    let mut grid = GridState::new(vec![clinical_row(&["1", "0", "x"])], clinical_columns(3));

    engine.validate_cell(0, clinical_col(2), "x", true);
    assert_eq!(engine.get_error_message(0, clinical_col(2)), Some("'x' is not 0 or 1"));

    // Host inserts two clinical columns at group position 1
    grid.rows[0].insert_list_items("clinicalSymptoms", 1, 2);
    grid.columns = clinical_columns(5);
    engine.update_column_schema(grid.columns.clone());
    let stats = engine.handle_column_addition(GroupId::new(ColumnType::Clinical), 1, &grid);

    assert_eq!(stats.moved, 1);
    assert_eq!(engine.error_count(), 1);
    assert_eq!(engine.get_error_message(0, clinical_col(4)), Some("'x' is not 0 or 1"));
    assert!(engine.export_errors().contains_key("0_clinicalSymptoms.4"));
}

#[test]
fn delete_column_drops_and_shifts_group_errors() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(3), &clock);
    let mut grid = GridState::new(vec![clinical_row(&["1", "a", "b"])], clinical_columns(3));

    engine.validate_cell(0, clinical_col(1), "a", true);
    engine.validate_cell(0, clinical_col(2), "b", true);

    grid.rows[0].remove_list_items("clinicalSymptoms", &[1]);
    grid.columns = clinical_columns(2);
    engine.update_column_schema(grid.columns.clone());
    engine.handle_column_deletion(GroupId::new(ColumnType::Clinical), &[1], &grid);

    assert_eq!(engine.error_count(), 1);
    assert_eq!(engine.get_error_message(0, clinical_col(1)), Some("'b' is not 0 or 1"));
}

#[test]
fn repeated_remap_is_noop() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(3), &clock);
    let mut grid = GridState::new(vec![clinical_row(&["1", "0", "x"])], clinical_columns(3));
    engine.validate_cell(0, clinical_col(2), "x", true);

    grid.rows[0].insert_list_items("clinicalSymptoms", 0, 1);
    grid.columns = clinical_columns(4);
    engine.update_column_schema(grid.columns.clone());
    engine.handle_column_addition(GroupId::new(ColumnType::Clinical), 0, &grid);
    let once = engine.export_errors();

    engine.handle_column_addition(GroupId::new(ColumnType::Clinical), 0, &grid);
    engine.update_column_schema(grid.columns.clone());
    engine.handle_schema_change(&grid);
    assert_eq!(engine.export_errors(), once);
    assert!(once.contains_key("0_clinicalSymptoms.3"));
}

// -------------------------------------------------------------------------
// Row edits
// -------------------------------------------------------------------------

#[test]
fn delete_row_shifts_following_errors() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(1), &clock);
    for (row, value) in [(1, "r1"), (2, "r2"), (3, "r3")] {
        engine.validate_cell(row, 1, value, true);
    }

    engine.handle_row_deletion(&[2]);

    assert_eq!(engine.error_count(), 2);
    assert_eq!(engine.get_error_message(1, 1), Some("'r1' is not 0 or 1"));
    assert_eq!(engine.get_error_message(2, 1), Some("'r3' is not 0 or 1"));
    assert!(!engine.has_error(3, 1));
}

// -------------------------------------------------------------------------
// Debounce
// -------------------------------------------------------------------------

#[test]
fn corrected_value_before_debounce_leaves_no_error() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(1), &clock);

    engine.validate_cell(0, 1, "7", false);
    assert_eq!(engine.error_count(), 0);
    clock.advance(Duration::from_millis(120));
    assert_eq!(engine.tick(), 0);
    engine.validate_cell(0, 1, "1", false);
    assert_eq!(engine.error_count(), 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(engine.tick(), 1);
    assert_eq!(engine.error_count(), 0);
    assert_eq!(engine.pending_count(), 0);
}

// -------------------------------------------------------------------------
// History
// -------------------------------------------------------------------------

fn patient_grid(values: &[&str]) -> GridState {
    GridState::new(
        values.iter().map(|v| CaseRow::new().with_text("isPatient", *v)).collect(),
        clinical_columns(0),
    )
}

#[test]
fn undo_restores_pre_edit_errors() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(0), &clock);
    engine.validate_cell(0, 1, "bad", true);
    let before = patient_grid(&["bad", "0"]);
    let errors_before = engine.export_errors();

    engine.capture_snapshot("edit row 1", &before);
    let after = patient_grid(&["bad", "worse"]);
    engine.validate_cell(1, 1, "worse", true);
    assert_eq!(engine.error_count(), 2);

    let restored = engine.undo(&after).unwrap();
    assert_eq!(restored, before);
    assert_eq!(engine.export_errors(), errors_before);

    let redone = engine.redo(&restored).unwrap();
    assert_eq!(redone, after);
    assert_eq!(engine.error_count(), 2);
}

#[test]
fn undo_keeps_late_committed_error_on_unchanged_cell() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(0), &clock);

    // Row 0 typed before the snapshot, still inside its debounce window
    engine.validate_cell(0, 1, "late", false);
    let before = patient_grid(&["late", "0"]);
    engine.capture_snapshot("edit row 1", &before);

    let after = patient_grid(&["late", "oops"]);
    engine.validate_cell(1, 1, "oops", true);
    clock.advance(Duration::from_secs(1));
    engine.tick();
    assert_eq!(engine.error_count(), 2);

    engine.undo(&after).unwrap();
    assert_eq!(engine.error_count(), 1);
    assert_eq!(engine.get_error_message(0, 1), Some("'late' is not 0 or 1"));
    assert!(!engine.has_error(1, 1));
}

#[test]
fn undo_restores_filter_and_schema() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(2), &clock);
    let mut before = GridState::new(vec![clinical_row(&["1", "1"]); 3], clinical_columns(2));
    before.filter.view = Some(vec![0, 2]);
    engine.apply_filter(before.filter.to_view());
    engine.capture_snapshot("add column", &before);

    let mut after = before.clone();
    after.columns = clinical_columns(3);
    after.filter.view = None;
    engine.update_column_schema(after.columns.clone());
    engine.clear_filter();

    engine.undo(&after).unwrap();
    assert_eq!(engine.schema().len(), clinical_columns(2).len());
    assert!(engine.projection().is_filtered());
    assert!(!engine.is_error_visible(1));
}

// -------------------------------------------------------------------------
// Filtering
// -------------------------------------------------------------------------

#[test]
fn visible_errors_follow_filter_and_row_edits() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(0), &clock);
    for row in 0..5 {
        engine.validate_cell(row, 1, &format!("v{row}"), true);
    }
    engine.apply_filter(FilterView::from_predicate(5, |r| r % 2 == 0));
    assert_eq!(engine.get_visible_errors().len(), 3);

    engine.handle_row_deletion(&[2]);
    let visible = engine.get_visible_errors();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible["0_isPatient"].message, "'v0' is not 0 or 1");
    assert_eq!(visible["1_isPatient"].message, "'v4' is not 0 or 1");
    // Current row 2 was row 3, which the filter excludes
    assert!(!engine.is_error_visible(2));
    assert!(engine.is_error_visible(3));
}

#[test]
fn deleting_a_row_closes_up_filtered_view() {
    let clock = ManualClock::new();
    let mut engine = new_engine(clinical_columns(0), &clock);
    for row in 0..3 {
        engine.validate_cell(row, 1, &format!("v{row}"), true);
    }
    engine.apply_filter(FilterView::from_predicate(3, |_| true));

    engine.handle_row_deletion(&[0]);
    let visible = engine.get_visible_errors();
    let keys: Vec<&str> = visible.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["0_isPatient", "1_isPatient"]);
    assert_eq!(visible["0_isPatient"].message, "'v1' is not 0 or 1");
    assert!(engine.has_error(0, 1));
    assert!(engine.is_error_visible(0));
    assert!(engine.is_error_visible(1));
    assert!(!engine.is_error_visible(2));
}
