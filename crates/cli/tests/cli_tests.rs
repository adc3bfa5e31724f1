// End-to-end tests for the casegrid binary.
//
// stdout of every JSON-producing command must be exactly one JSON value.
//
// Run with: cargo test -p casegrid-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

fn casegrid(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_casegrid"));
    // Never touch the user's real settings file
    cmd.arg("--config").arg(dir.join("settings.json"));
    cmd.env_remove("CASEGRID_CONFIG");
    cmd
}

/// Assert stdout is a single, parseable JSON value with no extra lines.
fn assert_single_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "exit code: {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");
    serde_json::from_str(trimmed)
        .unwrap_or_else(|e| panic!("stdout must be valid JSON.\nParse error: {}\nstdout:\n{}", e, trimmed))
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn columns(clinical: usize) -> Value {
    let mut cols = vec![
        json!({"type": "serial", "dataKey": "serial", "isEditable": false}),
        json!({"type": "isPatient", "dataKey": "isPatient"}),
    ];
    cols.extend((0..clinical).map(|i| json!({"type": "clinical", "dataKey": "clinicalSymptoms", "cellIndex": i})));
    Value::Array(cols)
}

fn sample_grid() -> Value {
    json!({
        "rows": [
            {"isPatient": "1", "clinicalSymptoms": ["1", "x"]},
            {"isPatient": "7", "clinicalSymptoms": ["0", ""]},
            {"isPatient": "0", "clinicalSymptoms": ["1", "1"]}
        ],
        "columns": columns(2)
    })
}

fn record(message: &str) -> Value {
    json!({"message": message, "timestamp": 1700000000000i64})
}

// ===========================================================================
// validate
// ===========================================================================

#[test]
fn long_version_names_commit_and_target() {
    let output = Command::new(env!("CARGO_BIN_EXE_casegrid")).arg("--version").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next().unwrap_or_default();
    assert!(first.contains(env!("CARGO_PKG_VERSION")), "{text}");
    assert!(first.contains('(') && first.ends_with(')'), "{text}");
    assert!(text.contains("engine:  casegrid-engine"), "{text}");
    assert!(text.lines().any(|l| l.starts_with("target:  ") && l.len() > "target:  ".len()), "{text}");
}

#[test]
fn validate_reports_every_invalid_cell() {
    let dir = tempfile::tempdir().unwrap();
    let grid = write_json(dir.path(), "grid.json", &sample_grid());

    let output = casegrid(dir.path()).arg("validate").arg(&grid).output().expect("casegrid validate");
    let errors = assert_single_json(&output);
    let map = errors.as_object().unwrap();

    assert_eq!(map.len(), 2, "errors: {}", errors);
    assert_eq!(map["0_clinicalSymptoms.1"]["message"], "Only 0 or 1 can be entered.");
    assert!(map.contains_key("1_isPatient"));
}

#[test]
fn validate_worker_matches_inline() {
    let dir = tempfile::tempdir().unwrap();
    let grid = write_json(dir.path(), "grid.json", &sample_grid());

    let inline = casegrid(dir.path()).arg("validate").arg(&grid).output().unwrap();
    let worker = casegrid(dir.path()).args(["validate", "--worker"]).arg(&grid).output().unwrap();

    let keys = |v: Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
    assert_eq!(keys(assert_single_json(&inline)), keys(assert_single_json(&worker)));
}

#[test]
fn validate_visible_only_uses_display_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = sample_grid();
    grid["filter"] = json!({"view": [1, 2]});
    let grid = write_json(dir.path(), "grid.json", &grid);

    let output = casegrid(dir.path())
        .args(["validate", "--visible-only"])
        .arg(&grid)
        .output()
        .unwrap();
    let errors = assert_single_json(&output);
    let keys: Vec<&String> = errors.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["0_isPatient"]);
}

#[test]
fn validate_strict_exit_signals_invalid_data() {
    let dir = tempfile::tempdir().unwrap();
    let grid = write_json(dir.path(), "grid.json", &sample_grid());

    let output = casegrid(dir.path())
        .args(["validate", "--strict-exit", "--format", "text"])
        .arg(&grid)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(5));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1\tisPatient\tOnly 0 or 1 can be entered."), "stdout: {}", stdout);
    assert!(String::from_utf8_lossy(&output.stderr).contains("2 invalid cell(s)"));
}

#[test]
fn validate_missing_grid_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = casegrid(dir.path())
        .arg("validate")
        .arg(dir.path().join("nope.json"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn validate_malformed_grid_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.json");
    std::fs::write(&path, "{ \"rows\": [").unwrap();
    let output = casegrid(dir.path()).arg("validate").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
}

// ===========================================================================
// remap
// ===========================================================================

#[test]
fn remap_carries_errors_across_inserted_columns() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_json(
        dir.path(),
        "before.json",
        &json!({"rows": [{"isPatient": "1", "clinicalSymptoms": ["1", "x"]}], "columns": columns(2)}),
    );
    let after = write_json(
        dir.path(),
        "after.json",
        &json!({"rows": [{"isPatient": "1", "clinicalSymptoms": ["", "", "1", "x"]}], "columns": columns(4)}),
    );
    let errors = write_json(dir.path(), "errors.json", &json!({"0_clinicalSymptoms.1": record("bad")}));

    let output = casegrid(dir.path())
        .args(["remap", "--inserted", "clinical@0", "--before"])
        .arg(&before)
        .arg("--after")
        .arg(&after)
        .arg("--errors")
        .arg(&errors)
        .output()
        .unwrap();
    let remapped = assert_single_json(&output);
    assert_eq!(remapped, json!({"0_clinicalSymptoms.3": record("bad")}));
}

#[test]
fn remap_upgrades_legacy_keys() {
    let dir = tempfile::tempdir().unwrap();
    let grid = json!({"rows": [{"isPatient": "7"}], "columns": columns(1)});
    let before = write_json(dir.path(), "before.json", &grid);
    let after = write_json(dir.path(), "after.json", &grid);
    let errors = write_json(dir.path(), "errors.json", &json!({"0_1": record("legacy")}));

    let output = casegrid(dir.path())
        .arg("remap")
        .arg("--before")
        .arg(&before)
        .arg("--after")
        .arg(&after)
        .arg("--errors")
        .arg(&errors)
        .output()
        .unwrap();
    assert_eq!(assert_single_json(&output), json!({"0_isPatient": record("legacy")}));
}

#[test]
fn remap_rejects_singleton_edit_spec() {
    let dir = tempfile::tempdir().unwrap();
    let output = casegrid(dir.path())
        .args(["remap", "--before", "a.json", "--after", "b.json", "--errors", "e.json"])
        .args(["--inserted", "isPatient@0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not a repeating group"));
}

// ===========================================================================
// rows
// ===========================================================================

#[test]
fn rows_delete_shifts_following_errors() {
    let dir = tempfile::tempdir().unwrap();
    let errors = write_json(
        dir.path(),
        "errors.json",
        &json!({"1_isPatient": record("a"), "3_isPatient": record("b")}),
    );

    let output = casegrid(dir.path())
        .args(["rows", "--delete", "1", "--errors"])
        .arg(&errors)
        .output()
        .unwrap();
    assert_eq!(assert_single_json(&output), json!({"2_isPatient": record("b")}));
}

#[test]
fn rows_insert_shifts_rows_at_or_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let errors = write_json(
        dir.path(),
        "errors.json",
        &json!({"0_isPatient": record("a"), "2_clinicalSymptoms.0": record("b")}),
    );

    let output = casegrid(dir.path())
        .args(["rows", "--insert", "2:3", "--errors"])
        .arg(&errors)
        .output()
        .unwrap();
    assert_eq!(
        assert_single_json(&output),
        json!({"0_isPatient": record("a"), "5_clinicalSymptoms.0": record("b")})
    );
}

#[test]
fn rows_without_edit_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let errors = write_json(dir.path(), "errors.json", &json!({}));
    let output = casegrid(dir.path()).args(["rows", "--errors"]).arg(&errors).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ===========================================================================
// schema
// ===========================================================================

#[test]
fn schema_json_lists_unique_keys() {
    let dir = tempfile::tempdir().unwrap();
    let grid = write_json(dir.path(), "grid.json", &sample_grid());

    let output = casegrid(dir.path()).args(["schema", "--json"]).arg(&grid).output().unwrap();
    let cols = assert_single_json(&output);
    let cols = cols.as_array().unwrap();

    assert_eq!(cols.len(), 4);
    assert_eq!(cols[1]["uniqueKey"], "isPatient");
    assert_eq!(cols[3]["uniqueKey"], "clinicalSymptoms.1");
    assert_eq!(cols[0]["isEditable"], false);
}
