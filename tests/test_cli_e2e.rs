mod common;

use std::path::Path;

use common::{arg, roomkeeper};
use roomkeeper::error::ExitCode;
use serde_json::{Value, json};

fn write_store(dir: &Path, rooms: &Value) -> std::path::PathBuf {
    let path = dir.join("rooms.json");
    std::fs::write(&path, serde_json::to_vec_pretty(rooms).unwrap()).unwrap();
    path
}

fn read_store(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ============================================================================
// version
// ============================================================================

#[test]
fn version_human_and_json() {
    let output = roomkeeper(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("roomkeeper "));

    let output = roomkeeper(&["version", "--format", "json"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed["name"], "roomkeeper");
    assert!(parsed["version"].is_string());
}

// ============================================================================
// validate
// ============================================================================

#[test]
fn validate_accepts_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("good.yaml");
    std::fs::write(&path, "phases:\n  active: 20m\n  short_break: 4m\nrepair:\n  overdue_margin: 30m\n")
        .unwrap();

    let output = roomkeeper(&["--quiet", "validate", arg(&path)]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("ok"));
}

#[test]
fn validate_rejects_zero_duration_and_unknown_field() {
    let dir = tempfile::tempdir().unwrap();
    let zero = dir.path().join("zero.yaml");
    std::fs::write(&zero, "phases:\n  active: 0s\n").unwrap();
    let unknown = dir.path().join("unknown.yaml");
    std::fs::write(&unknown, "phases:\n  actve: 20m\n").unwrap();

    let output = roomkeeper(&["--quiet", "validate", "--format", "json", arg(&zero), arg(&unknown)]);
    assert_eq!(output.status.code(), Some(ExitCode::CONFIG_ERROR));

    let reports: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 2);
    assert_eq!(reports[0]["valid"], false);
    assert!(reports[0]["errors"][0].as_str().unwrap().contains("phases.active"));
    assert_eq!(reports[1]["valid"], false);
}

#[test]
fn validate_missing_file() {
    let output = roomkeeper(&["--quiet", "validate", "/nonexistent/roomkeeper.yaml"]);
    assert_eq!(output.status.code(), Some(ExitCode::CONFIG_ERROR));
}

// ============================================================================
// status / repair / force-clear
// ============================================================================

#[test]
fn status_reads_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = write_store(
        dir.path(),
        &json!({
            "lobby": {"phase": "ACTIVE", "phaseDeadline": 4_102_444_800_000_i64, "cycleCount": 2},
            "empty": {},
        }),
    );

    let output = roomkeeper(&["--quiet", "status", "--store", arg(&store), "--format", "json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let statuses: Value = serde_json::from_str(&stdout(&output)).unwrap();
    let statuses = statuses.as_array().unwrap();
    assert_eq!(statuses.len(), 2);
    let lobby = statuses.iter().find(|s| s["room"] == "lobby").unwrap();
    assert_eq!(lobby["phase"], "ACTIVE");
    assert_eq!(lobby["cycle_count"], 2);
    assert_eq!(lobby["source"], "store");

    let output = roomkeeper(&["--quiet", "status", "--store", arg(&store), "--room", "lobby"]);
    assert!(stdout(&output).starts_with("lobby: ACTIVE cycle=2"));
}

#[test]
fn repair_resets_stuck_break_in_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = write_store(
        dir.path(),
        &json!({
            "stuck": {
                "phase": "LONG_BREAK",
                "phaseDeadline": 1_000,
                "cycleCount": 3,
                "break": {"kind": "LONG_BREAK", "startedAt": 0, "endsAt": 1_000},
            },
        }),
    );

    let output = roomkeeper(&["--quiet", "repair", "--store", arg(&store), "--room", "stuck"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).starts_with("stuck: repaired"));

    let rooms = read_store(&store);
    assert_eq!(rooms["stuck"]["phase"], "ACTIVE");
    assert_eq!(rooms["stuck"]["cycleCount"], 4);
    assert!(rooms["stuck"].get("break").is_none());

    let output = roomkeeper(&["--quiet", "repair", "--store", arg(&store), "--all", "--format", "json"]);
    assert!(output.status.success());
    let report: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["checked"], 1);
    assert_eq!(report["repaired"], json!([]));
}

#[test]
fn force_clear_removes_only_the_break() {
    let dir = tempfile::tempdir().unwrap();
    let store = write_store(
        dir.path(),
        &json!({
            "r1": {
                "phase": "SHORT_BREAK",
                "phaseDeadline": 1_000,
                "break": {"kind": "SHORT_BREAK", "startedAt": 0, "endsAt": 1_000},
            },
        }),
    );

    let output = roomkeeper(&["--quiet", "force-clear", "--store", arg(&store), "--room", "r1"]);
    assert!(output.status.success());

    let rooms = read_store(&store);
    assert_eq!(rooms["r1"]["phase"], "SHORT_BREAK");
    assert!(rooms["r1"].get("break").is_none());
}

#[test]
fn repair_requires_a_target() {
    let output = roomkeeper(&["repair", "--store", "rooms.json"]);
    assert_eq!(output.status.code(), Some(2));
}
