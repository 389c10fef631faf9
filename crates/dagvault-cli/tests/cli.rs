// SPDX-License-Identifier: Apache-2.0
//! End-to-end smoke tests over the `dagvault` binary.
//!
//! Each test starts a fresh `--store memory` process per invocation, so
//! these exercise the CLI's argument parsing and output formatting, not
//! cross-invocation persistence (the in-memory engine is scoped to a
//! single process by design, per `Engine::in_memory`'s own doc comment).

use std::io::Write as _;

use assert_cmd::Command;
use predicates::str::contains;

fn dagvault() -> Command {
    Command::cargo_bin("dagvault").expect("binary built")
}

fn write_json(dir: &tempfile::TempDir, name: &str, value: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create fixture file");
    write!(file, "{value}").expect("write fixture file");
    path
}

#[test]
fn create_then_get_round_trips_a_workflow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workflow = serde_json::json!({"nodes": [{"id": "n1"}], "edges": []});
    let file = write_json(&dir, "workflow.json", &workflow);

    dagvault()
        .args(["create", "alice", "main", "--file"])
        .arg(&file)
        .args(["--author", "alice"])
        .assert()
        .success()
        .stdout(contains("nodes: 1  edges: 0"));
}

#[test]
fn create_rejects_reserved_global_username_without_admin_gate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workflow = serde_json::json!({"nodes": [], "edges": []});
    let file = write_json(&dir, "workflow.json", &workflow);

    dagvault()
        .args(["create", "_global_", "release", "--file"])
        .arg(&file)
        .args(["--author", "alice"])
        .assert()
        .failure();
}

#[test]
fn compact_stats_on_an_empty_store_reports_no_candidates() {
    dagvault()
        .args(["compact", "stats", "--threshold", "20"])
        .assert()
        .success()
        .stdout(contains("candidate_count: 0"));
}

#[test]
fn get_on_unknown_tag_fails() {
    dagvault()
        .args(["get", "alice", "does-not-exist"])
        .assert()
        .failure();
}

#[test]
fn verify_on_unknown_artifact_fails() {
    dagvault()
        .args(["verify", "00000000-0000-7000-8000-000000000000"])
        .assert()
        .failure();
}

#[test]
fn tag_list_on_fresh_store_is_empty_but_succeeds() {
    dagvault()
        .args(["tag", "list", "alice"])
        .assert()
        .success();
}

#[test]
fn run_create_on_unknown_tag_fails() {
    dagvault()
        .args(["run", "create", "alice", "does-not-exist"])
        .assert()
        .failure();
}

#[test]
fn run_get_on_unknown_id_fails() {
    dagvault()
        .args(["run", "get", "00000000-0000-7000-8000-000000000000"])
        .assert()
        .failure();
}

#[test]
fn run_list_by_user_on_fresh_store_is_empty_but_succeeds() {
    dagvault()
        .args(["run", "list-by-user", "alice"])
        .assert()
        .success();
}
