// SPDX-License-Identifier: Apache-2.0
//! Human-readable rendering helpers shared by every subcommand.
//!
//! Tabular output goes through `comfy-table` (already part of the donor
//! workspace's dependency graph for the same concern); JSON documents are
//! pretty-printed so a user piping `dagvault get ... > workflow.json` gets
//! something readable, not a single minified line.

use comfy_table::{presets::UTF8_FULL, Table};
use dagvault_runs::{Run, RunDetails};
use dagvault_tags::Tag;

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => println!("{value} (failed to pretty-print: {err})"),
    }
}

fn field_table(rows: Vec<(&str, String)>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["field".to_string(), "value".to_string()]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    table
}

/// Render a single tag row as a two-column table.
pub fn print_tag(tag: &Tag) {
    let table = field_table(vec![
        ("username", tag.key.username.as_str().to_string()),
        ("tag", tag.key.tag_name.as_str().to_string()),
        ("target_kind", tag.target_kind.label().to_string()),
        ("target_id", tag.target_id.to_string()),
        ("target_hash", tag.target_hash.clone().unwrap_or_else(|| "-".to_string())),
        ("version", tag.version.to_string()),
        ("last_mover", tag.last_mover.clone()),
        ("last_moved_at", tag.last_moved_at.to_rfc3339()),
    ]);
    println!("{table}");
}

/// Render a list of tags as one row per tag.
pub fn print_tags(tags: &[Tag]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["username", "tag", "kind", "target_id", "version"]);
    for tag in tags {
        table.add_row(vec![
            tag.key.username.as_str().to_string(),
            tag.key.tag_name.as_str().to_string(),
            tag.target_kind.label().to_string(),
            tag.target_id.to_string(),
            tag.version.to_string(),
        ]);
    }
    println!("{table}");
}

/// Render a single run row as a two-column table.
pub fn print_run(run: &Run) {
    let table = field_table(vec![
        ("run_id", run.run_id.to_string()),
        ("artifact_id", run.artifact_id.to_string()),
        ("tag", format!("{}/{}", run.tag.username.as_str(), run.tag.tag_name.as_str())),
        ("submitter", run.submitter.clone()),
        ("status", run.status.label().to_string()),
        ("submitted_at", run.submitted_at.to_rfc3339()),
    ]);
    println!("{table}");
}

/// Render a list of runs as one row per run.
pub fn print_runs(runs: &[Run]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["run_id", "tag", "status", "submitted_at"]);
    for run in runs {
        table.add_row(vec![
            run.run_id.to_string(),
            format!("{}/{}", run.tag.username.as_str(), run.tag.tag_name.as_str()),
            run.status.label().to_string(),
            run.submitted_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
}

/// Render a run's full detail view, including whatever ephemeral IR and
/// execution context are still cached.
pub fn print_run_details(details: &RunDetails) {
    print_run(&details.run);
    println!(
        "ir: {}",
        details.ir.as_ref().map_or("(not cached)".to_string(), ToString::to_string)
    );
    println!(
        "context: {}",
        details
            .context
            .as_ref()
            .map_or("(not cached)".to_string(), ToString::to_string)
    );
}
