// SPDX-License-Identifier: Apache-2.0
//! Operator CLI for DagVault.
//!
//! Mirrors `jitos-cli`'s shape (a `clap::Parser` with a subcommand enum,
//! `#[tokio::main]` driving a single async dispatch) generalized from one
//! flat `Command` enum to a tree of subcommands grouped by the service
//! each one drives (`workflow`, `tag`, `compact`, `run`). Every subcommand
//! builds its own [`Engine`] from `--store` rather than holding one across
//! invocations — the CLI is a thin, stateless client of the library
//! crates, same as `jitos-cli` holds no state across its own `Status` call.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod engine;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use engine::Engine;

/// Which backing store to build the engine's collaborators against.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Store {
    /// Fresh, empty in-memory stores. Nothing persists past this process.
    Memory,
    /// A live Postgres connection, read from `--database-url` or
    /// `DAGVAULT_DATABASE_URL`.
    Postgres,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Which backing store to use.
    #[clap(long, value_enum, default_value = "memory")]
    store: Store,

    /// Postgres connection string (only used with `--store postgres`).
    #[clap(long, env = "DAGVAULT_DATABASE_URL")]
    database_url: Option<String>,

    /// Path to a `dagvault.toml` config file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Command to execute.
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new workflow and point a tag at it.
    Create {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Path to the workflow JSON document (`-` for stdin).
        #[clap(long)]
        file: PathBuf,
        /// Identity recorded as the artifact's creator.
        #[clap(long)]
        author: String,
    },
    /// Materialize and print a tag's current workflow.
    Get {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Identity to check access as (defaults to `username`).
        #[clap(long)]
        r#as: Option<String>,
    },
    /// Materialize a tag's workflow at a specific patch-chain sequence.
    GetAt {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// `0` for the base version, `k` for after the first `k` patches.
        #[clap(long)]
        seq: i64,
        /// Identity to check access as (defaults to `username`).
        #[clap(long)]
        r#as: Option<String>,
    },
    /// Append a JSON-Patch operation list as a new patch set.
    Patch {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Path to a JSON array of RFC 6902 operations (`-` for stdin).
        #[clap(long)]
        ops_file: PathBuf,
        /// Identity recorded as the patch's author.
        #[clap(long)]
        author: String,
    },
    /// Tag-registry operations.
    Tag {
        #[clap(subcommand)]
        cmd: TagCommand,
    },
    /// Patch-chain compaction.
    Compact {
        #[clap(subcommand)]
        cmd: CompactCommand,
    },
    /// Validate a patch chain's structural invariants (spec §4.3):
    /// `max(seq) == count(*) == depth(head)`, last member is the head.
    Verify {
        /// Head artifact id of the patch chain to validate.
        patch_head: String,
    },
    /// Run admission.
    Run {
        #[clap(subcommand)]
        cmd: RunCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// List tags accessible to a user (their own plus `_global_`).
    List {
        /// Username whose accessible tags to list.
        username: String,
    },
    /// Move a tag to a new dag_version or patch_set target unconditionally.
    Move {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Target artifact id to point at.
        #[clap(long)]
        target: String,
        /// Target kind: `dag_version`, `patch_set`, or `run_snapshot`.
        #[clap(long)]
        kind: String,
        /// Identity performing the move.
        #[clap(long)]
        mover: String,
    },
    /// Optimistically move a tag, failing without mutation on a version or
    /// target mismatch.
    Cas {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Version the caller expects the tag to currently be at.
        #[clap(long)]
        expected_version: i64,
        /// Target artifact id the caller expects the tag to currently
        /// point at.
        #[clap(long)]
        expected_target: String,
        /// New target artifact id.
        #[clap(long)]
        target: String,
        /// New target kind: `dag_version`, `patch_set`, or `run_snapshot`.
        #[clap(long)]
        kind: String,
        /// Identity performing the move.
        #[clap(long)]
        mover: String,
    },
    /// Delete a tag.
    Delete {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Identity performing the delete.
        #[clap(long)]
        mover: String,
    },
    /// Undo the most recent move of a tag.
    Undo {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Identity performing the undo.
        #[clap(long)]
        mover: String,
    },
    /// Redo the most recently undone move of a tag.
    Redo {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Identity performing the redo.
        #[clap(long)]
        mover: String,
    },
}

#[derive(Subcommand, Debug)]
enum CompactCommand {
    /// Squash a patch chain into a new base version. Does not move any
    /// tag — follow with `migrate-tag` to point a tag at the result.
    Run {
        /// Head artifact id of the patch chain to compact.
        patch_head: String,
    },
    /// Summarize compaction candidates at or beyond a depth threshold.
    Stats {
        /// Minimum chain depth to count as a candidate.
        #[clap(long, default_value_t = 20)]
        threshold: i32,
    },
    /// Point a tag at an already-compacted base version.
    MigrateTag {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// The compacted `dag_version` artifact id to migrate onto.
        #[clap(long)]
        new_base: String,
        /// Identity performing the migration.
        #[clap(long)]
        mover: String,
    },
}

#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Materialize a tag and admit a new run against the result.
    Create {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Path to a JSON object of run inputs (`-` for stdin; defaults
        /// to `{}` if omitted).
        #[clap(long)]
        inputs_file: Option<PathBuf>,
    },
    /// Fetch a run's current status and snapshot reference.
    Get {
        /// Run id to fetch.
        run_id: String,
    },
    /// Fetch a run plus whatever ephemeral IR/context is still cached.
    Details {
        /// Run id to fetch.
        run_id: String,
    },
    /// List runs submitted by a user.
    ListByUser {
        /// Submitter to filter by.
        username: String,
        /// Maximum number of rows to return.
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// List runs submitted against a tag.
    ListByTag {
        /// Owner of the tag.
        username: String,
        /// Tag name within the owner's namespace.
        tag: String,
        /// Maximum number of rows to return.
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// Update a run's lifecycle status.
    SetStatus {
        /// Run id to update.
        run_id: String,
        /// New status: `queued`, `running`, `completed`, `failed`, or
        /// `cancelled`.
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = dagvault_config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let engine = match args.store {
        Store::Memory => Engine::in_memory(),
        Store::Postgres => {
            let url = args.database_url.as_deref().unwrap_or(&config.database_url);
            Engine::postgres(url, config.max_db_connections).await?
        }
    };

    commands::dispatch(&engine, args.cmd).await
}
