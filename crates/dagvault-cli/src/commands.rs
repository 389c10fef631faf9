// SPDX-License-Identifier: Apache-2.0
//! Maps each parsed subcommand onto its service call and renders the
//! result. One function per leaf subcommand, kept flat rather than
//! funneled through a trait object — there is exactly one `Engine` per
//! invocation and no polymorphism to buy here.

use std::io::Read as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use dagvault_core::{CancellationToken, Id, TagName, Username};
use dagvault_runs::RunStatus;
use dagvault_tags::{NewTarget, TagKey, TargetKind};

use crate::engine::Engine;
use crate::output;
use crate::{CompactCommand, RunCommand, TagCommand};

/// Dispatch a fully parsed top-level command against `engine`.
///
/// # Errors
///
/// Returns an error if the input could not be read/parsed or the
/// underlying service call failed.
pub async fn dispatch(engine: &Engine, cmd: crate::Command) -> Result<()> {
    match cmd {
        crate::Command::Create {
            username,
            tag,
            file,
            author,
        } => create_workflow(engine, &username, &tag, &file, &author).await,
        crate::Command::Get { username, tag, r#as } => {
            get_workflow(engine, &username, &tag, r#as.as_deref()).await
        }
        crate::Command::GetAt {
            username,
            tag,
            seq,
            r#as,
        } => get_workflow_at(engine, &username, &tag, seq, r#as.as_deref()).await,
        crate::Command::Patch {
            username,
            tag,
            ops_file,
            author,
        } => create_patch(engine, &username, &tag, &ops_file, &author).await,
        crate::Command::Tag { cmd } => tag_command(engine, cmd).await,
        crate::Command::Compact { cmd } => compact_command(engine, cmd).await,
        crate::Command::Verify { patch_head } => verify_chain(engine, &patch_head).await,
        crate::Command::Run { cmd } => run_command(engine, cmd).await,
    }
}

async fn verify_chain(engine: &Engine, patch_head: &str) -> Result<()> {
    let head: Id = patch_head.parse().context("parsing patch_head as an id")?;
    dagvault_patchchain::validate_chain(engine.catalog.as_ref(), head).await?;
    println!("chain rooted at {head} is structurally valid");
    Ok(())
}

fn tag_key(username: &str, tag: &str) -> Result<TagKey> {
    let username = Username::new(username).map_err(|e| anyhow::anyhow!(e))?;
    let tag_name = TagName::new(tag).map_err(|e| anyhow::anyhow!(e))?;
    Ok(TagKey::new(username, tag_name))
}

fn parse_target_kind(kind: &str) -> Result<TargetKind> {
    Ok(dagvault_tags::TargetKind::parse(kind)?)
}

/// Read `path`'s contents, or stdin if `path` is `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = read_input(path)?;
    serde_json::from_str(&text).with_context(|| format!("parsing {} as JSON", path.display()))
}

async fn create_workflow(
    engine: &Engine,
    username: &str,
    tag: &str,
    file: &Path,
    author: &str,
) -> Result<()> {
    let key = tag_key(username, tag)?;
    let workflow = read_json(file)?;
    let cancel = CancellationToken::new();
    let created = engine
        .workflow
        .create_workflow(&key, &workflow, author, &cancel)
        .await?;
    println!("artifact_id: {}", created.artifact_id);
    println!("cas_id: {}", created.cas_id);
    println!("nodes: {}  edges: {}", created.node_count, created.edge_count);
    Ok(())
}

async fn get_workflow(engine: &Engine, username: &str, tag: &str, r#as: Option<&str>) -> Result<()> {
    let key = tag_key(username, tag)?;
    let caller = r#as.unwrap_or(username);
    let materialized = engine.workflow.get_workflow(&key, caller).await?;
    output::print_json(&materialized.value);
    Ok(())
}

async fn get_workflow_at(
    engine: &Engine,
    username: &str,
    tag: &str,
    seq: i64,
    r#as: Option<&str>,
) -> Result<()> {
    let key = tag_key(username, tag)?;
    let caller = r#as.unwrap_or(username);
    let materialized = engine.workflow.get_workflow_at_version(&key, caller, seq).await?;
    output::print_json(&materialized.value);
    Ok(())
}

async fn create_patch(
    engine: &Engine,
    username: &str,
    tag: &str,
    ops_file: &Path,
    author: &str,
) -> Result<()> {
    let key = tag_key(username, tag)?;
    let ops = read_json(ops_file)?;
    let cancel = CancellationToken::new();
    let patch = engine.workflow.create_patch(&key, &ops, author, &cancel).await?;
    println!("artifact_id: {}", patch.artifact_id);
    println!("cas_id: {}", patch.cas_id);
    println!("depth: {}", patch.depth);
    Ok(())
}

async fn tag_command(engine: &Engine, cmd: TagCommand) -> Result<()> {
    match cmd {
        TagCommand::List { username } => {
            let user = Username::new(&username).map_err(|e| anyhow::anyhow!(e))?;
            let tags = engine.tags.list_accessible(&user).await?;
            output::print_tags(&tags);
        }
        TagCommand::Move {
            username,
            tag,
            target,
            kind,
            mover,
        } => {
            let key = tag_key(&username, &tag)?;
            let target_id: Id = target.parse().context("parsing --target as an id")?;
            let target_kind = parse_target_kind(&kind)?;
            let result = engine
                .tags
                .r#move(
                    &key,
                    NewTarget {
                        kind: target_kind,
                        id: target_id,
                        hash: None,
                    },
                    &mover,
                )
                .await?;
            output::print_tag(&result);
        }
        TagCommand::Cas {
            username,
            tag,
            expected_version,
            expected_target,
            target,
            kind,
            mover,
        } => {
            let key = tag_key(&username, &tag)?;
            let expected_target_id: Id =
                expected_target.parse().context("parsing --expected-target as an id")?;
            let target_id: Id = target.parse().context("parsing --target as an id")?;
            let target_kind = parse_target_kind(&kind)?;
            let committed = engine
                .tags
                .compare_and_swap(
                    &key,
                    expected_version,
                    expected_target_id,
                    NewTarget {
                        kind: target_kind,
                        id: target_id,
                        hash: None,
                    },
                    &mover,
                )
                .await?;
            if committed {
                println!("committed");
            } else {
                bail!("conflict: tag was not at the expected version/target");
            }
        }
        TagCommand::Delete { username, tag, mover } => {
            let key = tag_key(&username, &tag)?;
            engine.tags.delete(&key, &mover).await?;
            println!("deleted {username}/{tag}");
        }
        TagCommand::Undo { username, tag, mover } => {
            let key = tag_key(&username, &tag)?;
            let result = engine.tags.undo(&key, &mover).await?;
            output::print_tag(&result);
        }
        TagCommand::Redo { username, tag, mover } => {
            let key = tag_key(&username, &tag)?;
            let result = engine.tags.redo(&key, &mover).await?;
            output::print_tag(&result);
        }
    }
    Ok(())
}

async fn compact_command(engine: &Engine, cmd: CompactCommand) -> Result<()> {
    match cmd {
        CompactCommand::Run { patch_head } => {
            let id: Id = patch_head.parse().context("parsing patch_head as an id")?;
            let result = engine.compaction.compact(id).await?;
            println!("new_base_id: {}", result.new_base_id);
            println!("old_depth: {}", result.old_depth);
            println!("new_cas_id: {}", result.new_cas_id);
        }
        CompactCommand::Stats { threshold } => {
            let stats = engine.compaction.get_compaction_stats(threshold).await?;
            println!("candidate_count: {}", stats.candidate_count);
            println!("total_depth: {}", stats.total_depth);
            println!("estimated_row_savings: {}", stats.estimated_row_savings);
            match stats.longest_chain {
                Some((id, depth)) => println!("longest_chain: {id} (depth {depth})"),
                None => println!("longest_chain: none"),
            }
        }
        CompactCommand::MigrateTag {
            username,
            tag,
            new_base,
            mover,
        } => {
            let key = tag_key(&username, &tag)?;
            let new_base_id: Id = new_base.parse().context("parsing --new-base as an id")?;
            let result = engine
                .compaction
                .migrate_tag(engine.tags.as_ref(), &key, new_base_id, &mover)
                .await?;
            output::print_tag(&result);
        }
    }
    Ok(())
}

async fn run_command(engine: &Engine, cmd: RunCommand) -> Result<()> {
    match cmd {
        RunCommand::Create {
            username,
            tag,
            inputs_file,
        } => {
            let key = tag_key(&username, &tag)?;
            let materialized = engine.workflow.get_workflow(&key, &username).await?;
            let inputs = match inputs_file {
                Some(path) => read_json(&path)?,
                None => serde_json::json!({}),
            };
            let (run_id, artifact_id) = engine
                .runs
                .create_run(&key, &materialized, inputs, &username)
                .await?;
            println!("run_id: {run_id}");
            println!("artifact_id: {artifact_id}");
        }
        RunCommand::Get { run_id } => {
            let id: Id = run_id.parse().context("parsing run_id as an id")?;
            let run = engine.runs.get_run(id).await?;
            output::print_run(&run);
        }
        RunCommand::Details { run_id } => {
            let id: Id = run_id.parse().context("parsing run_id as an id")?;
            let details = engine.runs.get_run_details(id).await?;
            output::print_run_details(&details);
        }
        RunCommand::ListByUser { username, limit } => {
            let runs = engine.runs.list_by_user(&username, limit).await?;
            output::print_runs(&runs);
        }
        RunCommand::ListByTag { username, tag, limit } => {
            let key = tag_key(&username, &tag)?;
            let runs = engine.runs.list_by_workflow_tag(&key, limit).await?;
            output::print_runs(&runs);
        }
        RunCommand::SetStatus { run_id, status } => {
            let id: Id = run_id.parse().context("parsing run_id as an id")?;
            let status = RunStatus::parse(&status)?;
            let run = engine.runs.update_run_status(id, status).await?;
            output::print_run(&run);
        }
    }
    Ok(())
}
