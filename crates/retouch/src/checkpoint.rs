use anyhow::Context;
use clap::Subcommand;
use retouch_checkpoint::{Checkpoint, CheckpointManager, TimelineState};
use retouch_engine::config::RetouchConfig;
use serde::Serialize;
use std::path::Path;

#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// Record the working tree as a new checkpoint
    Create { message: String },
    /// Newest checkpoints first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Id of the checked-out checkpoint
    Current,
    /// Move the working tree to an earlier (or later) checkpoint
    Travel { id: String },
    /// Branch, timeline position and newest checkpoint
    Status,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    branch: Option<String>,
    timeline_branch: String,
    state: TimelineState,
    current: Option<String>,
    latest: Option<Checkpoint>,
}

pub fn run(
    config: &RetouchConfig,
    project: &Path,
    command: CheckpointCommand,
    json: bool,
) -> anyhow::Result<()> {
    let settings = &config.checkpoints;
    let manager = CheckpointManager::new(project)
        .with_timeline_branch(&settings.timeline_branch)
        .with_author(&settings.author_name, &settings.author_email);

    match command {
        CheckpointCommand::Create { message } => {
            let checkpoint = manager
                .create_checkpoint(&message)
                .context("Failed to create checkpoint")?;
            if json {
                print_json(&checkpoint)?;
            } else {
                println!("Created {} {}", checkpoint.short_id, checkpoint.message);
            }
        }
        CheckpointCommand::List { limit } => {
            let checkpoints = manager.list_checkpoints(limit.unwrap_or(settings.list_limit))?;
            if json {
                print_json(&checkpoints)?;
            } else {
                let current = manager.current_checkpoint()?;
                for checkpoint in &checkpoints {
                    let marker = if current.as_deref() == Some(checkpoint.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{} {}  {}  {}  {}",
                        marker,
                        checkpoint.short_id,
                        checkpoint.timestamp.format("%Y-%m-%d %H:%M"),
                        checkpoint.author,
                        checkpoint.message
                    );
                }
            }
        }
        CheckpointCommand::Current => {
            let current = manager.current_checkpoint()?;
            if json {
                print_json(&current)?;
            } else {
                println!("{}", current.as_deref().unwrap_or("(no checkpoints yet)"));
            }
        }
        CheckpointCommand::Travel { id } => {
            let checkpoint = manager
                .travel_to(&id)
                .with_context(|| format!("Failed to travel to {}", id))?;
            if json {
                print_json(&checkpoint)?;
            } else {
                println!("Now at {} {}", checkpoint.short_id, checkpoint.message);
            }
        }
        CheckpointCommand::Status => {
            let report = StatusReport {
                branch: manager.current_branch()?,
                timeline_branch: manager.timeline_branch().to_string(),
                state: manager.state()?,
                current: manager.current_checkpoint()?,
                latest: manager.latest_checkpoint()?,
            };
            if json {
                print_json(&report)?;
            } else {
                println!("branch:   {}", report.branch.as_deref().unwrap_or("(detached)"));
                println!("timeline: {}", report.timeline_branch);
                println!("state:    {:?}", report.state);
                println!("current:  {}", report.current.as_deref().unwrap_or("-"));
                match &report.latest {
                    Some(latest) => println!("latest:   {} {}", latest.short_id, latest.message),
                    None => println!("latest:   -"),
                }
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
