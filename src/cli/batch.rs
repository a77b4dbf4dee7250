//! Batch subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::core::{BatchRequest, Engine, MAX_BATCH_SIZE};

use super::{drain, parse_constraints, parse_id, print_jobs};

#[derive(Subcommand, Debug)]
pub enum BatchCommands {
    /// Create a batch of jobs
    Create {
        /// Batch name (defaults to a timestamp)
        #[arg(short, long)]
        name: Option<String>,

        /// Number of games, 1 to 50 (defaults to workflow.batch_default_size)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=MAX_BATCH_SIZE as i64))]
        count: Option<u32>,

        /// Genres, assigned round-robin (repeatable)
        #[arg(short, long = "genre")]
        genres: Vec<String>,

        /// Constraints as a JSON list of {"type", "value", "reason"}
        #[arg(long)]
        constraints: Option<String>,

        /// Inherit post-launch constraints from this batch
        #[arg(long)]
        inherit_from: Option<String>,
    },

    /// Start a pending batch and run it
    Start {
        batch_id: String,

        /// Only enqueue; do not process the queue
        #[arg(long)]
        no_wait: bool,
    },

    /// Cancel every unfinished job of a batch
    Cancel { batch_id: String },

    /// Show a batch and its jobs
    Show {
        batch_id: String,

        /// Print the batch's generation log
        #[arg(long)]
        logs: bool,
    },

    /// List recent batches
    List {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

pub async fn execute(engine: &Engine, command: BatchCommands) -> Result<()> {
    let service = engine.service();
    match command {
        BatchCommands::Create {
            name,
            count,
            genres,
            constraints,
            inherit_from,
        } => {
            let request = BatchRequest {
                name,
                game_count: count,
                genre_mix: genres,
                constraints: parse_constraints(constraints.as_deref())?,
                inherit_from: inherit_from.as_deref().map(parse_id).transpose()?,
            };
            let (batch, jobs) = service.create_batch(request).await?;
            println!("Batch ID: {}", batch.id);
            println!("Name: {}", batch.name);
            if !batch.constraints.is_empty() {
                println!(
                    "Constraints: {}",
                    serde_json::to_string(&batch.constraints).context("Failed to encode constraints")?
                );
            }
            println!();
            print_jobs(&jobs);
            Ok(())
        }
        BatchCommands::Start { batch_id, no_wait } => {
            let batch = service.start_batch(parse_id(&batch_id)?).await?;
            eprintln!("[Batch {} started]", batch.id);
            if !no_wait {
                drain(engine).await?;
                let batch = service.get_batch(batch.id).await?;
                eprintln!("[Batch {} is {}]", batch.id, batch.status.as_str());
            }
            Ok(())
        }
        BatchCommands::Cancel { batch_id } => {
            let cancelled = service.cancel_batch(parse_id(&batch_id)?).await?;
            println!("Cancelled {} job(s)", cancelled);
            Ok(())
        }
        BatchCommands::Show { batch_id, logs } => {
            let batch_id = parse_id(&batch_id)?;
            let batch = service.get_batch(batch_id).await?;
            println!("Batch ID: {}", batch.id);
            println!("Name: {}", batch.name);
            println!("Status: {}", batch.status.as_str());
            println!("Games: {}", batch.game_count);
            println!("Genres: {}", batch.genre_mix.join(", "));
            if let Some(parent) = batch.inherited_from {
                println!("Inherited from: {}", parent);
            }
            println!("Created: {}", batch.created_at);
            println!();
            print_jobs(&service.list_jobs(Some(batch_id)).await?);

            if logs {
                println!();
                super::print_events(&service.batch_logs(batch_id).await?);
            }
            Ok(())
        }
        BatchCommands::List { limit } => {
            let batches = service.list_batches(limit).await?;
            if batches.is_empty() {
                println!("No batches found");
                return Ok(());
            }
            println!("{:<38} {:<28} {:<10} {:>5}", "BATCH ID", "NAME", "STATUS", "GAMES");
            println!("{}", "-".repeat(84));
            for batch in batches {
                println!(
                    "{:<38} {:<28} {:<10} {:>5}",
                    batch.id,
                    batch.name,
                    batch.status.as_str(),
                    batch.game_count
                );
            }
            Ok(())
        }
    }
}
