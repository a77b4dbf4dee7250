//! Job subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::core::Engine;

use super::{drain, parse_constraints, parse_id, print_events};

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Create a standalone job
    Create {
        /// Game name
        name: String,

        #[arg(short, long, default_value = "platformer")]
        genre: String,

        /// Constraints as a JSON list of {"type", "value", "reason"}
        #[arg(long)]
        constraints: Option<String>,
    },

    /// Start a created job and run it
    Start {
        job_id: String,

        /// Only enqueue; do not process the queue
        #[arg(long)]
        no_wait: bool,
    },

    /// Show job status
    Status { job_id: String },

    /// Show every step of a job
    Steps {
        job_id: String,

        /// Include step artifacts
        #[arg(short, long)]
        full: bool,
    },

    /// Cancel a job
    Cancel { job_id: String },

    /// Retry a failed step
    Retry {
        job_id: String,
        step: u8,

        /// Bypass the transition guard and the retry limit
        #[arg(short, long)]
        force: bool,

        /// Only enqueue; do not process the queue
        #[arg(long)]
        no_wait: bool,
    },

    /// Print the job's generation log
    Logs { job_id: String },
}

pub async fn execute(engine: &Engine, command: JobCommands) -> Result<()> {
    let service = engine.service();
    match command {
        JobCommands::Create {
            name,
            genre,
            constraints,
        } => {
            let job = service
                .create_job(&name, &genre, parse_constraints(constraints.as_deref())?)
                .await?;
            println!("Job ID: {}", job.id);
            Ok(())
        }
        JobCommands::Start { job_id, no_wait } => {
            let job = service.start_job(parse_id(&job_id)?).await?;
            eprintln!("[Job {} started]", job.id);
            if !no_wait {
                drain(engine).await?;
                show_status(engine, &job_id).await?;
            }
            Ok(())
        }
        JobCommands::Status { job_id } => show_status(engine, &job_id).await,
        JobCommands::Steps { job_id, full } => {
            let steps = service.job_steps(parse_id(&job_id)?).await?;
            println!(
                "{:<4} {:<26} {:<10} {:>8}  {}",
                "#", "STEP", "STATUS", "ATTEMPTS", "ERROR"
            );
            println!("{}", "-".repeat(80));
            for record in steps {
                println!(
                    "{:<4} {:<26} {:<10} {:>4}/{:<3}  {}",
                    record.step.number(),
                    record.step.name(),
                    record.status.as_str(),
                    record.retry_count,
                    record.max_retries,
                    record.error_message.as_deref().unwrap_or("")
                );
                if full && !record.artifacts.is_empty() {
                    let artifacts = serde_json::to_string_pretty(&record.artifacts)
                        .context("Failed to encode artifacts")?;
                    for line in artifacts.lines() {
                        println!("       {}", line);
                    }
                }
            }
            Ok(())
        }
        JobCommands::Cancel { job_id } => {
            if service.cancel_job(parse_id(&job_id)?).await? {
                println!("Job {} cancelled", job_id);
            } else {
                println!("Job {} already finished", job_id);
            }
            Ok(())
        }
        JobCommands::Retry {
            job_id,
            step,
            force,
            no_wait,
        } => {
            let record = service.retry_step(parse_id(&job_id)?, step, force).await?;
            eprintln!(
                "[Step {} reset, attempt {}]",
                record.step.name(),
                record.retry_count + 1
            );
            if !no_wait {
                drain(engine).await?;
                show_status(engine, &job_id).await?;
            }
            Ok(())
        }
        JobCommands::Logs { job_id } => {
            print_events(&service.job_logs(parse_id(&job_id)?).await?);
            Ok(())
        }
    }
}

async fn show_status(engine: &Engine, job_id: &str) -> Result<()> {
    let job = engine.service().get_job(parse_id(job_id)?).await?;

    println!("Job ID: {}", job.id);
    println!("Name: {}", job.name);
    println!("Genre: {}", job.genre);
    println!("Status: {}", job.status.as_str());
    println!("Current step: {}/12", job.current_step);
    if let Some(batch_id) = job.batch_id {
        println!("Batch: {}", batch_id);
    }
    if !job.selected_mechanics.is_empty() {
        println!("Mechanics: {}", job.selected_mechanics.join(", "));
    }
    println!("Created: {}", job.created_at);
    Ok(())
}
