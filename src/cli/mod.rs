//! Command-line interface for gamefactory.
//!
//! Provides commands for creating and running batches, inspecting and
//! retrying jobs, reading similarity history and learned weights, and
//! recording player analytics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config;
use crate::core::Engine;
use crate::domain::{Constraint, Event, Job};

pub mod batch;
pub mod job;

/// gamefactory - Durable game generation workflow engine
#[derive(Parser, Debug)]
#[command(name = "gamefactory")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Batch operations
    #[command(subcommand)]
    Batch(batch::BatchCommands),

    /// Job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Similarity history
    #[command(subcommand)]
    Similarity(SimilarityCommands),

    /// Show learned mechanic weights
    Weights {
        /// Only show one genre
        #[arg(short, long)]
        genre: Option<String>,
    },

    /// Player analytics
    #[command(subcommand)]
    Analytics(AnalyticsCommands),

    /// Re-enqueue unfinished work from the database and process it
    Work,

    /// Print the resolved configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum SimilarityCommands {
    /// Similarity checks recorded for a job
    Checks { job_id: String },

    /// Regeneration decisions, for one job or the most recent overall
    Regenerations {
        job_id: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Threshold and attempt limit
    Config,
}

#[derive(Subcommand, Debug)]
pub enum AnalyticsCommands {
    /// Record one event reported by a published game
    Record {
        job_id: String,

        /// Event name (game_start, level_complete, ad_completed, ...)
        event_name: String,

        #[arg(short, long)]
        level: Option<u32>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        if let Commands::Config = self.command {
            return show_config();
        }

        let engine = Engine::from_config(config::config()?).await?;
        match self.command {
            Commands::Batch(command) => batch::execute(&engine, command).await,
            Commands::Job(command) => job::execute(&engine, command).await,
            Commands::Similarity(command) => execute_similarity(&engine, command).await,
            Commands::Weights { genre } => show_weights(&engine, genre.as_deref()).await,
            Commands::Analytics(AnalyticsCommands::Record {
                job_id,
                event_name,
                level,
            }) => {
                let event = engine
                    .service()
                    .record_analytics_event(parse_id(&job_id)?, &event_name, level)
                    .await?;
                println!("Recorded {} for job {}", event.event_name, event.job_id);
                Ok(())
            }
            Commands::Work => {
                let enqueued = engine.service().enqueue_runnable().await?;
                eprintln!("[{} task(s) enqueued]", enqueued);
                drain(&engine).await
            }
            Commands::Config => show_config(),
        }
    }
}

async fn execute_similarity(engine: &Engine, command: SimilarityCommands) -> Result<()> {
    let service = engine.service();
    match command {
        SimilarityCommands::Checks { job_id } => {
            let checks = service.similarity_checks(parse_id(&job_id)?).await?;
            if checks.is_empty() {
                println!("No similarity checks recorded");
                return Ok(());
            }
            println!(
                "{:<8} {:>6} {:<8} {:<12} {:<38}",
                "ATTEMPT", "SCORE", "SIMILAR", "REGENERATED", "CLOSEST JOB"
            );
            println!("{}", "-".repeat(76));
            for check in checks {
                println!(
                    "{:<8} {:>6.3} {:<8} {:<12} {:<38}",
                    check.attempt_number,
                    check.score,
                    check.is_similar,
                    check.triggered_regeneration,
                    check
                        .most_similar_job_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        SimilarityCommands::Regenerations { job_id, limit } => {
            let logs = match job_id {
                Some(job_id) => service.regeneration_logs(parse_id(&job_id)?).await?,
                None => service.recent_regenerations(limit).await?,
            };
            if logs.is_empty() {
                println!("No regenerations recorded");
                return Ok(());
            }
            println!(
                "{:<38} {:<8} {:>6} {:<22} {}",
                "JOB ID", "ATTEMPT", "SCORE", "OUTCOME", "REASON"
            );
            println!("{}", "-".repeat(100));
            for log in logs {
                println!(
                    "{:<38} {:<8} {:>6.3} {:<22} {}",
                    log.job_id,
                    log.attempt_number,
                    log.score,
                    log.outcome.as_str(),
                    log.reason
                );
            }
            Ok(())
        }
        SimilarityCommands::Config => {
            let config = service.similarity_config();
            println!("Threshold: {:.2}", config.threshold);
            println!("Max attempts: {}", config.max_attempts);
            Ok(())
        }
    }
}

async fn show_weights(engine: &Engine, genre: Option<&str>) -> Result<()> {
    let service = engine.service();
    let weights = service.learning_weights(genre).await?;
    if weights.is_empty() {
        println!("No learned weights yet");
        return Ok(());
    }

    println!(
        "{:<12} {:<24} {:>7} {:>8} {:>10} {:>11}",
        "GENRE", "MECHANIC", "WEIGHT", "SAMPLES", "RETENTION", "COMPLETION"
    );
    println!("{}", "-".repeat(77));
    for weight in &weights {
        println!(
            "{:<12} {:<24} {:>7.3} {:>8} {:>10.3} {:>11.3}",
            weight.genre,
            weight.mechanic_name,
            weight.weight,
            weight.sample_count,
            weight.avg_retention,
            weight.avg_completion
        );
    }

    if genre.is_none() {
        println!();
        for summary in service.weight_summaries().await? {
            println!(
                "{}: {} mechanic(s), average {:.3}, {} sample(s){}",
                summary.genre,
                summary.mechanics,
                summary.average_weight,
                summary.total_samples,
                summary
                    .genre_weight
                    .map(|w| format!(", genre weight {:.3}", w))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config::config()?;
    let yaml = serde_yaml::to_string(config).context("Failed to encode configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Process the queue and print a one-line summary
pub(crate) async fn drain(engine: &Engine) -> Result<()> {
    let summary = engine.run_until_idle().await?;
    eprintln!(
        "[{} task(s): {} completed, {} retried, {} failed, {} error(s)]",
        summary.tasks, summary.completed_steps, summary.retries, summary.failed_steps, summary.errors
    );
    Ok(())
}

pub(crate) fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid id: {}", value))
}

pub(crate) fn parse_constraints(raw: Option<&str>) -> Result<Vec<Constraint>> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("Constraints must be a JSON list"),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs");
        return;
    }
    println!("{:<38} {:<28} {:<12} {:<12} {:>4}", "JOB ID", "NAME", "GENRE", "STATUS", "STEP");
    println!("{}", "-".repeat(98));
    for job in jobs {
        println!(
            "{:<38} {:<28} {:<12} {:<12} {:>4}",
            job.id,
            job.name,
            job.genre,
            job.status.as_str(),
            job.current_step
        );
    }
}

pub(crate) fn print_events(events: &[Event]) {
    for event in events {
        let step = event
            .step
            .map(|s| format!(" [{}]", s.name()))
            .unwrap_or_default();
        println!(
            "{} {:<5} {}{} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.level().as_str(),
            event.event_type.as_str(),
            step,
            event.message
        );
        if let Some(error) = &event.error {
            println!("    error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_constraints() {
        let parsed = parse_constraints(Some(
            r#"[{"type": "avoid_mechanics", "value": ["match3"], "reason": "overused"}]"#,
        ))
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind(), "avoid_mechanics");

        assert!(parse_constraints(None).unwrap().is_empty());
        assert!(parse_constraints(Some("not json")).is_err());
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "gamefactory",
            "batch",
            "create",
            "--count",
            "4",
            "--genre",
            "puzzle",
            "--genre",
            "runner",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch(batch::BatchCommands::Create { count, genres, .. }) => {
                assert_eq!(count, Some(4));
                assert_eq!(genres, vec!["puzzle", "runner"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "gamefactory",
            "job",
            "retry",
            "00000000-0000-0000-0000-000000000000",
            "3",
            "--force",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Job(job::JobCommands::Retry { step: 3, force: true, .. })
        ));
    }

    #[test]
    fn test_batch_count_out_of_range_is_rejected() {
        for count in ["0", "51"] {
            let parsed = Cli::try_parse_from(["gamefactory", "batch", "create", "--count", count]);
            assert!(parsed.is_err(), "count {} accepted", count);
        }
        assert!(Cli::try_parse_from(["gamefactory", "batch", "create", "--count", "50"]).is_ok());
    }
}
