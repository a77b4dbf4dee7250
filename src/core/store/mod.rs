//! Durable SQLite store for jobs, steps, history and learning state.
//!
//! One shared connection guarded by an async mutex. Every multi-row
//! mutation runs in a single transaction, so a step's completion and the
//! job's progress commit together or not at all.

mod feedback;
mod history;
mod logs;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    Artifacts, Batch, BatchStatus, Constraint, Job, JobStatus, StepNumber, StepRecord,
    StepStatus, Validation,
};

use super::workflow::RetryPolicy;

pub use logs::{generate_idempotency_key, hash_input};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    game_count INTEGER NOT NULL,
    genre_mix TEXT NOT NULL,
    constraints TEXT NOT NULL,
    inherited_from TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    batch_id TEXT REFERENCES batches(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    genre TEXT NOT NULL,
    status TEXT NOT NULL,
    current_step INTEGER NOT NULL DEFAULT 0 CHECK (current_step BETWEEN 0 AND 12),
    spec TEXT,
    selected_mechanics TEXT NOT NULL DEFAULT '[]',
    constraints TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_batch ON jobs(batch_id);

CREATE TABLE IF NOT EXISTS steps (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    step_number INTEGER NOT NULL CHECK (step_number BETWEEN 1 AND 12),
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    artifacts TEXT NOT NULL DEFAULT '{}',
    validation TEXT,
    error_message TEXT,
    logs TEXT,
    started_at TEXT,
    completed_at TEXT,
    PRIMARY KEY (job_id, step_number)
);

CREATE TABLE IF NOT EXISTS similarity_checks (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    attempt_number INTEGER NOT NULL CHECK (attempt_number BETWEEN 1 AND 5),
    score REAL NOT NULL,
    breakdown TEXT NOT NULL,
    most_similar_job_id TEXT,
    is_similar INTEGER NOT NULL,
    triggered_regeneration INTEGER NOT NULL,
    candidate TEXT NOT NULL,
    candidate_mechanics TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (job_id, attempt_number)
);

CREATE TABLE IF NOT EXISTS regeneration_logs (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    batch_id TEXT,
    attempt_number INTEGER NOT NULL,
    reason TEXT NOT NULL,
    score REAL NOT NULL,
    similar_to_job_id TEXT,
    constraints_applied TEXT NOT NULL,
    outcome TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (job_id, attempt_number)
);

CREATE TABLE IF NOT EXISTS learning_weights (
    mechanic_name TEXT NOT NULL,
    genre TEXT NOT NULL,
    weight REAL NOT NULL,
    sample_count INTEGER NOT NULL DEFAULT 0,
    avg_retention REAL NOT NULL DEFAULT 0,
    avg_completion REAL NOT NULL DEFAULT 0,
    avg_ad_opt_in REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (mechanic_name, genre)
);

CREATE TABLE IF NOT EXISTS feedback_applications (
    job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    score REAL NOT NULL,
    adjustment REAL NOT NULL,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS game_metrics (
    job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    metrics TEXT NOT NULL,
    score REAL NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analytics_events (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    event_name TEXT NOT NULL,
    level INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analytics_job ON analytics_events(job_id);

CREATE TABLE IF NOT EXISTS generation_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    batch_id TEXT,
    step_number INTEGER,
    event_type TEXT NOT NULL,
    level TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    message TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER,
    error TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_job ON generation_logs(job_id);
CREATE INDEX IF NOT EXISTS idx_logs_batch ON generation_logs(batch_id);
"#;

const JOB_COLUMNS: &str = "id, batch_id, name, genre, status, current_step, spec, \
     selected_mechanics, constraints, created_at, updated_at, completed_at";

const STEP_COLUMNS: &str = "job_id, step_number, status, retry_count, max_retries, artifacts, \
     validation, error_message, logs, started_at, completed_at";

const BATCH_COLUMNS: &str = "id, name, status, game_count, genre_mix, constraints, \
     inherited_from, created_at, started_at, completed_at";

/// Result of trying to mark a step running
#[derive(Debug, Clone)]
pub enum Claim {
    /// The step is now running and owned by the caller
    Claimed(StepRecord),

    /// The step already completed (duplicate delivery)
    AlreadyCompleted,

    /// Another step of the job is running
    Busy { running: StepNumber },

    /// No such job
    JobMissing,
}

/// Everything persisted when a step succeeds
#[derive(Debug, Clone, Default)]
pub struct StepCompletion {
    pub artifacts: Artifacts,
    pub validation: Validation,
    pub logs: Option<String>,

    /// New design spec and mechanics for the job
    pub spec: Option<(Value, Vec<String>)>,
}

/// What the store did with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Step is pending again; the count is the new retry_count
    RetryScheduled { retry_count: u32 },

    /// Step and job are FAILED
    Failed { retry_count: u32 },
}

/// SQLite-backed store shared by every worker
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn)
    }

    /// Private in-memory store, used by tests and dry runs
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO batches (id, name, status, game_count, genre_mix, constraints,
                inherited_from, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                batch.id.to_string(),
                batch.name,
                batch.status.as_str(),
                batch.game_count,
                to_json(&batch.genre_mix)?,
                to_json(&batch.constraints)?,
                batch.inherited_from.map(|id| id.to_string()),
                ts(&batch.created_at),
                batch.started_at.as_ref().map(ts),
                batch.completed_at.as_ref().map(ts),
            ],
        )
        .context("Failed to insert batch")?;
        Ok(())
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS);
        Ok(conn
            .query_row(&sql, [batch_id.to_string()], batch_from_row)
            .optional()?)
    }

    pub async fn list_batches(&self, limit: usize) -> Result<Vec<Batch>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM batches ORDER BY created_at DESC LIMIT ?1",
            BATCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], batch_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn set_batch_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = ts(&Utc::now());
        conn.execute(
            "UPDATE batches SET status = ?2,
                started_at = CASE WHEN ?2 = 'running' AND started_at IS NULL THEN ?3 ELSE started_at END,
                completed_at = CASE WHEN ?2 IN ('completed', 'cancelled') THEN ?3 ELSE completed_at END
             WHERE id = ?1",
            params![batch_id.to_string(), status.as_str(), now],
        )?;
        Ok(())
    }

    /// Mark a running batch completed once every job in it is terminal
    pub async fn refresh_batch_status(&self, batch_id: Uuid) -> Result<Option<BatchStatus>> {
        let conn = self.conn.lock().await;
        let open_jobs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE batch_id = ?1
                AND status NOT IN ('completed', 'failed', 'cancelled', 'published')",
            [batch_id.to_string()],
            |row| row.get(0),
        )?;
        if open_jobs == 0 {
            conn.execute(
                "UPDATE batches SET status = 'completed', completed_at = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![batch_id.to_string(), ts(&Utc::now())],
            )?;
        }
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM batches WHERE id = ?1",
                [batch_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        status
            .map(|s| BatchStatus::from_str(&s).map_err(anyhow::Error::msg))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Insert a job and pre-materialize its twelve step rows
    pub async fn create_job(&self, job: &Job, max_retries: u32) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, batch_id, name, genre, status, current_step, spec,
                selected_mechanics, constraints, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id.to_string(),
                job.batch_id.map(|id| id.to_string()),
                job.name,
                job.genre,
                job.status.as_str(),
                job.current_step,
                job.spec.as_ref().map(to_json).transpose()?,
                to_json(&job.selected_mechanics)?,
                to_json(&job.constraints)?,
                ts(&job.created_at),
                ts(&job.updated_at),
                job.completed_at.as_ref().map(ts),
            ],
        )
        .context("Failed to insert job")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO steps (job_id, step_number, status, retry_count, max_retries)
                 VALUES (?1, ?2, 'pending', 0, ?3)",
            )?;
            for step in StepNumber::ALL {
                stmt.execute(params![job.id.to_string(), step.number(), max_retries])?;
            }
        }
        tx.commit()?;
        debug!(job_id = %job.id, "Job and steps created");
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock().await;
        query_job(&conn, job_id)
    }

    /// Jobs, newest first, optionally limited to one batch
    pub async fn list_jobs(&self, batch_id: Option<Uuid>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().await;
        let (sql, arg) = match batch_id {
            Some(id) => (
                format!(
                    "SELECT {} FROM jobs WHERE batch_id = ?1 ORDER BY created_at, name",
                    JOB_COLUMNS
                ),
                Some(id.to_string()),
            ),
            None => (
                format!("SELECT {} FROM jobs ORDER BY created_at DESC", JOB_COLUMNS),
                None,
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = match arg {
            Some(arg) => stmt.query_map([arg], job_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], job_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    /// Write a design spec outside of step completion
    pub async fn set_job_spec(&self, job_id: Uuid, spec: &Value, mechanics: &[String]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET spec = ?2, selected_mechanics = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                job_id.to_string(),
                to_json(spec)?,
                to_json(&mechanics)?,
                ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![job_id.to_string(), status.as_str(), ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Cancel a job unless it already finished; returns whether it changed
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?2
             WHERE id = ?1 AND status NOT IN ('completed', 'published', 'cancelled')",
            params![job_id.to_string(), ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Delete a job; its steps and history go with it
    pub async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", [job_id.to_string()])?;
        Ok(changed > 0)
    }

    /// Jobs other than `exclude` whose designs take part in similarity checks
    pub async fn comparable_jobs(&self, exclude: Uuid) -> Result<Vec<Job>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM jobs WHERE id != ?1 AND spec IS NOT NULL
                AND status IN ('created', 'in_progress', 'completed', 'published')",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([exclude.to_string()], job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    pub async fn get_step(&self, job_id: Uuid, step: StepNumber) -> Result<Option<StepRecord>> {
        let conn = self.conn.lock().await;
        query_step(&conn, job_id, step)
    }

    pub async fn list_steps(&self, job_id: Uuid) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM steps WHERE job_id = ?1 ORDER BY step_number",
            STEP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([job_id.to_string()], step_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Artifacts of every completed step, merged in step order
    pub async fn completed_artifacts(&self, job_id: Uuid) -> Result<Artifacts> {
        let mut merged = Artifacts::new();
        for record in self.list_steps(job_id).await? {
            if record.status == StepStatus::Completed {
                merged.extend(&record.artifacts);
            }
        }
        Ok(merged)
    }

    /// Mark `step` running.
    ///
    /// Enforces at most one running step per job. A running step older than
    /// `stale_after` is assumed abandoned by a dead worker and reset first.
    pub async fn claim_step(
        &self,
        job_id: Uuid,
        step: StepNumber,
        stale_after: Duration,
    ) -> Result<Claim> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now();

        if query_job(&tx, job_id)?.is_none() {
            return Ok(Claim::JobMissing);
        }

        let running: Vec<(u8, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT step_number, started_at FROM steps WHERE job_id = ?1 AND status = 'running'",
            )?;
            let rows = stmt.query_map([job_id.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let stale_cutoff = now - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        for (number, started_at) in running {
            let started = started_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            let is_stale = started.map(|t| t.with_timezone(&Utc) < stale_cutoff).unwrap_or(true);
            let running_step = StepNumber::try_from(number)?;
            if !is_stale {
                return Ok(Claim::Busy { running: running_step });
            }
            warn!(%job_id, step = number, "Reclaiming stale running step");
            tx.execute(
                "UPDATE steps SET status = 'pending', error_message = 'worker lost while running'
                 WHERE job_id = ?1 AND step_number = ?2",
                params![job_id.to_string(), number],
            )?;
        }

        let status: String = tx.query_row(
            "SELECT status FROM steps WHERE job_id = ?1 AND step_number = ?2",
            params![job_id.to_string(), step.number()],
            |row| row.get(0),
        )?;
        if status == StepStatus::Completed.as_str() {
            tx.commit()?;
            return Ok(Claim::AlreadyCompleted);
        }

        tx.execute(
            "UPDATE steps SET status = 'running', started_at = ?3, completed_at = NULL
             WHERE job_id = ?1 AND step_number = ?2",
            params![job_id.to_string(), step.number(), ts(&now)],
        )?;
        tx.execute(
            "UPDATE jobs SET status = 'in_progress', updated_at = ?2
             WHERE id = ?1 AND status = 'created'",
            params![job_id.to_string(), ts(&now)],
        )?;
        let record = query_step(&tx, job_id, step)?
            .context("Step row disappeared while claiming")?;
        tx.commit()?;
        Ok(Claim::Claimed(record))
    }

    /// Commit a successful step and advance the job's progress.
    ///
    /// Returns `false` (and changes nothing) when the job is no longer at
    /// `step - 1`, was cancelled or failed meanwhile, or the step is not
    /// running.
    pub async fn complete_step(
        &self,
        job_id: Uuid,
        step: StepNumber,
        completion: &StepCompletion,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = ts(&Utc::now());
        let (spec, mechanics) = match &completion.spec {
            Some((spec, mechanics)) => (Some(to_json(spec)?), Some(to_json(mechanics)?)),
            None => (None, None),
        };

        let job_rows = tx.execute(
            "UPDATE jobs SET
                current_step = ?2,
                status = CASE WHEN ?2 = 12 THEN 'completed' ELSE 'in_progress' END,
                completed_at = CASE WHEN ?2 = 12 THEN ?3 ELSE completed_at END,
                spec = COALESCE(?4, spec),
                selected_mechanics = COALESCE(?5, selected_mechanics),
                updated_at = ?3
             WHERE id = ?1 AND current_step = ?2 - 1 AND status IN ('created', 'in_progress')",
            params![job_id.to_string(), step.number(), now, spec, mechanics],
        )?;
        if job_rows == 0 {
            return Ok(false);
        }

        let step_rows = tx.execute(
            "UPDATE steps SET status = 'completed', artifacts = ?3, validation = ?4, logs = ?5,
                error_message = NULL, completed_at = ?6
             WHERE job_id = ?1 AND step_number = ?2 AND status = 'running'",
            params![
                job_id.to_string(),
                step.number(),
                to_json(&completion.artifacts)?,
                to_json(&completion.validation)?,
                completion.logs,
                now,
            ],
        )?;
        if step_rows == 0 {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Record a failed attempt.
    ///
    /// Retryable failures bump `retry_count`; the step goes back to pending
    /// while the policy allows, otherwise step and job become FAILED.
    /// Non-retryable failures fail both immediately.
    pub async fn fail_attempt(
        &self,
        job_id: Uuid,
        step: StepNumber,
        error: &str,
        validation: Option<&Validation>,
        retryable: bool,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = ts(&Utc::now());

        let (retry_count, max_retries): (u32, u32) = tx.query_row(
            "SELECT retry_count, max_retries FROM steps WHERE job_id = ?1 AND step_number = ?2",
            params![job_id.to_string(), step.number()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let validation = validation.map(to_json).transpose()?;

        let outcome = if retryable {
            let retry_count = retry_count + 1;
            if policy.should_retry(retry_count, max_retries) {
                FailureOutcome::RetryScheduled { retry_count }
            } else {
                FailureOutcome::Failed { retry_count }
            }
        } else {
            FailureOutcome::Failed { retry_count }
        };

        let (status, count) = match outcome {
            FailureOutcome::RetryScheduled { retry_count } => (StepStatus::Pending, retry_count),
            FailureOutcome::Failed { retry_count } => (StepStatus::Failed, retry_count),
        };
        tx.execute(
            "UPDATE steps SET status = ?3, retry_count = ?4, error_message = ?5,
                validation = COALESCE(?6, validation)
             WHERE job_id = ?1 AND step_number = ?2",
            params![job_id.to_string(), step.number(), status.as_str(), count, error, validation],
        )?;
        if status == StepStatus::Failed {
            tx.execute(
                "UPDATE jobs SET status = 'failed', updated_at = ?2
                 WHERE id = ?1 AND status IN ('created', 'in_progress')",
                params![job_id.to_string(), now],
            )?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Return a running step to pending without counting an attempt
    pub async fn release_step(&self, job_id: Uuid, step: StepNumber) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE steps SET status = 'pending' WHERE job_id = ?1 AND step_number = ?2 AND status = 'running'",
            params![job_id.to_string(), step.number()],
        )?;
        Ok(())
    }

    /// Reset a step for a manual retry and reopen a failed job
    pub async fn reset_step(&self, job_id: Uuid, step: StepNumber) -> Result<StepRecord> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = ts(&Utc::now());
        tx.execute(
            "UPDATE steps SET status = 'pending', retry_count = retry_count + 1,
                error_message = NULL, started_at = NULL, completed_at = NULL
             WHERE job_id = ?1 AND step_number = ?2",
            params![job_id.to_string(), step.number()],
        )?;
        tx.execute(
            "UPDATE jobs SET status = 'in_progress', updated_at = ?2 WHERE id = ?1 AND status = 'failed'",
            params![job_id.to_string(), now],
        )?;
        let record = query_step(&tx, job_id, step)?
            .with_context(|| format!("Step {} not found for job {}", step, job_id))?;
        tx.commit()?;
        Ok(record)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn query_job(conn: &Connection, job_id: Uuid) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    Ok(conn
        .query_row(&sql, [job_id.to_string()], job_from_row)
        .optional()?)
}

fn query_step(conn: &Connection, job_id: Uuid, step: StepNumber) -> Result<Option<StepRecord>> {
    let sql = format!(
        "SELECT {} FROM steps WHERE job_id = ?1 AND step_number = ?2",
        STEP_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![job_id.to_string(), step.number()], step_from_row)
        .optional()?)
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_col(row, 0)?,
        batch_id: opt_uuid_col(row, 1)?,
        name: row.get(2)?,
        genre: row.get(3)?,
        status: enum_col(row, 4)?,
        current_step: row.get(5)?,
        spec: opt_json_col(row, 6)?,
        selected_mechanics: json_col(row, 7)?,
        constraints: json_col::<Vec<Constraint>>(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
        completed_at: opt_ts_col(row, 11)?,
    })
}

fn step_from_row(row: &Row) -> rusqlite::Result<StepRecord> {
    let number: u8 = row.get(1)?;
    Ok(StepRecord {
        job_id: uuid_col(row, 0)?,
        step: StepNumber::try_from(number).map_err(|e| conversion_error(1, e))?,
        status: enum_col(row, 2)?,
        retry_count: row.get(3)?,
        max_retries: row.get(4)?,
        artifacts: json_col(row, 5)?,
        validation: opt_json_col(row, 6)?,
        error_message: row.get(7)?,
        logs: row.get(8)?,
        started_at: opt_ts_col(row, 9)?,
        completed_at: opt_ts_col(row, 10)?,
    })
}

fn batch_from_row(row: &Row) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        status: enum_col(row, 2)?,
        game_count: row.get(3)?,
        genre_mix: json_col(row, 4)?,
        constraints: json_col(row, 5)?,
        inherited_from: opt_uuid_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        started_at: opt_ts_col(row, 8)?,
        completed_at: opt_ts_col(row, 9)?,
    })
}

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize column")
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub(crate) fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn enum_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_job() -> (Store, Job) {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Tile Storm".into(), "puzzle".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_job_creation_materializes_twelve_steps() {
        let (store, job) = store_with_job().await;

        let steps = store.list_steps(job.id).await.unwrap();
        assert_eq!(steps.len(), 12);
        for (idx, step) in steps.iter().enumerate() {
            assert_eq!(usize::from(step.step.number()), idx + 1);
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.max_retries, 3);
        }

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Tile Storm");
        assert_eq!(loaded.current_step, 0);
    }

    #[tokio::test]
    async fn test_single_running_step_per_job() {
        let (store, job) = store_with_job().await;
        let stale = Duration::from_secs(1800);

        let first = store.claim_step(job.id, StepNumber::PreProduction, stale).await.unwrap();
        assert!(matches!(first, Claim::Claimed(_)));

        let second = store.claim_step(job.id, StepNumber::PreProduction, stale).await.unwrap();
        assert!(matches!(
            second,
            Claim::Busy { running: StepNumber::PreProduction }
        ));

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_stale_running_step_is_reclaimed() {
        let (store, job) = store_with_job().await;
        store
            .claim_step(job.id, StepNumber::PreProduction, Duration::from_secs(1800))
            .await
            .unwrap();

        let claim = store
            .claim_step(job.id, StepNumber::PreProduction, Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(claim, Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn test_complete_step_requires_previous_progress() {
        let (store, job) = store_with_job().await;
        let stale = Duration::from_secs(1800);
        let completion = StepCompletion {
            artifacts: Artifacts::new().with("gdd_spec", serde_json::json!({"game_name": "x"})),
            validation: Validation::ok(),
            ..Default::default()
        };

        store.claim_step(job.id, StepNumber::ProjectSetup, stale).await.unwrap();
        let committed = store
            .complete_step(job.id, StepNumber::ProjectSetup, &completion)
            .await
            .unwrap();
        assert!(!committed, "step 2 cannot complete before step 1");
        store.release_step(job.id, StepNumber::ProjectSetup).await.unwrap();

        store.claim_step(job.id, StepNumber::PreProduction, stale).await.unwrap();
        assert!(store
            .complete_step(job.id, StepNumber::PreProduction, &completion)
            .await
            .unwrap());

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.current_step, 1);
        let artifacts = store.completed_artifacts(job.id).await.unwrap();
        assert!(artifacts.contains("gdd_spec"));
    }

    #[tokio::test]
    async fn test_fail_attempt_counts_until_exhausted() {
        let (store, job) = store_with_job().await;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let step = StepNumber::PreProduction;

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            store.claim_step(job.id, step, Duration::from_secs(60)).await.unwrap();
            outcomes.push(
                store
                    .fail_attempt(job.id, step, "boom", None, true, &policy)
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(
            outcomes,
            vec![
                FailureOutcome::RetryScheduled { retry_count: 1 },
                FailureOutcome::RetryScheduled { retry_count: 2 },
                FailureOutcome::Failed { retry_count: 3 },
            ]
        );
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_reset_step_reopens_failed_job() {
        let (store, job) = store_with_job().await;
        let policy = RetryPolicy::default();
        store
            .claim_step(job.id, StepNumber::PreProduction, Duration::from_secs(60))
            .await
            .unwrap();
        store
            .fail_attempt(job.id, StepNumber::PreProduction, "no executor", None, false, &policy)
            .await
            .unwrap();

        let record = store.reset_step(job.id, StepNumber::PreProduction).await.unwrap();
        assert_eq!(record.status, StepStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert!(record.error_message.is_none());

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_delete_job_cascades_to_steps() {
        let (store, job) = store_with_job().await;
        assert!(store.delete_job(job.id).await.unwrap());
        assert!(store.list_steps(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_does_not_touch_completed_jobs() {
        let (store, job) = store_with_job().await;
        store.set_job_status(job.id, JobStatus::Completed).await.unwrap();
        assert!(!store.cancel_job(job.id).await.unwrap());
    }
}
