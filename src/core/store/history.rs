//! Similarity checks and regeneration logs.

use anyhow::{Context, Result};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::domain::{RegenerationLog, SimilarityCheck};

use super::{enum_col, json_col, opt_uuid_col, to_json, ts, ts_col, uuid_col, Store};

const CHECK_COLUMNS: &str = "id, job_id, attempt_number, score, breakdown, most_similar_job_id, \
     is_similar, triggered_regeneration, candidate, candidate_mechanics, created_at";

const REGEN_COLUMNS: &str = "id, job_id, batch_id, attempt_number, reason, score, \
     similar_to_job_id, constraints_applied, outcome, created_at";

impl Store {
    /// Record one generation attempt and, when it was rejected or exhausted,
    /// its regeneration log, atomically
    pub async fn record_attempt(
        &self,
        check: &SimilarityCheck,
        regeneration: Option<&RegenerationLog>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO similarity_checks (id, job_id, attempt_number, score, breakdown,
                most_similar_job_id, is_similar, triggered_regeneration, candidate,
                candidate_mechanics, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                check.id.to_string(),
                check.job_id.to_string(),
                check.attempt_number,
                check.score,
                to_json(&check.breakdown)?,
                check.most_similar_job_id.map(|id| id.to_string()),
                check.is_similar,
                check.triggered_regeneration,
                to_json(&check.candidate)?,
                to_json(&check.candidate_mechanics)?,
                ts(&check.created_at),
            ],
        )
        .with_context(|| format!("Failed to record similarity check {}", check.attempt_number))?;

        if let Some(log) = regeneration {
            tx.execute(
                "INSERT INTO regeneration_logs (id, job_id, batch_id, attempt_number, reason, score,
                    similar_to_job_id, constraints_applied, outcome, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    log.id.to_string(),
                    log.job_id.to_string(),
                    log.batch_id.map(|id| id.to_string()),
                    log.attempt_number,
                    log.reason,
                    log.score,
                    log.similar_to_job_id.map(|id| id.to_string()),
                    to_json(&log.constraints_applied)?,
                    log.outcome.as_str(),
                    ts(&log.created_at),
                ],
            )
            .context("Failed to record regeneration log")?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Similarity checks for a job, by attempt
    pub async fn similarity_checks(&self, job_id: Uuid) -> Result<Vec<SimilarityCheck>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM similarity_checks WHERE job_id = ?1 ORDER BY attempt_number",
            CHECK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([job_id.to_string()], check_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Regeneration logs for a job, by attempt
    pub async fn regeneration_logs(&self, job_id: Uuid) -> Result<Vec<RegenerationLog>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM regeneration_logs WHERE job_id = ?1 ORDER BY attempt_number",
            REGEN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([job_id.to_string()], regeneration_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent regenerations across all jobs
    pub async fn recent_regenerations(&self, limit: usize) -> Result<Vec<RegenerationLog>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM regeneration_logs ORDER BY created_at DESC LIMIT ?1",
            REGEN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], regeneration_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn check_from_row(row: &Row) -> rusqlite::Result<SimilarityCheck> {
    Ok(SimilarityCheck {
        id: uuid_col(row, 0)?,
        job_id: uuid_col(row, 1)?,
        attempt_number: row.get(2)?,
        score: row.get(3)?,
        breakdown: json_col(row, 4)?,
        most_similar_job_id: opt_uuid_col(row, 5)?,
        is_similar: row.get(6)?,
        triggered_regeneration: row.get(7)?,
        candidate: json_col(row, 8)?,
        candidate_mechanics: json_col(row, 9)?,
        created_at: ts_col(row, 10)?,
    })
}

fn regeneration_from_row(row: &Row) -> rusqlite::Result<RegenerationLog> {
    Ok(RegenerationLog {
        id: uuid_col(row, 0)?,
        job_id: uuid_col(row, 1)?,
        batch_id: opt_uuid_col(row, 2)?,
        attempt_number: row.get(3)?,
        reason: row.get(4)?,
        score: row.get(5)?,
        similar_to_job_id: opt_uuid_col(row, 6)?,
        constraints_applied: json_col(row, 7)?,
        outcome: enum_col(row, 8)?,
        created_at: ts_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::history::REASON_SIMILARITY_EXCEEDED;
    use crate::domain::{Job, RegenerationOutcome};

    fn check(job_id: Uuid, attempt: u32) -> SimilarityCheck {
        SimilarityCheck {
            id: Uuid::new_v4(),
            job_id,
            attempt_number: attempt,
            score: 0.9,
            breakdown: BTreeMap::from([("genre".to_string(), 1.0)]),
            most_similar_job_id: Some(Uuid::new_v4()),
            is_similar: true,
            triggered_regeneration: true,
            candidate: json!({"game_name": "Copycat"}),
            candidate_mechanics: vec!["tile_swap".into()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_attempt_and_log_are_stored_together() {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Copycat".into(), "puzzle".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();

        let first = check(job.id, 1);
        let log = RegenerationLog {
            id: Uuid::new_v4(),
            job_id: job.id,
            batch_id: None,
            attempt_number: 1,
            reason: REASON_SIMILARITY_EXCEEDED.into(),
            score: first.score,
            similar_to_job_id: first.most_similar_job_id,
            constraints_applied: json!({"excluded_mechanics": ["tile_swap"]}),
            outcome: RegenerationOutcome::Regenerated,
            created_at: Utc::now(),
        };
        store.record_attempt(&first, Some(&log)).await.unwrap();

        let checks = store.similarity_checks(job.id).await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].breakdown["genre"], 1.0);

        let logs = store.regeneration_logs(job.id).await.unwrap();
        assert_eq!(logs[0].outcome, RegenerationOutcome::Regenerated);
        assert_eq!(store.recent_regenerations(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_attempt_number_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Twice".into(), "puzzle".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();

        store.record_attempt(&check(job.id, 1), None).await.unwrap();
        assert!(store.record_attempt(&check(job.id, 1), None).await.is_err());
        assert!(store.record_attempt(&check(job.id, 6), None).await.is_err());
    }
}
