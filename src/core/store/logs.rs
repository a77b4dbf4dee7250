//! Append-only generation log.
//!
//! Rows are never updated. Replay order is insertion order.

use anyhow::{Context, Result};
use rusqlite::{params, Row};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{Event, StepNumber};

use super::{enum_col, opt_uuid_col, ts, ts_col, uuid_col, Store};

const EVENT_COLUMNS: &str = "id, job_id, batch_id, step_number, event_type, idempotency_key, \
     message, status, duration_ms, error, created_at";

impl Store {
    /// Append an event to the log
    pub async fn append_event(&self, event: &Event) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO generation_logs (id, job_id, batch_id, step_number, event_type, level,
                idempotency_key, message, status, duration_ms, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id.to_string(),
                event.job_id.to_string(),
                event.batch_id.map(|id| id.to_string()),
                event.step.map(|s| s.number()),
                event.event_type.as_str(),
                event.level().as_str(),
                event.idempotency_key,
                event.message,
                event.status.as_str(),
                event.duration_ms.map(|d| d as i64),
                event.error,
                ts(&event.timestamp),
            ],
        )
        .context("Failed to append event")?;
        Ok(())
    }

    /// Replay a job's events in order
    pub async fn job_events(&self, job_id: Uuid) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM generation_logs WHERE job_id = ?1 ORDER BY seq",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([job_id.to_string()], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Replay the events of every job in a batch, in order
    pub async fn batch_events(&self, batch_id: Uuid) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM generation_logs WHERE batch_id = ?1 ORDER BY seq",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([batch_id.to_string()], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let step: Option<u8> = row.get(3)?;
    let step = step
        .map(StepNumber::try_from)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Integer, e.into()))?;
    let duration_ms: Option<i64> = row.get(8)?;

    Ok(Event {
        id: uuid_col(row, 0)?,
        timestamp: ts_col(row, 10)?,
        job_id: uuid_col(row, 1)?,
        batch_id: opt_uuid_col(row, 2)?,
        step,
        event_type: enum_col(row, 4)?,
        idempotency_key: row.get(5)?,
        message: row.get(6)?,
        status: enum_col(row, 7)?,
        duration_ms: duration_ms.map(|d| d as u64),
        error: row.get(9)?,
    })
}

/// Generate an idempotency key for one step of a job
pub fn generate_idempotency_key(job_id: Uuid, step_name: &str, input: &str) -> String {
    format!("{}:{}:{}", job_id, step_name, hash_input(input))
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, Job, StepStatus};

    #[tokio::test]
    async fn test_events_replay_in_append_order() {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Neon Dash".into(), "runner".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();

        for step in StepNumber::ALL.iter().take(5) {
            let event = Event::new(
                job.id,
                Some(*step),
                EventType::StepStarted,
                generate_idempotency_key(job.id, step.name(), "{}"),
                format!("Starting {}", step.name()),
                StepStatus::Running,
            );
            store.append_event(&event).await.unwrap();
        }

        let events = store.job_events(job.id).await.unwrap();
        assert_eq!(events.len(), 5);
        for (idx, event) in events.iter().enumerate() {
            assert_eq!(event.step, Some(StepNumber::ALL[idx]));
            assert_eq!(event.event_type, EventType::StepStarted);
        }
    }

    #[tokio::test]
    async fn test_batch_events_filter_by_batch() {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Loner".into(), "casual".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();

        let event = Event::new(
            job.id,
            None,
            EventType::JobCreated,
            format!("{}:create", job.id),
            "Job created".into(),
            StepStatus::Pending,
        );
        store.append_event(&event).await.unwrap();

        assert!(store.batch_events(Uuid::new_v4()).await.unwrap().is_empty());
        let stored = store.job_events(job.id).await.unwrap();
        assert_eq!(stored[0].step, None);
        assert_eq!(stored[0].duration_ms, None);
    }

    #[test]
    fn test_idempotency_key_format() {
        let job_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = generate_idempotency_key(job_id, "architecture", "{\"genre\":\"puzzle\"}");

        assert!(key.starts_with("550e8400-e29b-41d4-a716-446655440000:architecture:"));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_input_hash_consistency() {
        assert_eq!(hash_input("same"), hash_input("same"));
        assert_ne!(hash_input("same"), hash_input("other"));
    }
}
