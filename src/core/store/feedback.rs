//! Learning weights, stored metrics and raw analytics events.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::domain::feedback::NEUTRAL_WEIGHT;
use crate::domain::{
    AnalyticsEvent, Artifacts, Constraint, FeedbackApplication, LearningWeight,
    PerformanceMetrics, WeightSummary,
};

use super::{json_col, to_json, ts, ts_col, uuid_col, Store};

const WEIGHT_COLUMNS: &str = "mechanic_name, genre, weight, sample_count, avg_retention, \
     avg_completion, avg_ad_opt_in, updated_at";

impl Store {
    /// Apply one job's feedback to the weight table.
    ///
    /// Guarded by `feedback_applications`: a second call for the same job
    /// changes nothing and returns `None`.
    pub async fn apply_feedback(
        &self,
        application: &FeedbackApplication,
    ) -> Result<Option<Vec<LearningWeight>>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO feedback_applications (job_id, score, adjustment, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                application.job_id.to_string(),
                application.score,
                application.adjustment,
                ts(&now)
            ],
        )?;
        if inserted == 0 {
            debug!(job_id = %application.job_id, "Feedback already applied");
            return Ok(None);
        }

        let metrics = &application.metrics;
        let mut updated = Vec::with_capacity(application.targets.len());
        for target in &application.targets {
            let sql = format!(
                "SELECT {} FROM learning_weights WHERE mechanic_name = ?1 AND genre = ?2",
                WEIGHT_COLUMNS
            );
            let existing = tx
                .query_row(
                    &sql,
                    params![target.mechanic_name, application.genre],
                    weight_from_row,
                )
                .optional()?;

            let weight = match existing {
                Some(current) => {
                    let n = f64::from(current.sample_count);
                    let rolling = |avg: f64, sample: f64| (avg * n + sample) / (n + 1.0);
                    LearningWeight {
                        weight: target.bounds.clamp(current.weight + application.adjustment),
                        sample_count: current.sample_count + 1,
                        avg_retention: rolling(current.avg_retention, metrics.retention_proxy),
                        avg_completion: rolling(current.avg_completion, metrics.completion_rate),
                        avg_ad_opt_in: rolling(current.avg_ad_opt_in, metrics.ad_opt_in_rate),
                        updated_at: now,
                        ..current
                    }
                }
                None => LearningWeight {
                    mechanic_name: target.mechanic_name.clone(),
                    genre: application.genre.clone(),
                    weight: target.bounds.clamp(NEUTRAL_WEIGHT + application.adjustment),
                    sample_count: 1,
                    avg_retention: metrics.retention_proxy,
                    avg_completion: metrics.completion_rate,
                    avg_ad_opt_in: metrics.ad_opt_in_rate,
                    updated_at: now,
                },
            };

            tx.execute(
                "INSERT INTO learning_weights (mechanic_name, genre, weight, sample_count,
                    avg_retention, avg_completion, avg_ad_opt_in, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (mechanic_name, genre) DO UPDATE SET
                    weight = excluded.weight,
                    sample_count = excluded.sample_count,
                    avg_retention = excluded.avg_retention,
                    avg_completion = excluded.avg_completion,
                    avg_ad_opt_in = excluded.avg_ad_opt_in,
                    updated_at = excluded.updated_at",
                params![
                    weight.mechanic_name,
                    weight.genre,
                    weight.weight,
                    weight.sample_count,
                    weight.avg_retention,
                    weight.avg_completion,
                    weight.avg_ad_opt_in,
                    ts(&weight.updated_at),
                ],
            )?;
            updated.push(weight);
        }

        tx.execute(
            "INSERT INTO game_metrics (job_id, metrics, score, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (job_id) DO UPDATE SET
                metrics = excluded.metrics, score = excluded.score, recorded_at = excluded.recorded_at",
            params![
                application.job_id.to_string(),
                to_json(metrics)?,
                application.score,
                ts(&now)
            ],
        )?;

        tx.commit().context("Failed to commit feedback")?;
        Ok(Some(updated))
    }

    /// Weight rows, optionally for one genre, heaviest first
    pub async fn list_weights(&self, genre: Option<&str>) -> Result<Vec<LearningWeight>> {
        let conn = self.conn.lock().await;
        let mut stmt;
        let rows = match genre {
            Some(genre) => {
                let sql = format!(
                    "SELECT {} FROM learning_weights WHERE genre = ?1
                     ORDER BY weight DESC, mechanic_name",
                    WEIGHT_COLUMNS
                );
                stmt = conn.prepare(&sql)?;
                stmt.query_map([genre], weight_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM learning_weights ORDER BY genre, weight DESC, mechanic_name",
                    WEIGHT_COLUMNS
                );
                stmt = conn.prepare(&sql)?;
                stmt.query_map([], weight_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    /// Per-genre roll-up of the weight table
    pub async fn weight_summaries(&self) -> Result<Vec<WeightSummary>> {
        let weights = self.list_weights(None).await?;
        let mut by_genre: BTreeMap<String, Vec<LearningWeight>> = BTreeMap::new();
        for weight in weights {
            by_genre.entry(weight.genre.clone()).or_default().push(weight);
        }

        Ok(by_genre
            .into_iter()
            .map(|(genre, rows)| {
                let genre_weight = rows.iter().find(|w| w.is_genre_row()).map(|w| w.weight);
                let mechanics: Vec<&LearningWeight> =
                    rows.iter().filter(|w| !w.is_genre_row()).collect();
                let average_weight = if mechanics.is_empty() {
                    0.0
                } else {
                    mechanics.iter().map(|w| w.weight).sum::<f64>() / mechanics.len() as f64
                };
                WeightSummary {
                    genre,
                    mechanics: mechanics.len(),
                    average_weight,
                    total_samples: mechanics.iter().map(|w| u64::from(w.sample_count)).sum(),
                    genre_weight,
                }
            })
            .collect())
    }

    /// Stored metrics and score for a job, if feedback ran
    pub async fn game_metrics(&self, job_id: Uuid) -> Result<Option<(PerformanceMetrics, f64)>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT metrics, score FROM game_metrics WHERE job_id = ?1",
                [job_id.to_string()],
                |row| Ok((json_col(row, 0)?, row.get(1)?)),
            )
            .optional()?)
    }

    pub async fn insert_analytics_event(&self, event: &AnalyticsEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO analytics_events (id, job_id, event_name, level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.job_id.to_string(),
                event.event_name,
                event.level,
                ts(&event.created_at)
            ],
        )
        .context("Failed to record analytics event")?;
        Ok(())
    }

    pub async fn analytics_events(&self, job_id: Uuid) -> Result<Vec<AnalyticsEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_name, level, created_at FROM analytics_events
             WHERE job_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([job_id.to_string()], |row| {
            Ok(AnalyticsEvent {
                id: uuid_col(row, 0)?,
                job_id: uuid_col(row, 1)?,
                event_name: row.get(2)?,
                level: row.get(3)?,
                created_at: ts_col(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// `next_batch_constraints` of every completed post-launch step in a
    /// batch, oldest first
    pub async fn batch_feedback_constraints(&self, batch_id: Uuid) -> Result<Vec<Vec<Constraint>>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.artifacts FROM steps s JOIN jobs j ON j.id = s.job_id
             WHERE j.batch_id = ?1 AND s.step_number = 12 AND s.status = 'completed'
             ORDER BY s.completed_at",
        )?;
        let rows = stmt.query_map([batch_id.to_string()], |row| json_col::<Artifacts>(row, 0))?;

        let mut lists = Vec::new();
        for artifacts in rows {
            let artifacts = artifacts?;
            if let Some(value) = artifacts.get("next_batch_constraints") {
                let constraints: Vec<Constraint> = serde_json::from_value(value.clone())
                    .context("Malformed next_batch_constraints artifact")?;
                lists.push(constraints);
            }
        }
        Ok(lists)
    }
}

fn weight_from_row(row: &Row) -> rusqlite::Result<LearningWeight> {
    Ok(LearningWeight {
        mechanic_name: row.get(0)?,
        genre: row.get(1)?,
        weight: row.get(2)?,
        sample_count: row.get(3)?,
        avg_retention: row.get(4)?,
        avg_completion: row.get(5)?,
        avg_ad_opt_in: row.get(6)?,
        updated_at: ts_col(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::feedback::{genre_weight_name, GENRE_WEIGHT_BOUNDS, MECHANIC_WEIGHT_BOUNDS};
    use crate::domain::{Job, WeightTarget};

    async fn setup() -> (Store, Job) {
        let store = Store::open_in_memory().await.unwrap();
        let job = Job::new("Block Drop".into(), "puzzle".into(), None, Vec::new());
        store.create_job(&job, 3).await.unwrap();
        (store, job)
    }

    fn application(job_id: Uuid, adjustment: f64) -> FeedbackApplication {
        FeedbackApplication {
            job_id,
            genre: "puzzle".into(),
            targets: vec![
                WeightTarget {
                    mechanic_name: "tile_swap".into(),
                    bounds: MECHANIC_WEIGHT_BOUNDS,
                },
                WeightTarget {
                    mechanic_name: genre_weight_name("puzzle"),
                    bounds: GENRE_WEIGHT_BOUNDS,
                },
            ],
            adjustment,
            score: 80.0,
            metrics: PerformanceMetrics {
                completion_rate: 1.0,
                retention_proxy: 1.0,
                ad_opt_in_rate: 0.33,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_feedback_applies_once_per_job() {
        let (store, job) = setup().await;

        let first = store.apply_feedback(&application(job.id, 0.1)).await.unwrap();
        let weights = first.expect("first application updates weights");
        assert!((weights[0].weight - 1.1).abs() < 1e-9);
        assert_eq!(weights[0].sample_count, 1);

        let second = store.apply_feedback(&application(job.id, 0.1)).await.unwrap();
        assert!(second.is_none());

        let stored = store.list_weights(Some("puzzle")).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|w| w.sample_count == 1));
        assert!(store.game_metrics(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rolling_averages_across_jobs() {
        let (store, first) = setup().await;
        let second = Job::new("Block Drop 2".into(), "puzzle".into(), None, Vec::new());
        store.create_job(&second, 3).await.unwrap();

        store.apply_feedback(&application(first.id, 0.1)).await.unwrap();
        let mut low = application(second.id, -0.05);
        low.metrics.completion_rate = 0.0;
        store.apply_feedback(&low).await.unwrap();

        let weights = store.list_weights(Some("puzzle")).await.unwrap();
        let tile = weights.iter().find(|w| w.mechanic_name == "tile_swap").unwrap();
        assert_eq!(tile.sample_count, 2);
        assert!((tile.avg_completion - 0.5).abs() < 1e-9);
        assert!((tile.weight - 1.05).abs() < 1e-9);

        let summaries = store.weight_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].mechanics, 1);
        assert_eq!(summaries[0].total_samples, 2);
        assert!(summaries[0].genre_weight.is_some());
    }
}
