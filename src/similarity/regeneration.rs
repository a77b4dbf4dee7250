//! Bounded regeneration loop run by pre-production.
//!
//! Every attempt is persisted before the next one starts, so a re-executed
//! step resumes where the previous execution stopped: an accepted design is
//! reused and rejected attempts keep their exclusions. A candidate that fails
//! the schema check is never recorded, so only valid designs are reused and
//! the next execution asks the generator again for the same attempt.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{ContentGenerator, GenerationRequest};
use crate::core::errors::StepError;
use crate::core::store::Store;
use crate::domain::history::REASON_SIMILARITY_EXCEEDED;
use crate::domain::{
    DesignSpec, Event, EventType, Job, RegenerationLog, RegenerationOutcome, SimilarityCheck,
    StepNumber, StepStatus, Validation,
};

use super::{Candidate, SimilarityEngine, MAX_REGENERATION_ATTEMPTS};

/// The design stage 1 goes on with
#[derive(Debug, Clone)]
pub struct AcceptedDesign {
    pub spec: DesignSpec,
    pub mechanics: Vec<String>,
    pub score: f64,
    pub attempts: u32,

    /// Attempts ran out and the last candidate was kept anyway
    pub warning: bool,
    pub most_similar_job_id: Option<Uuid>,
}

pub struct RegenerationLoop {
    store: Store,
    generator: Arc<dyn ContentGenerator>,
    engine: SimilarityEngine,
    max_attempts: u32,
    validator: Option<fn(&Value) -> Validation>,
}

impl RegenerationLoop {
    pub fn new(store: Store, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            store,
            generator,
            engine: SimilarityEngine::new(),
            max_attempts: MAX_REGENERATION_ATTEMPTS,
            validator: None,
        }
    }

    /// Schema check every candidate must pass before it is compared
    pub fn with_validator(mut self, validator: fn(&Value) -> Validation) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Generate until a candidate is distinct enough or attempts run out
    pub async fn run(&self, job: &Job, base: GenerationRequest) -> Result<AcceptedDesign, StepError> {
        let history = self.store.similarity_checks(job.id).await?;

        if let Some(last) = history.last().filter(|c| !c.triggered_regeneration) {
            if let Some(spec) = DesignSpec::from_value(&last.candidate) {
                info!(job_id = %job.id, attempt = last.attempt_number, "Reusing accepted design");
                return Ok(AcceptedDesign {
                    spec,
                    mechanics: last.candidate_mechanics.clone(),
                    score: last.score,
                    attempts: last.attempt_number,
                    warning: last.is_similar,
                    most_similar_job_id: last.most_similar_job_id,
                });
            }
        }

        let mut excluded_mechanics = base.excluded_mechanics.clone();
        let mut excluded_styles = base.excluded_styles.clone();
        for check in history.iter().filter(|c| c.triggered_regeneration) {
            excluded_mechanics.extend(check.candidate_mechanics.iter().cloned());
            if let Some(style) = DesignSpec::from_value(&check.candidate)
                .and_then(|s| s.art_style().map(String::from))
            {
                excluded_styles.insert(style);
            }
        }
        let mut attempt = history.last().map(|c| c.attempt_number + 1).unwrap_or(1);

        loop {
            let request = GenerationRequest {
                attempt,
                excluded_mechanics: excluded_mechanics.clone(),
                excluded_styles: excluded_styles.clone(),
                ..base.clone()
            };
            let mut spec = self.generator.generate(&request).await?;
            if let Some(validate) = self.validator {
                let validation = validate(&spec.to_value());
                if !validation.valid {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        errors = ?validation.errors,
                        "Generated design failed schema check"
                    );
                    return Err(StepError::Validation {
                        errors: validation.errors,
                    });
                }
            }
            let mechanics = spec.mechanic_names();

            let peers: Vec<Candidate> = self
                .store
                .comparable_jobs(job.id)
                .await?
                .iter()
                .filter_map(Candidate::from_job)
                .collect();
            let candidate = Candidate::from_spec(Some(job.id), spec.clone());
            let result = self.engine.max_similarity(&candidate, &peers);

            if !result.is_similar {
                let check = self.check(job, attempt, &result, &spec, &mechanics, false);
                self.store.record_attempt(&check, None).await?;
                info!(job_id = %job.id, attempt, score = result.score, "Design accepted");
                return Ok(AcceptedDesign {
                    spec,
                    mechanics,
                    score: result.score,
                    attempts: attempt,
                    warning: false,
                    most_similar_job_id: result.most_similar_job_id,
                });
            }

            let applied = json!({
                "excluded_mechanics": excluded_mechanics,
                "excluded_styles": excluded_styles,
                "constraints": request.constraints,
            });

            if attempt < self.max_attempts {
                let check = self.check(job, attempt, &result, &spec, &mechanics, true);
                let log = self.log(job, attempt, &result, applied, RegenerationOutcome::Regenerated);
                self.store.record_attempt(&check, Some(&log)).await?;
                warn!(
                    job_id = %job.id,
                    attempt,
                    score = result.score,
                    similar_to = ?result.most_similar_job_id,
                    "Design too similar, regenerating"
                );
                self.event(
                    job,
                    attempt,
                    EventType::RegenerationTriggered,
                    format!(
                        "Attempt {} scored {:.3} against {}, regenerating",
                        attempt,
                        result.score,
                        peer_label(result.most_similar_job_id)
                    ),
                )
                .await?;

                excluded_mechanics.extend(mechanics);
                if let Some(style) = spec.art_style() {
                    excluded_styles.insert(style.to_string());
                }
                attempt += 1;
                continue;
            }

            // Out of attempts: keep the last candidate, flagged
            spec.similarity_warning = Some(true);
            spec.similarity_score = Some(result.score);
            let check = self.check(job, attempt, &result, &spec, &mechanics, false);
            let log = self.log(
                job,
                attempt,
                &result,
                applied,
                RegenerationOutcome::AcceptedWithWarning,
            );
            self.store.record_attempt(&check, Some(&log)).await?;
            warn!(job_id = %job.id, attempt, score = result.score, "Regeneration exhausted, accepting with warning");
            self.event(
                job,
                attempt,
                EventType::SimilarityWarning,
                format!(
                    "Accepted design after {} attempts with similarity {:.3}",
                    attempt, result.score
                ),
            )
            .await?;

            return Ok(AcceptedDesign {
                spec,
                mechanics,
                score: result.score,
                attempts: attempt,
                warning: true,
                most_similar_job_id: result.most_similar_job_id,
            });
        }
    }

    fn check(
        &self,
        job: &Job,
        attempt: u32,
        result: &super::SimilarityResult,
        spec: &DesignSpec,
        mechanics: &[String],
        triggered_regeneration: bool,
    ) -> SimilarityCheck {
        SimilarityCheck {
            id: Uuid::new_v4(),
            job_id: job.id,
            attempt_number: attempt,
            score: result.score,
            breakdown: result.breakdown.clone(),
            most_similar_job_id: result.most_similar_job_id,
            is_similar: result.is_similar,
            triggered_regeneration,
            candidate: spec.to_value(),
            candidate_mechanics: mechanics.to_vec(),
            created_at: Utc::now(),
        }
    }

    fn log(
        &self,
        job: &Job,
        attempt: u32,
        result: &super::SimilarityResult,
        constraints_applied: serde_json::Value,
        outcome: RegenerationOutcome,
    ) -> RegenerationLog {
        RegenerationLog {
            id: Uuid::new_v4(),
            job_id: job.id,
            batch_id: job.batch_id,
            attempt_number: attempt,
            reason: REASON_SIMILARITY_EXCEEDED.to_string(),
            score: result.score,
            similar_to_job_id: result.most_similar_job_id,
            constraints_applied,
            outcome,
            created_at: Utc::now(),
        }
    }

    async fn event(
        &self,
        job: &Job,
        attempt: u32,
        event_type: EventType,
        message: String,
    ) -> Result<(), StepError> {
        let step = StepNumber::PreProduction;
        let event = Event::new(
            job.id,
            Some(step),
            event_type,
            format!("{}:{}:attempt{}", job.id, step.name(), attempt),
            message,
            StepStatus::Running,
        )
        .with_batch(job.batch_id);
        self.store.append_event(&event).await?;
        Ok(())
    }
}

fn peer_label(job_id: Option<Uuid>) -> String {
    job_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Exclusions in a stored regeneration log
pub fn excluded_mechanics(log: &RegenerationLog) -> BTreeSet<String> {
    log.constraints_applied
        .get("excluded_mechanics")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
