//! End-to-end workflow tests.
//!
//! Whole jobs run through the twelve stages on the local collaborators,
//! with individual stages swapped for doubles where a failure is needed.

mod common;

use std::sync::Arc;

use common::{CheckoutlessProjectSetup, FailingStep, FlakyArchitecture, Harness};
use gamefactory::adapters::generator::TemplateGenerator;
use gamefactory::core::{
    BatchRequest, ErrorKind, ExecutorRegistry, FactoryError, Orchestrator, RetryPolicy, StepEvent,
    WorkflowDefinition, MAX_BATCH_SIZE,
};
use gamefactory::domain::{
    BatchStatus, Constraint, EventType, JobStatus, StepNumber, StepStatus,
};
use gamefactory::steps::{standard_registry, PreProductionStep};

#[tokio::test]
async fn test_batch_runs_to_completion_and_feeds_next_batch() {
    let harness = Harness::new().await;
    let engine = harness.engine();
    let service = engine.service();

    let (batch, jobs) = service
        .create_batch(BatchRequest {
            name: Some("spring".to_string()),
            game_count: Some(2),
            genre_mix: vec!["puzzle".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.genre == "puzzle"));
    let (a, b) = (&jobs[0], &jobs[1]);

    for (name, level) in common::strong_events() {
        service.record_analytics_event(a.id, name, level).await.unwrap();
    }
    assert!(service.cancel_job(b.id).await.unwrap());

    service.start_batch(batch.id).await.unwrap();
    let summary = engine.run_until_idle().await.unwrap();
    assert_eq!(summary.completed_steps, 12);
    assert_eq!(summary.failed_steps, 0);

    let a = service.get_job(a.id).await.unwrap();
    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(a.current_step, 12);
    assert!(a.spec.is_some());
    assert!(!a.selected_mechanics.is_empty());

    let b = service.get_job(b.id).await.unwrap();
    assert_eq!(b.status, JobStatus::Cancelled);
    assert_eq!(b.current_step, 0);
    assert!(service
        .job_steps(b.id)
        .await
        .unwrap()
        .iter()
        .all(|s| s.status == StepStatus::Pending));

    let batch = service.get_batch(batch.id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    // Post-launch scored the game and rewarded its mechanics and genre
    let post_launch = service.get_step(a.id, 12).await.unwrap();
    let score = post_launch.artifacts.get("game_score").and_then(|v| v.as_f64()).unwrap();
    assert!((score - 80.0).abs() < 1e-6, "score was {}", score);

    let weights = service.learning_weights(Some("puzzle")).await.unwrap();
    assert_eq!(weights.len(), a.selected_mechanics.len() + 1);
    for weight in &weights {
        assert!((weight.weight - 1.1).abs() < 1e-9, "{} = {}", weight.mechanic_name, weight.weight);
        assert_eq!(weight.sample_count, 1);
    }
    assert!(weights.iter().any(|w| w.mechanic_name == "genre:puzzle"));

    let constraints: Vec<Constraint> = serde_json::from_value(
        post_launch.artifacts.get("next_batch_constraints").cloned().unwrap(),
    )
    .unwrap();
    assert!(constraints
        .iter()
        .any(|c| matches!(c, Constraint::PreferGenre { value, .. } if value == "puzzle")));

    // A follow-up batch inherits the feedback
    let (next, next_jobs) = service
        .create_batch(BatchRequest {
            game_count: Some(1),
            genre_mix: vec!["puzzle".to_string()],
            inherit_from: Some(batch.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(next.inherited_from, Some(batch.id));
    assert!(next.constraints.iter().any(|c| c.kind() == "prefer_genre"));
    assert_eq!(next_jobs[0].constraints, next.constraints);

    let log = service.batch_logs(batch.id).await.unwrap();
    assert!(log.iter().any(|e| e.event_type == EventType::JobCompleted));
    assert!(log.iter().any(|e| e.event_type == EventType::JobCancelled));
}

#[tokio::test]
async fn test_transient_failure_exhausts_retries() {
    let harness = Harness::new().await;
    let failing = FailingStep::new(StepNumber::Architecture, ErrorKind::Transient);
    let collaborators = harness.collaborators();
    let registry = standard_registry(&collaborators, harness.store.clone()).with(failing.clone());
    let engine = harness
        .builder()
        .with_collaborators(collaborators)
        .with_registry(registry)
        .build();
    let service = engine.service();

    let job = service.create_job("Retry Run", "runner", Vec::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    let summary = engine.run_until_idle().await.unwrap();

    assert_eq!(failing.calls(), 3);
    assert_eq!(summary.retries, 2);
    assert_eq!(summary.failed_steps, 1);

    let job = service.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, 2);

    let step = service.get_step(job.id, 3).await.unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.retry_count, 3);
    assert!(step.error_message.unwrap().contains("flaked on call 3"));

    let step4 = service.get_step(job.id, 4).await.unwrap();
    assert_eq!(step4.status, StepStatus::Pending);

    let log = service.job_logs(job.id).await.unwrap();
    let retries = log.iter().filter(|e| e.event_type == EventType::StepRetrying).count();
    assert_eq!(retries, 2);
    assert!(log.iter().any(|e| e.event_type == EventType::JobFailed));
}

#[tokio::test]
async fn test_configuration_error_fails_without_retry() {
    let harness = Harness::new().await;
    let failing = FailingStep::new(StepNumber::Architecture, ErrorKind::Configuration);
    let collaborators = harness.collaborators();
    let registry = standard_registry(&collaborators, harness.store.clone()).with(failing.clone());
    let engine = harness
        .builder()
        .with_collaborators(collaborators)
        .with_registry(registry)
        .build();
    let service = engine.service();

    let job = service.create_job("Broken", "puzzle", Vec::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    let summary = engine.run_until_idle().await.unwrap();

    assert_eq!(failing.calls(), 1);
    assert_eq!(summary.retries, 0);

    let step = service.get_step(job.id, 3).await.unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.retry_count, 0);
    assert_eq!(service.get_job(job.id).await.unwrap().status, JobStatus::Failed);

    // Attempts remain, so a plain manual retry is allowed
    let record = service.retry_step(job.id, 3, false).await.unwrap();
    assert_eq!(record.status, StepStatus::Pending);
    assert_eq!(service.get_job(job.id).await.unwrap().status, JobStatus::InProgress);
}

#[tokio::test]
async fn test_forced_retry_resumes_failed_job() {
    let harness = Harness::new().await;
    let flaky = FlakyArchitecture::new(3);
    let collaborators = harness.collaborators();
    let registry = standard_registry(&collaborators, harness.store.clone()).with(flaky.clone());
    let engine = harness
        .builder()
        .with_collaborators(collaborators)
        .with_registry(registry)
        .build();
    let service = engine.service();

    let job = service.create_job("Second Wind", "platformer", Vec::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    engine.run_until_idle().await.unwrap();
    assert_eq!(service.get_job(job.id).await.unwrap().status, JobStatus::Failed);

    let denied = service.retry_step(job.id, 3, false).await;
    assert!(matches!(denied, Err(FactoryError::RetryNotAllowed { step: 3, .. })));

    let denied = service.retry_step(job.id, 4, true).await;
    assert!(matches!(denied, Err(FactoryError::RetryNotAllowed { step: 4, .. })));

    let record = service.retry_step(job.id, 3, true).await.unwrap();
    assert_eq!(record.retry_count, 4);
    engine.run_until_idle().await.unwrap();

    assert_eq!(flaky.calls(), 4);
    let job = service.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_step, 12);

    let log = service.job_logs(job.id).await.unwrap();
    assert!(log.iter().any(|e| e.event_type == EventType::ForcedRetry));
}

#[tokio::test]
async fn test_start_requires_fresh_job_and_pending_batch() {
    let harness = Harness::new().await;
    let engine = harness.engine();
    let service = engine.service();

    let (batch, _) = service
        .create_batch(BatchRequest {
            game_count: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    service.start_batch(batch.id).await.unwrap();
    assert!(matches!(
        service.start_batch(batch.id).await,
        Err(FactoryError::InvalidState(_))
    ));

    let job = service.create_job("Once", "puzzle", Vec::new()).await.unwrap();
    service.cancel_job(job.id).await.unwrap();
    assert!(matches!(
        service.start_job(job.id).await,
        Err(FactoryError::InvalidState(_))
    ));

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        service.get_job(missing).await,
        Err(FactoryError::JobNotFound(id)) if id == missing
    ));
    assert!(matches!(
        service.get_step(job.id, 13).await,
        Err(FactoryError::StepNotFound { step: 13, .. })
    ));
}

#[tokio::test]
async fn test_cancel_batch_stops_every_job() {
    let harness = Harness::new().await;
    let engine = harness.engine();
    let service = engine.service();

    let (batch, jobs) = service
        .create_batch(BatchRequest {
            game_count: Some(3),
            genre_mix: vec!["runner".to_string(), "puzzle".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(jobs[0].genre, "runner");
    assert_eq!(jobs[1].genre, "puzzle");
    assert_eq!(jobs[2].genre, "runner");

    service.start_batch(batch.id).await.unwrap();
    assert_eq!(service.cancel_batch(batch.id).await.unwrap(), 3);
    engine.run_until_idle().await.unwrap();

    for job in service.list_jobs(Some(batch.id)).await.unwrap() {
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.current_step, 0);
    }
    assert_eq!(
        service.get_batch(batch.id).await.unwrap().status,
        BatchStatus::Cancelled
    );
}

#[tokio::test]
async fn test_scripted_performance_drives_weights() {
    let harness = Harness::new().await;
    let collaborators = harness
        .collaborators()
        .with_performance(Arc::new(common::ScriptedPerformance(common::strong_metrics())));
    let engine = harness.builder().with_collaborators(collaborators).build();
    let service = engine.service();

    let job = service.create_job("Scripted", "runner", Vec::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    engine.run_until_idle().await.unwrap();

    let summaries = service.weight_summaries().await.unwrap();
    let runner = summaries.iter().find(|s| s.genre == "runner").unwrap();
    assert!((runner.genre_weight.unwrap() - 1.1).abs() < 1e-9);
    assert!((runner.average_weight - 1.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_batch_size_is_bounded() {
    let harness = Harness::new().await;
    let engine = harness.engine();
    let service = engine.service();

    for count in [0, MAX_BATCH_SIZE + 1] {
        let result = service
            .create_batch(BatchRequest {
                game_count: Some(count),
                ..Default::default()
            })
            .await;
        assert!(
            matches!(result, Err(FactoryError::InvalidState(_))),
            "count {} accepted",
            count
        );
    }
    assert!(service.list_batches(10).await.unwrap().is_empty());
    assert!(service.list_jobs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregistered_stage_fails_without_retry() {
    let harness = Harness::new().await;
    let registry = ExecutorRegistry::new().with(Arc::new(PreProductionStep::new(
        harness.store.clone(),
        Arc::new(TemplateGenerator::new()),
    )));
    let orchestrator = Orchestrator::new(
        harness.store.clone(),
        registry,
        WorkflowDefinition::standard(),
        RetryPolicy::default(),
    );

    let job = gamefactory::domain::Job::new("Half Built".into(), "puzzle".into(), None, Vec::new());
    harness.store.create_job(&job, 3).await.unwrap();
    orchestrator.run_step(job.id, 1).await.unwrap();

    let event = orchestrator.run_step(job.id, 2).await.unwrap();
    assert!(matches!(
        event,
        StepEvent::Failed {
            step: StepNumber::ProjectSetup,
            kind: ErrorKind::Configuration,
            ..
        }
    ));

    let step = harness
        .store
        .get_step(job.id, StepNumber::ProjectSetup)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.retry_count, 0);
    assert!(step.error_message.unwrap().contains("no executor registered"));

    let job = harness.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, 1);
}

#[tokio::test]
async fn test_missing_inputs_fail_before_execution() {
    let harness = Harness::new().await;
    let architecture = FlakyArchitecture::new(0);
    let collaborators = harness.collaborators();
    let registry = standard_registry(&collaborators, harness.store.clone())
        .with(Arc::new(CheckoutlessProjectSetup))
        .with(architecture.clone());
    let orchestrator = Orchestrator::new(
        harness.store.clone(),
        registry,
        WorkflowDefinition::standard(),
        RetryPolicy::default(),
    );

    let job = gamefactory::domain::Job::new("No Checkout".into(), "runner".into(), None, Vec::new());
    harness.store.create_job(&job, 3).await.unwrap();
    for step in 1..=2 {
        let event = orchestrator.run_step(job.id, step).await.unwrap();
        assert!(matches!(event, StepEvent::Completed { .. }), "step {}: {:?}", step, event);
    }

    let event = orchestrator.run_step(job.id, 3).await.unwrap();
    assert!(matches!(
        event,
        StepEvent::Failed {
            step: StepNumber::Architecture,
            kind: ErrorKind::Input,
            ..
        }
    ));
    assert_eq!(architecture.calls(), 0);

    let step = harness
        .store
        .get_step(job.id, StepNumber::Architecture)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.retry_count, 0);
    assert!(step.error_message.unwrap().contains("local_path"));

    let job = harness.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, 2);
}
