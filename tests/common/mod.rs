//! Shared fixtures and collaborator doubles for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use gamefactory::adapters::generator::TemplateGenerator;
use gamefactory::adapters::repository::LocalRepositoryHost;
use gamefactory::adapters::{
    CollaboratorError, Collaborators, CommitOutcome, ContentGenerator, GenerationError,
    GenerationRequest, PerformanceSource, Repository, RepositoryHost,
};
use gamefactory::core::executor::{StepContext, StepExecutor, StepOutput};
use gamefactory::core::{Engine, EngineBuilder, ErrorKind, StepError, Store};
use gamefactory::domain::{
    Artifacts, DesignSpec, Job, PerformanceMetrics, StepNumber, Validation,
};

/// Engine over an in-memory store, rooted in a temp directory.
///
/// Retries are immediate so failure scenarios drain in one pass.
pub struct Harness {
    pub home: TempDir,
    pub store: Store,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            home: TempDir::new().unwrap(),
            store: Store::open_in_memory().await.unwrap(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::local(self.home.path(), self.store.clone())
    }

    pub fn builder(&self) -> EngineBuilder {
        Engine::builder(self.store.clone(), self.home.path()).with_retry(3, Duration::ZERO)
    }

    pub fn engine(&self) -> Engine {
        self.builder().build()
    }
}

/// Executor that fails every call with the given kind
pub struct FailingStep {
    step: StepNumber,
    kind: ErrorKind,
    pub calls: AtomicU32,
}

impl FailingStep {
    pub fn new(step: StepNumber, kind: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            step,
            kind,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FailingStep {
    fn step(&self) -> StepNumber {
        self.step
    }

    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(match self.kind {
            ErrorKind::Configuration => StepError::configuration(format!("broken on call {}", call)),
            ErrorKind::Input => StepError::Input {
                step: self.step,
                missing: vec!["nothing".to_string()],
            },
            ErrorKind::Validation => StepError::Validation {
                errors: vec![format!("rejected on call {}", call)],
            },
            ErrorKind::Transient => StepError::transient(format!("flaked on call {}", call)),
        })
    }
}

/// Architecture stand-in that fails transiently a fixed number of times
pub struct FlakyArchitecture {
    failures: u32,
    pub calls: AtomicU32,
}

impl FlakyArchitecture {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FlakyArchitecture {
    fn step(&self) -> StepNumber {
        StepNumber::Architecture
    }

    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(StepError::transient("compiler unavailable"));
        }
        Ok(StepOutput::new(
            Artifacts::new().with("architecture_validated", true),
        ))
    }
}

/// Executor that sleeps far past any sensible timeout
pub struct SlowStep {
    pub step: StepNumber,
    pub delay: Duration,
}

#[async_trait]
impl StepExecutor for SlowStep {
    fn step(&self) -> StepNumber {
        self.step
    }

    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        tokio::time::sleep(self.delay).await;
        Ok(StepOutput::default())
    }
}

/// Executor that cancels its own job before returning a result
pub struct CancellingStep {
    pub store: Store,
}

#[async_trait]
impl StepExecutor for CancellingStep {
    fn step(&self) -> StepNumber {
        StepNumber::PreProduction
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.store.cancel_job(ctx.job_id()).await?;
        Ok(StepOutput::new(
            Artifacts::new().with("gdd_spec", serde_json::json!({"game_name": "late"})),
        ))
    }
}

/// Generator that returns the same design for every request
pub struct FixedGenerator {
    spec: DesignSpec,
    pub calls: AtomicU32,
}

impl FixedGenerator {
    pub fn new(spec: DesignSpec) -> Arc<Self> {
        Arc::new(Self {
            spec,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FixedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<DesignSpec, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DesignSpec {
            generation_attempt: request.attempt,
            ..self.spec.clone()
        })
    }
}

/// Template generator whose first design comes back without a core loop
pub struct IncompleteFirstGenerator {
    inner: TemplateGenerator,
    pub calls: AtomicU32,
}

impl IncompleteFirstGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: TemplateGenerator::new(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for IncompleteFirstGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<DesignSpec, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut spec = self.inner.generate(request).await?;
        if call == 1 {
            spec.core_loop = None;
        }
        Ok(spec)
    }
}

/// Project setup that reports success without a local checkout
pub struct CheckoutlessProjectSetup;

#[async_trait]
impl StepExecutor for CheckoutlessProjectSetup {
    fn step(&self) -> StepNumber {
        StepNumber::ProjectSetup
    }

    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new(
            Artifacts::new().with("github_repo", "local/checkoutless"),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, _output: &StepOutput) -> Validation {
        Validation::ok()
    }
}

/// Local repository host that counts the calls it receives
pub struct CountingRepositoryHost {
    inner: LocalRepositoryHost,
    pub ensures: AtomicUsize,
    pub commits: AtomicUsize,
    pub pushes: AtomicUsize,
}

impl CountingRepositoryHost {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalRepositoryHost::new(root),
            ensures: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RepositoryHost for CountingRepositoryHost {
    async fn ensure_repository(&self, name: &str, template: &str) -> Result<Repository, CollaboratorError> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_repository(name, template).await
    }

    async fn commit(
        &self,
        repo: &Repository,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome, CollaboratorError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(repo, path, content, message).await
    }

    async fn push(&self, repo: &Repository) -> Result<(), CollaboratorError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.inner.push(repo).await
    }
}

/// Performance source returning canned metrics
pub struct ScriptedPerformance(pub PerformanceMetrics);

#[async_trait]
impl PerformanceSource for ScriptedPerformance {
    async fn collect(&self, _job: &Job) -> Result<PerformanceMetrics, CollaboratorError> {
        Ok(self.0.clone())
    }
}

/// Metrics scoring 80: retention, completion and ad opt-in all at 0.8
pub fn strong_metrics() -> PerformanceMetrics {
    PerformanceMetrics {
        total_events: 18,
        game_starts: 5,
        level_completes: 4,
        level_fails: 1,
        ad_shown: 5,
        ad_completed: 4,
        completion_rate: 0.8,
        fail_rate: 0.2,
        ad_opt_in_rate: 0.8,
        retention_proxy: 0.8,
    }
}

/// Player events for one job that aggregate to [`strong_metrics`] rates
pub fn strong_events() -> Vec<(&'static str, Option<u32>)> {
    let mut events = Vec::new();
    for _ in 0..5 {
        events.push(("game_start", None));
        events.push(("unlock_prompt_shown", Some(4)));
    }
    for _ in 0..4 {
        events.push(("level_complete", Some(3)));
        events.push(("rewarded_ad_completed", Some(4)));
    }
    events
}
