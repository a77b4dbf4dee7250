//! Wiring of store, executors, orchestrator, worker pool and service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::adapters::Collaborators;
use crate::config::{ResolvedConfig, WorkflowSettings};
use crate::steps::standard_registry;

use super::executor::ExecutorRegistry;
use super::orchestrator::Orchestrator;
use super::queue::MemoryQueue;
use super::scheduler::{Scheduler, WorkSummary};
use super::service::FactoryService;
use super::store::Store;
use super::workflow::WorkflowDefinition;

/// A fully wired factory
#[derive(Clone)]
pub struct Engine {
    store: Store,
    service: FactoryService,
    scheduler: Scheduler,
}

impl Engine {
    pub fn builder(store: Store, home: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(store, home)
    }

    /// Open the configured database and wire local collaborators
    pub async fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let store = Store::open(&config.database).await?;
        Ok(EngineBuilder::new(store, config.home.clone())
            .with_settings(config.workflow.clone())
            .build())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn service(&self) -> &FactoryService {
        &self.service
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Drain the queue
    pub async fn run_until_idle(&self) -> Result<WorkSummary> {
        self.scheduler.run_until_idle().await
    }
}

pub struct EngineBuilder {
    store: Store,
    home: PathBuf,
    settings: WorkflowSettings,
    workflow: WorkflowDefinition,
    collaborators: Option<Collaborators>,
    registry: Option<ExecutorRegistry>,
}

impl EngineBuilder {
    pub fn new(store: Store, home: impl Into<PathBuf>) -> Self {
        Self {
            store,
            home: home.into(),
            settings: WorkflowSettings::default(),
            workflow: WorkflowDefinition::standard(),
            collaborators: None,
            registry: None,
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.settings.max_step_retries = max_retries;
        self.settings.retry_backoff_seconds = backoff.as_secs();
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.settings.worker_concurrency = workers;
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Replace the standard executors entirely
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Engine {
        let collaborators = self
            .collaborators
            .unwrap_or_else(|| Collaborators::local(&self.home, self.store.clone()));
        let registry = self
            .registry
            .unwrap_or_else(|| standard_registry(&collaborators, self.store.clone()));

        let orchestrator = Orchestrator::new(
            self.store.clone(),
            registry,
            self.workflow,
            self.settings.retry_policy(),
        )
        .with_stale_after(self.settings.stale_after())
        .with_template_repo(self.settings.template_repo.clone());

        let queue = MemoryQueue::new();
        let scheduler = Scheduler::new(
            Arc::new(orchestrator),
            queue.clone(),
            self.settings.worker_concurrency,
        );
        let service = FactoryService::new(self.store.clone(), Arc::new(queue))
            .with_max_retries(self.settings.max_step_retries)
            .with_batch_default_size(self.settings.batch_default_size);

        info!(
            home = %self.home.display(),
            workers = self.settings.worker_concurrency,
            max_retries = self.settings.max_step_retries,
            "Engine ready"
        );
        Engine {
            store: self.store,
            service,
            scheduler,
        }
    }
}
