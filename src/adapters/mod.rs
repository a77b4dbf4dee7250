//! Collaborator interfaces for external systems.
//!
//! Step executors reach content generation, source hosting, asset
//! rendering and player analytics only through these traits. The engine
//! needs either a result or a classifiable error from each; everything
//! else about them is opaque.

pub mod analytics;
pub mod generator;
pub mod renderer;
pub mod repository;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::core::errors::StepError;
use crate::core::store::Store;
use crate::domain::{Constraint, DesignSpec, Job, PerformanceMetrics};

pub use analytics::StoreAnalytics;
pub use generator::TemplateGenerator;
pub use renderer::PlaceholderRenderer;
pub use repository::LocalRepositoryHost;

/// Failure reported by a collaborator
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{0} timed out")]
    Timeout(String),

    /// The collaborator is set up wrong; retrying cannot help
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CollaboratorError> for StepError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Misconfigured(msg) => StepError::Configuration(msg),
            other => StepError::Transient(other.to_string()),
        }
    }
}

/// Failure of the content generator
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no mechanics available for genre {genre}")]
    NoMechanics { genre: String },

    #[error("generator backend failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<GenerationError> for StepError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Collaborator(inner) => inner.into(),
            other => StepError::Transient(other.to_string()),
        }
    }
}

/// Everything the generator may take into account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub job_id: Uuid,
    pub game_name: String,
    pub genre: String,

    /// 1-based generation attempt
    pub attempt: u32,
    pub constraints: Vec<Constraint>,
    pub mechanic_pool: Vec<String>,

    /// Negative constraints from rejected attempts
    pub excluded_mechanics: BTreeSet<String>,
    pub excluded_styles: BTreeSet<String>,

    /// Learned weight per mechanic for this genre
    pub weights: HashMap<String, f64>,
}

/// Content generation
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<DesignSpec, GenerationError>;
}

/// A hosted source repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    pub local_path: PathBuf,

    /// False when an existing repository was reused
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { id: String },

    /// Content identical to what is already committed
    Unchanged,
}

/// Remote repository operations; every call is detect-and-update
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Create the repository from `template`, or return the existing one
    async fn ensure_repository(&self, name: &str, template: &str) -> Result<Repository, CollaboratorError>;

    /// Write `content` to `path` inside the repository
    async fn commit(
        &self,
        repo: &Repository,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome, CollaboratorError>;

    async fn push(&self, repo: &Repository) -> Result<(), CollaboratorError>;
}

/// One asset to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub name: String,
    pub kind: String,
    pub style: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedAsset {
    pub name: String,
    pub path: PathBuf,
    pub atlas: String,
}

/// Asset rendering
#[async_trait]
pub trait AssetRenderer: Send + Sync {
    async fn render(&self, job_id: Uuid, asset: &AssetRequest) -> Result<RenderedAsset, CollaboratorError>;

    /// Remove everything rendered for a job
    async fn purge(&self, job_id: Uuid) -> Result<(), CollaboratorError>;
}

/// Player analytics for a published game
#[async_trait]
pub trait PerformanceSource: Send + Sync {
    async fn collect(&self, job: &Job) -> Result<PerformanceMetrics, CollaboratorError>;
}

/// The collaborators handed to step executors
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ContentGenerator>,
    pub repositories: Arc<dyn RepositoryHost>,
    pub renderer: Arc<dyn AssetRenderer>,
    pub performance: Arc<dyn PerformanceSource>,
}

impl Collaborators {
    /// Local defaults rooted at `home`
    pub fn local(home: &Path, store: Store) -> Self {
        Self {
            generator: Arc::new(TemplateGenerator::new()),
            repositories: Arc::new(LocalRepositoryHost::new(home.join("repos"))),
            renderer: Arc::new(PlaceholderRenderer::new(home.join("assets"))),
            performance: Arc::new(StoreAnalytics::new(store)),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_repositories(mut self, repositories: Arc<dyn RepositoryHost>) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn AssetRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_performance(mut self, performance: Arc<dyn PerformanceSource>) -> Self {
        self.performance = performance;
        self
    }
}
