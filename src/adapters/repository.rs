//! Local filesystem repository host.
//!
//! Stands in for a remote source host. Repositories are directories under
//! `root`; commits are atomic file writes recorded in a JSONL history, and
//! committing identical content is a no-op.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::core::store::hash_input;

use super::{CollaboratorError, CommitOutcome, Repository, RepositoryHost};

const METADATA_FILE: &str = ".repository.json";
const HISTORY_FILE: &str = ".commits.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct RepositoryMetadata {
    name: String,
    template: String,
    created_at: String,
    pushed_at: Option<String>,
    head: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitRecord {
    id: String,
    path: String,
    message: String,
    committed_at: String,
}

/// Repository host backed by local directories
#[derive(Debug, Clone)]
pub struct LocalRepositoryHost {
    root: PathBuf,
}

impl LocalRepositoryHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repository(&self, name: &str, created: bool) -> Repository {
        let local_path = self.root.join(name);
        Repository {
            name: name.to_string(),
            url: format!("file://{}", local_path.display()),
            local_path,
            created,
        }
    }
}

/// Repository name for a job: `gamefactory-<slug>`
pub fn repository_name(job_name: &str) -> String {
    let slug: String = job_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    format!("gamefactory-{}", slug)
}

/// Write `content` to `path` via a temp file in the same directory
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_metadata(repo_path: &Path) -> Result<RepositoryMetadata, CollaboratorError> {
    let raw = std::fs::read_to_string(repo_path.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_metadata(repo_path: &Path, metadata: &RepositoryMetadata) -> Result<(), CollaboratorError> {
    let raw = serde_json::to_vec_pretty(metadata)?;
    write_atomic(&repo_path.join(METADATA_FILE), &raw)?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T, CollaboratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollaboratorError::Other(anyhow::anyhow!("repository task failed: {}", e)))?
}

#[async_trait]
impl RepositoryHost for LocalRepositoryHost {
    async fn ensure_repository(&self, name: &str, template: &str) -> Result<Repository, CollaboratorError> {
        let existing = self.repository(name, false);
        let repo_path = existing.local_path.clone();
        let template = template.to_string();
        let repo_name = name.to_string();

        let created = blocking(move || {
            if repo_path.join(METADATA_FILE).exists() {
                return Ok(false);
            }
            std::fs::create_dir_all(&repo_path)?;
            write_metadata(
                &repo_path,
                &RepositoryMetadata {
                    name: repo_name,
                    template,
                    created_at: Utc::now().to_rfc3339(),
                    pushed_at: None,
                    head: None,
                },
            )?;
            Ok(true)
        })
        .await?;

        if created {
            info!(repository = %name, "Repository created");
        } else {
            debug!(repository = %name, "Repository exists, reusing");
        }
        Ok(Repository { created, ..existing })
    }

    async fn commit(
        &self,
        repo: &Repository,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome, CollaboratorError> {
        let repo_path = repo.local_path.clone();
        let rel_path = path.to_string();
        let content = content.to_string();
        let message = message.to_string();

        blocking(move || {
            let mut metadata = read_metadata(&repo_path)
                .map_err(|e| CollaboratorError::Misconfigured(format!("not a repository: {}", e)))?;
            let target = repo_path.join(&rel_path);
            if let Ok(current) = std::fs::read_to_string(&target) {
                if current == content {
                    return Ok(CommitOutcome::Unchanged);
                }
            }

            write_atomic(&target, content.as_bytes())?;
            let id = hash_input(&format!("{}\n{}", rel_path, content));
            let record = CommitRecord {
                id: id.clone(),
                path: rel_path,
                message,
                committed_at: Utc::now().to_rfc3339(),
            };
            let mut history = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(repo_path.join(HISTORY_FILE))?;
            writeln!(history, "{}", serde_json::to_string(&record)?)?;

            metadata.head = Some(id.clone());
            write_metadata(&repo_path, &metadata)?;
            Ok(CommitOutcome::Committed { id })
        })
        .await
    }

    async fn push(&self, repo: &Repository) -> Result<(), CollaboratorError> {
        let repo_path = repo.local_path.clone();
        blocking(move || {
            let mut metadata = read_metadata(&repo_path)
                .map_err(|e| CollaboratorError::Misconfigured(format!("not a repository: {}", e)))?;
            metadata.pushed_at = Some(Utc::now().to_rfc3339());
            write_metadata(&repo_path, &metadata)
        })
        .await
    }
}

/// Number of recorded commits in a local repository
pub fn commit_count(repo_path: &Path) -> std::io::Result<usize> {
    match std::fs::read_to_string(repo_path.join(HISTORY_FILE)) {
        Ok(raw) => Ok(raw.lines().filter(|l| !l.trim().is_empty()).count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
