//! Configuration for gamefactory.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GAMEFACTORY_HOME, GAMEFACTORY_DATABASE)
//! 2. Config file (.gamefactory/config.yaml)
//! 3. Defaults (~/.gamefactory)
//!
//! Config file discovery:
//! - Searches current directory and parents for .gamefactory/config.yaml
//! - `paths.home` is relative to the .gamefactory/ directory, `paths.database`
//!   to the resolved home

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::workflow::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".gamefactory";
const DEFAULT_DATABASE: &str = "factory.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .gamefactory/)
    pub home: Option<String>,
    /// SQLite database file (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowConfig {
    pub max_step_retries: Option<u32>,
    pub retry_backoff_seconds: Option<u64>,
    pub worker_concurrency: Option<usize>,
    pub batch_default_size: Option<u32>,
    pub stale_step_seconds: Option<u64>,
    pub template_repo: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to the engine home
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Workflow settings
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSettings {
    pub max_step_retries: u32,
    pub retry_backoff_seconds: u64,
    pub worker_concurrency: usize,
    pub batch_default_size: u32,
    pub stale_step_seconds: u64,
    pub template_repo: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_step_retries: 3,
            retry_backoff_seconds: 60,
            worker_concurrency: 4,
            batch_default_size: 10,
            stale_step_seconds: 1800,
            template_repo: "flutter-game-template".to_string(),
        }
    }
}

impl WorkflowSettings {
    fn from_file(config: Option<&WorkflowConfig>) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return defaults;
        };
        Self {
            max_step_retries: config.max_step_retries.unwrap_or(defaults.max_step_retries),
            retry_backoff_seconds: config
                .retry_backoff_seconds
                .unwrap_or(defaults.retry_backoff_seconds),
            worker_concurrency: config
                .worker_concurrency
                .unwrap_or(defaults.worker_concurrency),
            batch_default_size: config
                .batch_default_size
                .unwrap_or(defaults.batch_default_size),
            stale_step_seconds: config
                .stale_step_seconds
                .unwrap_or(defaults.stale_step_seconds),
            template_repo: config
                .template_repo
                .clone()
                .unwrap_or(defaults.template_repo),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_step_retries,
            Duration::from_secs(self.retry_backoff_seconds),
        )
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_step_seconds)
    }
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with default settings
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database: home.join(DEFAULT_DATABASE),
            home,
            config_file: None,
            workflow: WorkflowSettings::default(),
        }
    }

    /// Local repositories ($GAMEFACTORY_HOME/repos)
    pub fn repos_dir(&self) -> PathBuf {
        self.home.join("repos")
    }

    /// Rendered assets ($GAMEFACTORY_HOME/assets)
    pub fn assets_dir(&self) -> PathBuf {
        self.home.join("assets")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let parsed = config_file
        .as_deref()
        .map(load_config_file)
        .transpose()?;

    let home = if let Ok(env_home) = std::env::var("GAMEFACTORY_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(config_path), Some(home_path)) = (
        config_file.as_deref(),
        parsed.as_ref().and_then(|c| c.paths.home.as_deref()),
    ) {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let database = if let Ok(env_db) = std::env::var("GAMEFACTORY_DATABASE") {
        PathBuf::from(env_db)
    } else if let Some(db_path) = parsed.as_ref().and_then(|c| c.paths.database.as_deref()) {
        resolve_path(&home, db_path)
    } else {
        home.join(DEFAULT_DATABASE)
    };

    let workflow = WorkflowSettings::from_file(parsed.as_ref().and_then(|c| c.workflow.as_ref()));

    Ok(ResolvedConfig {
        home,
        database,
        config_file,
        workflow,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the gamefactory home directory (engine state).
pub fn factory_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the database path
pub fn database_path() -> Result<PathBuf> {
    Ok(config()?.database.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  database: state/factory.db
workflow:
  max_step_retries: 5
  worker_concurrency: 8
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(config.paths.database, Some("state/factory.db".to_string()));

        let workflow = WorkflowSettings::from_file(config.workflow.as_ref());
        assert_eq!(workflow.max_step_retries, 5);
        assert_eq!(workflow.worker_concurrency, 8);
        assert_eq!(workflow.retry_backoff_seconds, 60);
        assert_eq!(workflow.stale_step_seconds, 1800);
    }

    #[test]
    fn test_workflow_defaults() {
        let workflow = WorkflowSettings::from_file(None);
        assert_eq!(workflow.batch_default_size, 10);
        assert_eq!(workflow.retry_policy().max_retries, 3);
        assert_eq!(workflow.retry_policy().delay(), Duration::from_secs(60));
        assert_eq!(workflow.stale_after(), Duration::from_secs(1800));
    }

    #[test]
    fn test_derived_paths() {
        let config = ResolvedConfig::with_home("/srv/factory");
        assert_eq!(config.database, PathBuf::from("/srv/factory/factory.db"));
        assert_eq!(config.repos_dir(), PathBuf::from("/srv/factory/repos"));
        assert_eq!(config.assets_dir(), PathBuf::from("/srv/factory/assets"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
