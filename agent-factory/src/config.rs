//! Configuration for the agent factory.
//!
//! Config file lives at `~/.config/agent-factory/factory.toml` unless
//! `--config` names another one. Effective values merge CLI flags > config
//! file > defaults. The API key never lives here; it comes from the
//! environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::factory::{BuildMode, DEFAULT_MAX_PLAN_REVISIONS, DEFAULT_MAX_RETRIES};
use crate::llm::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::retry::RetryConfig;
use crate::sandbox::SandboxConfig;

/// Default base directory for build workspaces.
pub const DEFAULT_WORKSPACE_BASE: &str = "workspaces";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub workspace_base: PathBuf,
    pub model: String,
    pub max_tokens: u32,
    /// Review retries per sub-agent.
    pub max_retries: u32,
    /// Debug-mode plan revisions before giving up.
    pub max_plan_revisions: u32,
    pub mode: BuildMode,
    /// What the designer may assume is available (APIs, datasets).
    pub resources: Vec<String>,
    /// Build ledger location. Defaults under the user data directory.
    pub history_db: Option<PathBuf>,
    /// Transport retries for model calls.
    pub retry: RetryConfig,
    pub sandbox: SandboxConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            workspace_base: PathBuf::from(DEFAULT_WORKSPACE_BASE),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_plan_revisions: DEFAULT_MAX_PLAN_REVISIONS,
            mode: BuildMode::default(),
            resources: Vec::new(),
            history_db: None,
            retry: RetryConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workspace_base: Option<PathBuf>,
    pub model: Option<String>,
    pub max_retries: Option<u32>,
    pub mode: Option<BuildMode>,
    pub history_db: Option<PathBuf>,
    pub interpreter: Option<String>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agent-factory")
}

pub fn default_path() -> PathBuf {
    config_dir().join("factory.toml")
}

fn default_history_db() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agent-factory")
        .join("history.db")
}

impl FactoryConfig {
    /// Load from `path`, or from the default location. A missing default
    /// file means defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_path(), false),
        };
        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Bad config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// CLI overrides win over the file.
    pub fn merge(mut self, cli: Overrides) -> Self {
        if let Some(base) = cli.workspace_base {
            self.workspace_base = base;
        }
        if let Some(model) = cli.model {
            self.model = model;
        }
        if let Some(n) = cli.max_retries {
            self.max_retries = n;
        }
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if let Some(db) = cli.history_db {
            self.history_db = Some(db);
        }
        if let Some(interpreter) = cli.interpreter {
            self.sandbox.interpreter = interpreter;
        }
        self
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.history_db.clone().unwrap_or_else(default_history_db)
    }
}
