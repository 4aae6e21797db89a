//! Artifact sink: per-build workspace directories on disk.
//!
//! Layout: `<base>/<goal slug>/<run id>/` holding `plan.json`, one source file
//! per accepted sub-agent and the trace files. The run id keeps concurrent
//! builds of the same goal apart.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;

use crate::plan::Plan;

/// Longest slug taken from a goal.
pub const MAX_SLUG_LEN: usize = 50;

/// Trace name for plan design and the build summary. `@` never appears in a
/// valid sub-agent name, so this file cannot collide with a sub-agent trace.
pub const DESIGN_TRACE: &str = "@designer";

/// Generated agents are Python modules.
pub const ARTIFACT_EXTENSION: &str = "py";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize plan: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One build's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub slug: String,
    pub run_id: String,
}

impl Workspace {
    pub fn plan_path(&self) -> PathBuf {
        self.root.join("plan.json")
    }

    pub fn trace_path(&self, subagent: &str) -> PathBuf {
        self.root.join(format!("trace_{subagent}.jsonl"))
    }

    pub fn artifact_path(&self, name: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{name}.{extension}"))
    }

    /// Files in the workspace, relative to its root, sorted.
    pub async fn list_files(&self) -> std::io::Result<Vec<String>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Where a build's outputs go.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Create a fresh workspace for one build. Called before any LLM call.
    async fn allocate(&self, goal: &str, build_id: &str) -> Result<Workspace, SinkError>;

    async fn write_plan(&self, workspace: &Workspace, plan: &Plan) -> Result<PathBuf, SinkError>;

    async fn write_artifact(
        &self,
        workspace: &Workspace,
        name: &str,
        code: &str,
    ) -> Result<PathBuf, SinkError>;
}

/// Filesystem sink rooted at `base`.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    base: PathBuf,
}

impl FsArtifactSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> SinkError {
    let path = path.to_path_buf();
    move |source| SinkError::Io {
        action,
        path,
        source,
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn allocate(&self, goal: &str, build_id: &str) -> Result<Workspace, SinkError> {
        let slug = slugify(goal);
        let root = self.base.join(&slug).join(build_id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_err("create workspace", &root))?;
        tracing::debug!(path = %root.display(), "Workspace allocated");
        Ok(Workspace {
            root,
            slug,
            run_id: build_id.to_string(),
        })
    }

    async fn write_plan(&self, workspace: &Workspace, plan: &Plan) -> Result<PathBuf, SinkError> {
        let path = workspace.plan_path();
        let json = serde_json::to_string_pretty(plan)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(io_err("write plan", &path))?;
        Ok(path)
    }

    async fn write_artifact(
        &self,
        workspace: &Workspace,
        name: &str,
        code: &str,
    ) -> Result<PathBuf, SinkError> {
        let path = workspace.artifact_path(name, ARTIFACT_EXTENSION);
        tokio::fs::write(&path, code)
            .await
            .map_err(io_err("write artifact", &path))?;
        Ok(path)
    }
}

/// Lowercase the goal, map anything but ASCII letters and digits to `_`, and
/// keep the first [`MAX_SLUG_LEN`] characters.
pub fn slugify(goal: &str) -> String {
    let slug: String = goal
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_LEN)
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Unique id for one build: UTC timestamp plus a random suffix.
pub fn new_build_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x10000);
    format!("{}-{suffix:04x}", chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ"))
}
