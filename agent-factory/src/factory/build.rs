//! Request, result and collaborator types for one build.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::designer::DesignError;
use crate::plan::{Plan, PlanError};
use crate::reviewer::Feedback;
use crate::workspace::SinkError;

/// Default review retries per sub-agent.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Debug builds report every step and ask for plan approval; automated
/// builds run straight through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Debug,
    #[default]
    Automated,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Debug => write!(f, "debug"),
            BuildMode::Automated => write!(f, "automated"),
        }
    }
}

/// Orchestrator state. `usize` is the sub-agent index in plan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum State {
    Idle,
    Planning,
    PlanReady,
    Building(usize),
    Reviewing(usize),
    Retrying(usize),
    Done,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "idle"),
            State::Planning => write!(f, "planning"),
            State::PlanReady => write!(f, "plan_ready"),
            State::Building(i) => write!(f, "building({i})"),
            State::Reviewing(i) => write!(f, "reviewing({i})"),
            State::Retrying(i) => write!(f, "retrying({i})"),
            State::Done => write!(f, "done"),
            State::Succeeded => write!(f, "succeeded"),
            State::Failed => write!(f, "failed"),
            State::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress callback with a veto. Returning `false` cancels the build.
pub trait StepObserver: Send + Sync {
    fn on_step(&self, step: &str, payload: &serde_json::Value) -> bool;
}

impl<F> StepObserver for F
where
    F: Fn(&str, &serde_json::Value) -> bool + Send + Sync,
{
    fn on_step(&self, step: &str, payload: &serde_json::Value) -> bool {
        self(step, payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Approve,
    /// Redesign with this feedback.
    Revise(String),
    Reject,
}

/// Human in the loop for debug builds.
#[async_trait]
pub trait PlanApprover: Send + Sync {
    /// `revision` is 0 for the first plan.
    async fn review_plan(&self, plan: &Plan, revision: u32) -> PlanDecision;

    /// Offered a design failure. Feedback retries the design, `None` gives up.
    async fn on_design_error(&self, _error: &DesignError) -> Option<String> {
        None
    }
}

/// Input to [`crate::factory::Factory::build`].
#[derive(Clone)]
pub struct BuildRequest {
    pub goal: String,
    pub mode: BuildMode,
    pub max_retries: u32,
    pub observer: Option<Arc<dyn StepObserver>>,
    pub approver: Option<Arc<dyn PlanApprover>>,
}

impl BuildRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            mode: BuildMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            observer: None,
            approver: None,
        }
    }

    pub fn mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn observer(mut self, observer: impl StepObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn approver(mut self, approver: impl PlanApprover + 'static) -> Self {
        self.approver = Some(Arc::new(approver));
        self
    }
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("goal", &self.goal)
            .field("mode", &self.mode)
            .field("max_retries", &self.max_retries)
            .field("observer", &self.observer.is_some())
            .field("approver", &self.approver.is_some())
            .finish()
    }
}

/// Accepted code for one sub-agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub code: String,
    pub path: PathBuf,
    /// Review attempts it took, starting at 1.
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildFailure {
    #[error("plan design failed: {0}")]
    Design(DesignError),
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error("sub-agent {name:?} (#{index}) failed review {attempts} times")]
    MaxRetriesExceeded {
        index: usize,
        name: String,
        attempts: u32,
        last_feedback: Feedback,
    },
    #[error("plan rejected: {0}")]
    PlanRejected(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] SinkError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BuildFailure {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildFailure::Design(_) => "design_error",
            BuildFailure::InvalidPlan(_) => "invalid_plan",
            BuildFailure::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            BuildFailure::PlanRejected(_) => "plan_rejected",
            BuildFailure::Persistence(_) => "persistence_error",
            BuildFailure::Configuration(_) => "configuration_error",
        }
    }
}

#[derive(Debug)]
pub enum BuildStatus {
    Success,
    Failure(BuildFailure),
    /// The observer vetoed at `step`.
    Cancelled { step: String },
}

impl BuildStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failure(_) => "failure",
            BuildStatus::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        match self {
            BuildStatus::Failure(f) => Some(f),
            _ => None,
        }
    }
}

/// Terminal output of one build. Artifacts are only present on success.
#[derive(Debug)]
pub struct BuildResult {
    pub build_id: String,
    pub goal: String,
    pub mode: BuildMode,
    pub status: BuildStatus,
    pub plan: Option<Plan>,
    pub artifacts: BTreeMap<String, Artifact>,
    pub workspace: Option<PathBuf>,
    /// Every state the build passed through, in order.
    pub transitions: Vec<State>,
}
