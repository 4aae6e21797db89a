//! Agent factory orchestrator.
//!
//! Turns a goal into a validated plan, then builds each sub-agent in plan
//! order: generate, review, and regenerate with the reviewer's feedback until
//! the code passes or the retry budget runs out. Stages:
//! - Designer: goal to plan
//! - Generator: sub-agent spec to Python module
//! - Reviewer: static checks plus model judgment
//!
//! The caller's [`StepObserver`] sees every step and can veto before each
//! model call.

mod build;
mod orchestrator;

pub use build::{
    Artifact, BuildFailure, BuildMode, BuildRequest, BuildResult, BuildStatus,
    DEFAULT_MAX_RETRIES, PlanApprover, PlanDecision, State, StepObserver,
};
pub use orchestrator::{DEFAULT_MAX_PLAN_REVISIONS, Factory};
