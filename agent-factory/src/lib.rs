//! agent-factory: builds small LLM agents from a natural-language goal.
//!
//! A designer turns the goal into a plan of sub-agents, a generator writes
//! each one, and a reviewer accepts or sends it back with feedback. The
//! validator runs finished artifacts in a sandbox and scores them.
//! - [`factory`]: the orchestrator and its state machine
//! - [`designer`], [`generator`], [`reviewer`]: the stages
//! - [`validator`], [`sandbox`]: post-build checks
//! - [`workspace`], [`trace`], [`history`]: what gets written down

pub mod config;
pub mod designer;
pub mod factory;
pub mod generator;
pub mod history;
pub mod llm;
pub mod output;
pub mod plan;
pub mod retry;
pub mod reviewer;
pub mod sandbox;
pub mod trace;
pub mod validator;
pub mod workspace;
