//! Factory orchestrator: plan, then generate and review each sub-agent in
//! order with a bounded retry loop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::Instrument;

use super::build::{
    Artifact, BuildFailure, BuildMode, BuildRequest, BuildResult, BuildStatus, PlanDecision, State,
};
use crate::designer::{DesignError, Designer, LlmDesigner};
use crate::generator::{Generator, LlmGenerator, PriorAttempt};
use crate::llm::{LlmBackend, LlmError};
use crate::plan::{Plan, PlanError, SubAgentSpec};
use crate::reviewer::{Feedback, LlmReviewer, Reviewer, Verdict};
use crate::trace::{Stage, Trace};
use crate::workspace::{ArtifactSink, DESIGN_TRACE, SinkError, Workspace, new_build_id};

/// Default bound on debug-mode plan revisions.
pub const DEFAULT_MAX_PLAN_REVISIONS: u32 = 3;

/// Why a build stopped early.
enum Halt {
    Cancelled(String),
    Failed(BuildFailure),
}

impl From<PlanError> for Halt {
    fn from(e: PlanError) -> Self {
        Halt::Failed(BuildFailure::InvalidPlan(e))
    }
}

impl From<SinkError> for Halt {
    fn from(e: SinkError) -> Self {
        Halt::Failed(BuildFailure::Persistence(e))
    }
}

/// Mutable state of one `build()` call. Never shared between builds.
struct Run<'a> {
    request: &'a BuildRequest,
    build_id: String,
    workspace: Option<Workspace>,
    plan: Option<Plan>,
    artifacts: BTreeMap<String, Artifact>,
    transitions: Vec<State>,
}

impl Run<'_> {
    fn enter(&mut self, state: State) {
        tracing::debug!(%state, "State transition");
        self.transitions.push(state);
    }

    fn trace(&self, subagent: &str) -> Trace {
        match &self.workspace {
            Some(ws) => Trace::new(ws.trace_path(subagent), &self.build_id, subagent),
            None => Trace::disabled(),
        }
    }

    /// Offer the observer a veto point.
    fn checkpoint(&self, step: &str, payload: Value) -> Result<(), Halt> {
        if let Some(observer) = &self.request.observer
            && !observer.on_step(step, &payload)
        {
            tracing::info!(step, "Build cancelled by observer");
            return Err(Halt::Cancelled(step.to_string()));
        }
        Ok(())
    }
}

/// The agent factory.
pub struct Factory {
    designer: Arc<dyn Designer>,
    generator: Arc<dyn Generator>,
    reviewer: Arc<dyn Reviewer>,
    sink: Arc<dyn ArtifactSink>,
    resources: Vec<String>,
    max_plan_revisions: u32,
}

impl Factory {
    pub fn new(
        designer: Arc<dyn Designer>,
        generator: Arc<dyn Generator>,
        reviewer: Arc<dyn Reviewer>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            designer,
            generator,
            reviewer,
            sink,
            resources: Vec::new(),
            max_plan_revisions: DEFAULT_MAX_PLAN_REVISIONS,
        }
    }

    /// All three stages backed by the same model client.
    pub fn with_llm(llm: Arc<dyn LlmBackend>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self::new(
            Arc::new(LlmDesigner::new(llm.clone())),
            Arc::new(LlmGenerator::new(llm.clone())),
            Arc::new(LlmReviewer::new(llm)),
            sink,
        )
    }

    /// Resources the designer may plan around (APIs, datasets, tools).
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_max_plan_revisions(mut self, max: u32) -> Self {
        self.max_plan_revisions = max;
        self
    }

    /// Run one build to completion. Every outcome, including failures and
    /// cancellation, is reported through [`BuildResult::status`].
    pub async fn build(&self, request: BuildRequest) -> BuildResult {
        let build_id = new_build_id();
        let span = tracing::info_span!("build", build_id = %build_id, goal = %request.goal);
        self.build_inner(&request, build_id).instrument(span).await
    }

    async fn build_inner(&self, request: &BuildRequest, build_id: String) -> BuildResult {
        let mut run = Run {
            request,
            build_id,
            workspace: None,
            plan: None,
            artifacts: BTreeMap::new(),
            transitions: vec![State::Idle],
        };

        tracing::info!(mode = %request.mode, max_retries = request.max_retries, "Build started");
        let outcome = self.execute(&mut run).await;

        let status = match outcome {
            Ok(()) => {
                run.enter(State::Succeeded);
                tracing::info!(artifacts = run.artifacts.len(), "Build succeeded");
                BuildStatus::Success
            }
            Err(Halt::Cancelled(step)) => {
                run.enter(State::Cancelled);
                run.artifacts.clear();
                BuildStatus::Cancelled { step }
            }
            Err(Halt::Failed(failure)) => {
                run.enter(State::Failed);
                run.artifacts.clear();
                tracing::warn!(kind = failure.kind(), error = %failure, "Build failed");
                BuildStatus::Failure(failure)
            }
        };

        // A veto at the first step leaves the workspace empty.
        let vetoed_at_start =
            matches!(&status, BuildStatus::Cancelled { step } if step == "build:start");
        if !vetoed_at_start {
            run.trace(DESIGN_TRACE)
                .event(
                    Stage::State,
                    "finished",
                    Some(json!({ "status": status.label(), "transitions": run.transitions })),
                )
                .await;
        }

        if let Some(observer) = &request.observer {
            // Informational only: nothing is left to cancel.
            let _ = observer.on_step(
                "build:complete",
                &json!({
                    "build_id": run.build_id,
                    "status": status.label(),
                    "artifacts": run.artifacts.keys().collect::<Vec<_>>(),
                }),
            );
        }

        BuildResult {
            build_id: run.build_id,
            goal: request.goal.clone(),
            mode: request.mode,
            status,
            plan: run.plan,
            artifacts: run.artifacts,
            workspace: run.workspace.map(|ws| ws.root),
            transitions: run.transitions,
        }
    }

    async fn execute(&self, run: &mut Run<'_>) -> Result<(), Halt> {
        let request = run.request;
        if request.goal.trim().is_empty() {
            return Err(Halt::Failed(BuildFailure::Design(DesignError::EmptyGoal)));
        }

        // IDLE -> PLANNING: the workspace exists before any model call.
        let workspace = self.sink.allocate(&request.goal, &run.build_id).await?;
        let root = workspace.root.clone();
        run.workspace = Some(workspace);
        run.enter(State::Planning);
        run.checkpoint(
            "build:start",
            json!({
                "build_id": run.build_id,
                "goal": request.goal,
                "mode": request.mode,
                "max_retries": request.max_retries,
                "workspace": root,
            }),
        )?;

        let plan = self.plan_phase(run).await?;
        if let Some(ws) = &run.workspace {
            self.sink.write_plan(ws, &plan).await?;
        }
        run.plan = Some(plan.clone());
        run.enter(State::PlanReady);

        for (index, spec) in plan.subagents.iter().enumerate() {
            let span = tracing::info_span!("subagent", name = %spec.name, index);
            self.build_subagent(run, &plan, index, spec)
                .instrument(span)
                .await?;
        }

        run.enter(State::Done);
        Ok(())
    }

    /// Design, validate and (in debug mode) get approval for a plan.
    async fn plan_phase(&self, run: &mut Run<'_>) -> Result<Plan, Halt> {
        let request = run.request;
        let approver = match request.mode {
            BuildMode::Debug => request.approver.clone(),
            BuildMode::Automated => None,
        };
        let trace = run.trace(DESIGN_TRACE);
        let mut feedback: Option<String> = None;
        let mut revision = 0u32;

        loop {
            run.checkpoint(
                "design:start",
                json!({ "revision": revision, "feedback": feedback }),
            )?;
            trace
                .at_attempt(revision + 1)
                .event(Stage::State, "planning", None)
                .await;

            let designed = self
                .designer
                .design(
                    &request.goal,
                    &self.resources,
                    feedback.as_deref(),
                    &trace.at_attempt(revision + 1),
                )
                .await;

            let plan = match designed {
                Ok(plan) => plan.validate()?,
                Err(DesignError::Llm(LlmError::MissingCredential)) => {
                    return Err(Halt::Failed(BuildFailure::Configuration(
                        LlmError::MissingCredential.to_string(),
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Plan design failed");
                    let retry = match &approver {
                        Some(a) if revision < self.max_plan_revisions => {
                            a.on_design_error(&e).await
                        }
                        _ => None,
                    };
                    match retry {
                        Some(text) => {
                            feedback = Some(text);
                            revision += 1;
                            continue;
                        }
                        None => return Err(Halt::Failed(BuildFailure::Design(e))),
                    }
                }
            };

            tracing::info!(subagents = plan.subagents.len(), revision, "Plan ready");
            run.checkpoint(
                "design:complete",
                json!({ "revision": revision, "plan": plan }),
            )?;

            let Some(approver) = &approver else {
                return Ok(plan);
            };
            match approver.review_plan(&plan, revision).await {
                PlanDecision::Approve => return Ok(plan),
                PlanDecision::Reject => {
                    return Err(Halt::Failed(BuildFailure::PlanRejected(
                        "rejected by reviewer".to_string(),
                    )));
                }
                PlanDecision::Revise(text) => {
                    if revision >= self.max_plan_revisions {
                        return Err(Halt::Failed(BuildFailure::PlanRejected(format!(
                            "no approved plan after {} revisions",
                            self.max_plan_revisions
                        ))));
                    }
                    tracing::info!(revision, "Plan revision requested");
                    feedback = Some(text);
                    revision += 1;
                }
            }
        }
    }

    /// BUILDING(i) -> REVIEWING(i) -> [RETRYING(i) -> BUILDING(i)]* until the
    /// reviewer passes the code or the retry budget is gone.
    async fn build_subagent(
        &self,
        run: &mut Run<'_>,
        plan: &Plan,
        index: usize,
        spec: &SubAgentSpec,
    ) -> Result<(), Halt> {
        let max_retries = run.request.max_retries;
        let context = plan.context_for(spec);
        let trace = run.trace(&spec.name);
        let mut prior: Option<(String, Feedback)> = None;
        let mut retries = 0u32;

        loop {
            let attempt = retries + 1;
            let trace = trace.at_attempt(attempt);

            run.enter(State::Building(index));
            trace.event(Stage::State, "building", None).await;
            run.checkpoint(
                "generate:start",
                json!({ "index": index, "name": spec.name, "attempt": attempt }),
            )?;
            let code = self
                .generator
                .generate(
                    spec,
                    &context,
                    prior.as_ref().map(|(code, feedback)| PriorAttempt { code, feedback }),
                    &trace,
                )
                .await;

            run.enter(State::Reviewing(index));
            trace.event(Stage::State, "reviewing", None).await;
            run.checkpoint(
                "review:start",
                json!({ "index": index, "name": spec.name, "attempt": attempt, "code": code }),
            )?;
            let verdict = self.reviewer.review(&code, spec, &trace).await;
            trace
                .event(Stage::Review, "verdict", serde_json::to_value(&verdict).ok())
                .await;
            run.checkpoint(
                "review:verdict",
                json!({ "index": index, "name": spec.name, "attempt": attempt, "verdict": verdict }),
            )?;

            match verdict {
                Verdict::Pass => {
                    let path = self.persist(run, spec, &code, &trace).await?;
                    tracing::info!(attempt, path = %path.display(), "Sub-agent accepted");
                    run.artifacts.insert(
                        spec.name.clone(),
                        Artifact {
                            name: spec.name.clone(),
                            code,
                            path: path.clone(),
                            attempts: attempt,
                        },
                    );
                    run.checkpoint(
                        "artifact:persisted",
                        json!({ "index": index, "name": spec.name, "path": path }),
                    )?;
                    return Ok(());
                }
                Verdict::Fail(feedback) if retries < max_retries => {
                    tracing::info!(
                        attempt,
                        issues = ?feedback.issues,
                        "Review failed, regenerating with feedback"
                    );
                    retries += 1;
                    run.enter(State::Retrying(index));
                    trace
                        .event(
                            Stage::State,
                            "retrying",
                            Some(json!({ "retry": retries, "max_retries": max_retries })),
                        )
                        .await;
                    prior = Some((code, feedback));
                }
                Verdict::Fail(feedback) => {
                    tracing::warn!(attempts = attempt, issues = ?feedback.issues, "Retry budget exhausted");
                    return Err(Halt::Failed(BuildFailure::MaxRetriesExceeded {
                        index,
                        name: spec.name.clone(),
                        attempts: attempt,
                        last_feedback: feedback,
                    }));
                }
            }
        }
    }

    async fn persist(
        &self,
        run: &Run<'_>,
        spec: &SubAgentSpec,
        code: &str,
        trace: &Trace,
    ) -> Result<PathBuf, Halt> {
        let Some(ws) = &run.workspace else {
            return Err(Halt::Failed(BuildFailure::Configuration(
                "no workspace allocated".to_string(),
            )));
        };
        let path = self.sink.write_artifact(ws, &spec.name, code).await?;
        trace
            .event(Stage::Persist, "written", Some(json!({ "path": path })))
            .await;
        Ok(path)
    }
}
