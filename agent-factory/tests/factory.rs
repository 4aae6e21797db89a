mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use agent_factory::designer::DesignError;
use agent_factory::factory::{
    BuildFailure, BuildMode, BuildStatus, Factory, PlanApprover, PlanDecision, State,
};
use agent_factory::llm::{LlmClient, LlmError, Role};
use agent_factory::plan::{Plan, PlanError};
use agent_factory::trace::{Stage, read_records};
use agent_factory::workspace::{FsArtifactSink, slugify};

use common::*;

fn weather_plan() -> String {
    plan_json(vec![
        subagent("fetcher", &[]),
        subagent("formatter", &["fetcher"]),
    ])
}

#[tokio::test]
async fn weather_bot_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, prompt, _| {
        Ok(match role {
            Role::Designer => weather_plan(),
            Role::Generator if is_for(prompt, "fetcher") && !prompt.contains("REJECTED") => {
                NO_RUN_CODE.to_string()
            }
            Role::Generator => format!("```python\n{GOOD_CODE}```"),
            _ => "APPROVED".to_string(),
        })
    });
    let factory = factory(llm.clone(), dir.path());

    let goal = "Build a weather bot that tells me the weather in London";
    let result = factory.build(request(goal, 2)).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert_eq!(
        result.artifacts.keys().collect::<Vec<_>>(),
        vec!["fetcher", "formatter"]
    );
    assert_eq!(result.artifacts["fetcher"].attempts, 2);
    assert_eq!(result.artifacts["formatter"].attempts, 1);
    assert_eq!(result.artifacts["formatter"].code, GOOD_CODE);

    // The failing first attempt never reached the model reviewer.
    assert_eq!(llm.count(Role::Generator), 3);
    assert_eq!(llm.count(Role::Reviewer), 2);

    let root = result.workspace.clone().unwrap();
    assert_eq!(root.parent().unwrap(), dir.path().join(slugify(goal)));
    let mut names: Vec<String> = files_under(&root)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "fetcher.py",
            "formatter.py",
            "plan.json",
            "trace_@designer.jsonl",
            "trace_fetcher.jsonl",
            "trace_formatter.jsonl",
        ]
    );
    let saved: Plan =
        serde_json::from_str(&std::fs::read_to_string(root.join("plan.json")).unwrap()).unwrap();
    assert_eq!(Some(&saved), result.plan.as_ref());

    assert_eq!(
        result.transitions,
        vec![
            State::Idle,
            State::Planning,
            State::PlanReady,
            State::Building(0),
            State::Reviewing(0),
            State::Retrying(0),
            State::Building(0),
            State::Reviewing(0),
            State::Building(1),
            State::Reviewing(1),
            State::Done,
            State::Succeeded,
        ]
    );
}

#[tokio::test]
async fn success_has_one_artifact_per_subagent() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(3),
            Role::Generator => GOOD_CODE.to_string(),
            _ => r#"{"approved": true, "issues": []}"#.to_string(),
        })
    });

    let result = factory(llm, dir.path()).build(request("three parts", 0)).await;

    assert!(result.status.is_success());
    let plan = result.plan.as_ref().unwrap();
    let planned: Vec<&str> = plan.subagents.iter().map(|s| s.name.as_str()).collect();
    let built: Vec<&str> = result.artifacts.keys().map(String::as_str).collect();
    assert_eq!(planned, built);
    for artifact in result.artifacts.values() {
        assert_eq!(std::fs::read_to_string(&artifact.path).unwrap(), artifact.code);
    }
}

#[tokio::test]
async fn retries_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(1),
            Role::Generator => NO_RUN_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm.clone(), dir.path()).build(request("never right", 3)).await;

    match result.status.failure() {
        Some(BuildFailure::MaxRetriesExceeded {
            index,
            name,
            attempts,
            last_feedback,
        }) => {
            assert_eq!(*index, 0);
            assert_eq!(name, "a0");
            assert_eq!(*attempts, 4);
            assert!(last_feedback.issues.iter().any(|i| i.contains("missing function")));
        }
        other => panic!("expected max retries, got {other:?}"),
    }
    assert_eq!(llm.count(Role::Generator), 4);
    assert_eq!(llm.count(Role::Reviewer), 0);
    assert!(result.artifacts.is_empty());
    assert_eq!(result.transitions.last(), Some(&State::Failed));
}

#[tokio::test]
async fn retry_prompt_carries_reviewer_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, n| {
        Ok(match role {
            Role::Designer => chain_plan(1),
            Role::Generator if n == 0 => NO_RUN_CODE.to_string(),
            Role::Generator => GOOD_CODE.to_string(),
            Role::Reviewer if n == 0 => {
                r#"{"approved": false, "issues": ["does not handle timeouts"], "suggestions": ["wrap the request"]}"#
                    .to_string()
            }
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm.clone(), dir.path()).build(request("feedback", 3)).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert_eq!(result.artifacts["a0"].attempts, 3);
    let prompts = llm.prompts(Role::Generator);
    assert_eq!(prompts.len(), 3);
    assert!(!prompts[0].contains("REJECTED"));
    assert!(prompts[1].contains("missing function"));
    assert!(prompts[1].contains(NO_RUN_CODE.trim_end()));
    assert!(prompts[2].contains("does not handle timeouts"));
    assert!(prompts[2].contains("wrap the request"));
}

#[tokio::test]
async fn failure_stops_later_subagents() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, prompt, _| {
        Ok(match role {
            Role::Designer => chain_plan(5),
            Role::Generator if is_for(prompt, "a1") => NO_RUN_CODE.to_string(),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm.clone(), dir.path()).build(request("five parts", 1)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::MaxRetriesExceeded { index: 1, .. })
    ));
    let prompts = llm.prompts(Role::Generator);
    assert_eq!(prompts.len(), 3);
    for later in ["a2", "a3", "a4"] {
        assert!(!prompts.iter().any(|p| is_for(p, later)));
    }
    assert!(result.artifacts.is_empty());
    assert!(!result.transitions.contains(&State::Building(2)));

    // Files of accepted sub-agents stay on disk for diagnosis.
    let root = result.workspace.unwrap();
    assert!(root.join("a0.py").exists());
    assert!(!root.join("a1.py").exists());
}

#[tokio::test]
async fn veto_at_start_cancels_before_any_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| Ok(chain_plan(1)));
    let steps = Arc::new(Mutex::new(Vec::new()));
    let seen = steps.clone();
    let req = request("weather bot", 3).observer(move |step: &str, _: &Value| {
        seen.lock().unwrap().push(step.to_string());
        step != "build:start"
    });

    let result = factory(llm.clone(), dir.path()).build(req).await;

    match &result.status {
        BuildStatus::Cancelled { step } => assert_eq!(step, "build:start"),
        other => panic!("expected cancel, got {other:?}"),
    }
    assert!(llm.calls().is_empty());
    assert!(result.artifacts.is_empty());
    assert!(files_under(dir.path()).is_empty());
    assert_eq!(
        *steps.lock().unwrap(),
        vec!["build:start".to_string(), "build:complete".to_string()]
    );
    assert_eq!(
        result.transitions,
        vec![State::Idle, State::Planning, State::Cancelled]
    );
}

#[tokio::test]
async fn veto_mid_build_stops_generation() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(3),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });
    let req = request("three parts", 0).observer(|step: &str, payload: &Value| {
        !(step == "generate:start" && payload["name"] == "a1")
    });

    let result = factory(llm.clone(), dir.path()).build(req).await;

    assert!(matches!(&result.status, BuildStatus::Cancelled { step } if step == "generate:start"));
    let prompts = llm.prompts(Role::Generator);
    assert_eq!(prompts.len(), 1);
    assert!(is_for(&prompts[0], "a0"));
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn observer_sees_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(1),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });
    let steps = Arc::new(Mutex::new(Vec::new()));
    let seen = steps.clone();
    let req = request("one part", 0).observer(move |step: &str, payload: &Value| {
        seen.lock().unwrap().push((step.to_string(), payload.clone()));
        true
    });

    let result = factory(llm, dir.path()).build(req).await;

    assert!(result.status.is_success());
    let steps = steps.lock().unwrap();
    let names: Vec<&str> = steps.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "build:start",
            "design:start",
            "design:complete",
            "generate:start",
            "review:start",
            "review:verdict",
            "artifact:persisted",
            "build:complete",
        ]
    );
    let (_, review) = &steps[4];
    assert_eq!(review["code"], GOOD_CODE);
    let (_, verdict) = &steps[5];
    assert_eq!(verdict["verdict"]["verdict"], "pass");
    let (_, done) = &steps[7];
    assert_eq!(done["status"], "success");
}

#[tokio::test]
async fn empty_plan_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| Ok(plan_json(vec![])));

    let result = factory(llm.clone(), dir.path()).build(request("nothing", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::InvalidPlan(PlanError::Empty))
    ));
    assert_eq!(llm.count(Role::Generator), 0);
}

#[tokio::test]
async fn duplicate_names_are_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| {
        Ok(plan_json(vec![subagent("fetcher", &[]), subagent("fetcher", &[])]))
    });

    let result = factory(llm.clone(), dir.path()).build(request("dupes", 3)).await;

    match result.status.failure() {
        Some(BuildFailure::InvalidPlan(PlanError::DuplicateName(name))) => {
            assert_eq!(name, "fetcher")
        }
        other => panic!("expected duplicate name, got {other:?}"),
    }
    assert_eq!(llm.count(Role::Generator), 0);
}

#[tokio::test]
async fn unknown_dependency_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| Ok(plan_json(vec![subagent("formatter", &["fetcher"])])));

    let result = factory(llm, dir.path()).build(request("orphan", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::InvalidPlan(PlanError::UnknownDependency { .. }))
    ));
}

#[tokio::test]
async fn dependencies_are_built_first() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => plan_json(vec![
                subagent("formatter", &["fetcher"]),
                subagent("fetcher", &[]),
            ]),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm.clone(), dir.path()).build(request("reorder", 0)).await;

    assert!(result.status.is_success());
    let order: Vec<String> = result
        .plan
        .unwrap()
        .subagents
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(order, vec!["fetcher", "formatter"]);
    let prompts = llm.prompts(Role::Generator);
    assert!(is_for(&prompts[0], "fetcher"));
    assert!(is_for(&prompts[1], "formatter"));
    assert!(prompts[1].contains("Upstream sub-agents this one consumes"));
}

#[tokio::test]
async fn malformed_design_gets_one_repair() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| Ok("I think you need three agents.".to_string()));

    let result = factory(llm.clone(), dir.path()).build(request("garbled", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::Design(DesignError::Malformed { .. }))
    ));
    assert_eq!(llm.count(Role::Designer), 2);
    assert_eq!(result.status.failure().unwrap().kind(), "design_error");
}

#[tokio::test]
async fn repaired_design_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, n| {
        Ok(match role {
            Role::Designer if n == 0 => "Here is my plan: three agents.".to_string(),
            Role::Designer => format!("```json\n{}\n```", chain_plan(1)),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm.clone(), dir.path()).build(request("repair", 0)).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert!(llm.prompts(Role::Designer)[1].contains("ONLY the JSON object"));
}

#[tokio::test]
async fn missing_credential_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(LlmClient::new(None));
    let factory = Factory::with_llm(llm, Arc::new(FsArtifactSink::new(dir.path())));

    let result = factory.build(request("weather bot", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::Configuration(_))
    ));
    assert_eq!(result.status.failure().unwrap().kind(), "configuration_error");
}

#[tokio::test]
async fn empty_goal_fails_without_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|_, _, _| Ok(chain_plan(1)));

    let result = factory(llm.clone(), dir.path()).build(request("   ", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::Design(DesignError::EmptyGoal))
    ));
    assert!(result.workspace.is_none());
    assert!(llm.calls().is_empty());
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn unwritable_sink_is_a_persistence_error() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(2),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });
    let sink = Arc::new(FailingSink {
        inner: FsArtifactSink::new(dir.path()),
    });
    let factory = Factory::with_llm(llm.clone(), sink);

    let result = factory.build(request("read only", 3)).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::Persistence(_))
    ));
    assert!(result.artifacts.is_empty());
    assert_eq!(llm.count(Role::Generator), 1);
}

#[tokio::test]
async fn generator_outage_retries_through_review() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, n| match role {
        Role::Designer => Ok(chain_plan(1)),
        Role::Generator if n == 0 => Err(LlmError::Api {
            status: 500,
            message: "overloaded".to_string(),
        }),
        Role::Generator => Ok(GOOD_CODE.to_string()),
        _ => Ok("APPROVED".to_string()),
    });

    let result = factory(llm.clone(), dir.path()).build(request("flaky", 1)).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert_eq!(result.artifacts["a0"].attempts, 2);
    assert!(llm.prompts(Role::Generator)[1].contains("code generation failed"));
}

#[tokio::test]
async fn trace_files_record_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, n| {
        Ok(match role {
            Role::Designer => chain_plan(1),
            Role::Generator if n == 0 => NO_RUN_CODE.to_string(),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm, dir.path()).build(request("traced", 1)).await;
    let root = result.workspace.unwrap();

    let records = read_records(&root.join("trace_a0.jsonl")).await.unwrap();
    assert!(records.iter().all(|r| r.subagent == "a0" && r.build_id == result.build_id));
    assert!(records.iter().any(|r| r.attempt == 1 && r.event == "static_fail"));
    assert!(records.iter().any(|r| r.attempt == 2 && r.event == "written"));
    assert!(records.iter().any(|r| r.request.is_some() && r.response.is_some()));

    let designer = read_records(&root.join("trace_@designer.jsonl")).await.unwrap();
    let last = designer.last().unwrap();
    assert_eq!(last.event, "finished");
    assert_eq!(last.detail.as_ref().unwrap()["status"], "success");
}

#[tokio::test]
async fn subagent_named_designer_keeps_its_own_trace() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => plan_json(vec![subagent("designer", &[])]),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });

    let result = factory(llm, dir.path()).build(request("meta agent", 0)).await;
    assert!(result.status.is_success(), "{:?}", result.status);
    let root = result.workspace.unwrap();

    let own = read_records(&root.join("trace_designer.jsonl")).await.unwrap();
    assert!(!own.is_empty());
    assert!(own.iter().all(|r| r.subagent == "designer"));
    assert!(own.iter().all(|r| r.stage != Stage::Design && r.event != "finished"));
    assert!(own.iter().any(|r| r.stage == Stage::Generate));

    let design = read_records(&root.join("trace_@designer.jsonl")).await.unwrap();
    assert!(design.iter().all(|r| r.subagent == "@designer"));
    assert!(design.iter().any(|r| r.stage == Stage::Design));
    assert!(design.iter().all(|r| r.stage != Stage::Generate && r.stage != Stage::Review));
    assert_eq!(design.last().unwrap().event, "finished");
}

#[tokio::test]
async fn concurrent_builds_get_separate_workspaces() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => chain_plan(1),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });
    let factory = factory(llm, dir.path());

    let (a, b) = tokio::join!(
        factory.build(request("same goal", 0)),
        factory.build(request("same goal", 0))
    );

    assert!(a.status.is_success() && b.status.is_success());
    assert_ne!(a.build_id, b.build_id);
    assert_ne!(a.workspace, b.workspace);
}

/// Answers plan reviews from a fixed list, recording the revisions it saw.
struct ScriptedApprover {
    decisions: Mutex<Vec<PlanDecision>>,
    seen: Mutex<Vec<u32>>,
    on_error: Option<String>,
}

impl ScriptedApprover {
    fn new(decisions: Vec<PlanDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().rev().collect()),
            seen: Mutex::new(Vec::new()),
            on_error: None,
        }
    }
}

#[async_trait]
impl PlanApprover for ScriptedApprover {
    async fn review_plan(&self, _plan: &Plan, revision: u32) -> PlanDecision {
        self.seen.lock().unwrap().push(revision);
        self.decisions
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(PlanDecision::Approve)
    }

    async fn on_design_error(&self, _error: &DesignError) -> Option<String> {
        self.on_error.clone()
    }
}

fn debug_llm() -> Arc<ScriptedLlm> {
    ScriptedLlm::new(|role, _, _| {
        Ok(match role {
            Role::Designer => weather_plan(),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    })
}

#[tokio::test]
async fn debug_plan_revision_then_approval() {
    let dir = tempfile::tempdir().unwrap();
    let llm = debug_llm();
    let approver = Arc::new(ScriptedApprover::new(vec![
        PlanDecision::Revise("merge the formatter into the fetcher".to_string()),
        PlanDecision::Approve,
    ]));
    let mut req = request("weather bot", 0).mode(BuildMode::Debug);
    req.approver = Some(approver.clone());

    let result = factory(llm.clone(), dir.path()).build(req).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert_eq!(*approver.seen.lock().unwrap(), vec![0, 1]);
    let prompts = llm.prompts(Role::Designer);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("REVISED"));
    assert!(prompts[1].contains("REVISED"));
    assert!(prompts[1].contains("merge the formatter into the fetcher"));
}

#[tokio::test]
async fn debug_plan_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let llm = debug_llm();
    let req = request("weather bot", 0)
        .mode(BuildMode::Debug)
        .approver(ScriptedApprover::new(vec![PlanDecision::Reject]));

    let result = factory(llm.clone(), dir.path()).build(req).await;

    assert!(matches!(
        result.status.failure(),
        Some(BuildFailure::PlanRejected(_))
    ));
    assert_eq!(llm.count(Role::Generator), 0);
    assert!(result.plan.is_none());
}

#[tokio::test]
async fn debug_revisions_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let llm = debug_llm();
    let req = request("weather bot", 0)
        .mode(BuildMode::Debug)
        .approver(ScriptedApprover::new(vec![
            PlanDecision::Revise("again".to_string());
            5
        ]));

    let result = factory(llm.clone(), dir.path())
        .with_max_plan_revisions(1)
        .build(req)
        .await;

    match result.status.failure() {
        Some(BuildFailure::PlanRejected(reason)) => assert!(reason.contains("after 1 revisions")),
        other => panic!("expected plan rejection, got {other:?}"),
    }
    assert_eq!(llm.count(Role::Designer), 2);
}

#[tokio::test]
async fn debug_design_error_can_be_retried_with_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let llm = ScriptedLlm::new(|role, _, n| {
        Ok(match role {
            Role::Designer if n < 2 => "no plan today".to_string(),
            Role::Designer => chain_plan(1),
            Role::Generator => GOOD_CODE.to_string(),
            _ => "APPROVED".to_string(),
        })
    });
    let mut approver = ScriptedApprover::new(vec![]);
    approver.on_error = Some("answer in JSON".to_string());
    let req = request("stubborn", 0)
        .mode(BuildMode::Debug)
        .approver(approver);

    let result = factory(llm.clone(), dir.path()).build(req).await;

    assert!(result.status.is_success(), "{:?}", result.status);
    assert_eq!(llm.count(Role::Designer), 3);
    assert!(llm.prompts(Role::Designer)[2].contains("answer in JSON"));
}

#[tokio::test]
async fn automated_mode_ignores_approver() {
    let dir = tempfile::tempdir().unwrap();
    let req = request("weather bot", 0)
        .approver(ScriptedApprover::new(vec![PlanDecision::Reject]));

    let result = factory(debug_llm(), dir.path()).build(req).await;

    assert!(result.status.is_success());
}
