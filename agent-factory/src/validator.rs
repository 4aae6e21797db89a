//! Validator: run an artifact in the sandbox and have a judge score the output.
//!
//! Sits outside the build loop. `success` depends only on the execution, so
//! re-validating a deterministic artifact gives the same answer; the score
//! comes from the judge and can vary between runs.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::{LlmBackend, Role};
use crate::plan::{Plan, SubAgentSpec, extract_json};
use crate::sandbox::Sandbox;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Input and criteria derived from a sub-agent's spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub criteria: Vec<String>,
}

/// Build a test case from what a sub-agent spec says it consumes and
/// produces. Plan-level evaluation criteria are included.
pub fn derive_test_case(spec: &SubAgentSpec, plan: Option<&Plan>) -> TestCase {
    let input = if spec.inputs.is_empty() {
        format!("Test input for {}", spec.name)
    } else {
        let fields: serde_json::Map<String, serde_json::Value> = spec
            .inputs
            .iter()
            .map(|f| {
                let sample = if f.description.is_empty() {
                    format!("sample {}", f.name)
                } else {
                    format!("sample {}: {}", f.name, f.description)
                };
                (f.name.clone(), serde_json::Value::String(sample))
            })
            .collect();
        serde_json::Value::Object(fields).to_string()
    };

    let mut criteria: Vec<String> = plan
        .map(|p| p.evaluation_criteria.clone())
        .unwrap_or_default();
    let goal = if spec.goal.is_empty() {
        "goal not specified"
    } else {
        spec.goal.as_str()
    };
    criteria.push(format!("Should accomplish: {goal}"));
    for out in &spec.outputs {
        criteria.push(format!("Produces {}", out.name));
    }
    TestCase { input, criteria }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub success: bool,
    /// 1 (worst) to 5 (best).
    pub score: u8,
    pub findings: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

const JUDGE_PROMPT: &str = r#"You are a QA lead judging one run of a generated agent.
Given the test input, the agent's output and the evaluation criteria, score how well the output meets the criteria from 1 (fails) to 5 (fully meets).

Reply with a single JSON object and nothing else:
{"score": 1-5, "findings": "short rationale"}"#;

pub struct Validator {
    sandbox: Arc<dyn Sandbox>,
    judge: Arc<dyn LlmBackend>,
}

impl Validator {
    pub fn new(sandbox: Arc<dyn Sandbox>, judge: Arc<dyn LlmBackend>) -> Self {
        Self { sandbox, judge }
    }

    /// Never fails: sandbox and judge problems land in the report.
    pub async fn validate(&self, code: &str, input: &str, criteria: &[String]) -> ValidationReport {
        let execution = match self.sandbox.send(code, input).await {
            Ok(execution) => execution,
            Err(e) => {
                tracing::warn!(error = %e, "Sandbox run failed");
                return ValidationReport {
                    success: false,
                    score: MIN_SCORE,
                    findings: format!("execution failed: {e}"),
                    output: None,
                    error: Some(e.to_string()),
                };
            }
        };

        if let Some(reason) = execution.failure_reason() {
            return ValidationReport {
                success: false,
                score: MIN_SCORE,
                findings: "agent raised an error".to_string(),
                output: execution.response,
                error: Some(reason),
            };
        }

        let output = execution.response.unwrap_or_default();
        let criteria_list: String = criteria.iter().map(|c| format!("- {c}\n")).collect();
        let prompt = format!(
            "Test input:\n{input}\n\nAgent output:\n{output}\n\nEvaluation criteria:\n{criteria_list}"
        );
        let (score, findings) = match self.judge.invoke(Role::Judge, JUDGE_PROMPT, &prompt).await {
            Ok(raw) => coerce_judgement(&raw),
            Err(e) => {
                tracing::warn!(error = %e, "Judge call failed");
                (MIN_SCORE, format!("judge unavailable: {e}"))
            }
        };
        tracing::info!(score, "Validation finished");

        ValidationReport {
            success: true,
            score,
            findings,
            output: Some(output),
            error: None,
        }
    }
}

static SCORE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)score\s*[:=]?\s*(\d+)").expect("static regex"));

#[derive(Deserialize)]
struct RawJudgement {
    score: serde_json::Value,
    #[serde(default, alias = "rationale", alias = "reason")]
    findings: String,
}

/// Pull a 1..=5 score and rationale out of the judge's reply.
pub fn coerce_judgement(raw: &str) -> (u8, String) {
    if let Ok(j) = serde_json::from_str::<RawJudgement>(extract_json(raw)) {
        let score = match &j.score {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(score) = score {
            return (clamp_score(score.round() as i64), j.findings);
        }
    }
    if let Some(n) = SCORE_LINE
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        return (clamp_score(n), raw.trim().to_string());
    }
    (
        MIN_SCORE,
        format!("judge reply had no score: {}", raw.trim()),
    )
}

fn clamp_score(n: i64) -> u8 {
    n.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as u8
}
