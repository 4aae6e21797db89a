//! Code reviewer: static checks first, then an LLM judgment coerced into a
//! [`Verdict`]. Never fails with an error: anything it cannot interpret
//! becomes a failing verdict.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::generator::{FAULT_MARKER, is_fault};
use crate::llm::{LlmBackend, Role};
use crate::plan::{SubAgentSpec, extract_json};
use crate::trace::{Stage, Trace};

/// Issue recorded when the reviewer's reply cannot be interpreted.
pub const INVALID_REVIEW_ISSUE: &str = "reviewer produced invalid output";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Feedback {
    pub fn issue(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
            suggestions: vec![],
        }
    }

    /// Numbered list suitable for a prompt or a terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, issue) in self.issues.iter().enumerate() {
            out.push_str(&format!("{}. {issue}\n", i + 1));
        }
        if !self.suggestions.is_empty() {
            out.push_str("Suggestions:\n");
            for s in &self.suggestions {
                out.push_str(&format!("- {s}\n"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail(Feedback),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, code: &str, spec: &SubAgentSpec, trace: &Trace) -> Verdict;
}

struct Unsafe {
    pattern: Regex,
    label: &'static str,
}

static UNSAFE: LazyLock<Vec<Unsafe>> = LazyLock::new(|| {
    [
        (r"\bsubprocess\b", "subprocess"),
        (r"\bos\s*\.\s*system\s*\(", "os.system"),
        (r"\bos\s*\.\s*popen\s*\(", "os.popen"),
        (r"\bos\s*\.\s*exec\w*\s*\(", "os.exec*"),
        (r"\bos\s*\.\s*spawn\w*\s*\(", "os.spawn*"),
        (r"(?:^|[^.\w])exec\s*\(", "exec()"),
        (r"(?:^|[^.\w])eval\s*\(", "eval()"),
        (r"(?:^|[^.\w])compile\s*\(", "compile()"),
        (r"\b__import__\s*\(", "__import__()"),
        (r"\bimportlib\b", "importlib"),
        (r"^\s*(?:import|from)\s+pty\b", "pty"),
        (r"\bctypes\b", "ctypes"),
    ]
    .into_iter()
    .map(|(p, label)| Unsafe {
        pattern: Regex::new(&format!("(?m){p}")).expect("static regex"),
        label,
    })
    .collect()
});

static AGENT_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:agent\s*(?::[^=\n]*)?=|(?:async\s+)?def\s+agent\b|class\s+agent\b)")
        .expect("static regex")
});

static RUN_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+run\s*\(").expect("static regex"));

/// Deterministic checks that can fail code without asking the model.
///
/// Rejects empty code, generator faults, unsafe constructs, and code that does
/// not expose a top-level `agent` with a `run` method.
pub fn static_check(code: &str) -> Option<Feedback> {
    if code.trim().is_empty() {
        return Some(Feedback::issue("generated code is empty"));
    }
    if is_fault(code) {
        let reason = code
            .trim_start()
            .trim_start_matches(FAULT_MARKER)
            .lines()
            .next()
            .unwrap_or("")
            .trim();
        return Some(Feedback {
            issues: vec![format!("code generation failed: {reason}")],
            suggestions: vec!["produce the complete module".to_string()],
        });
    }

    let mut feedback = Feedback::default();
    for u in UNSAFE.iter() {
        if u.pattern.is_match(code) {
            feedback
                .issues
                .push(format!("uses forbidden construct `{}`", u.label));
        }
    }
    if !feedback.issues.is_empty() {
        feedback
            .suggestions
            .push("remove process spawning and dynamic code execution".to_string());
    }

    if !AGENT_BINDING.is_match(code) {
        feedback
            .issues
            .push("missing top-level `agent` entry point".to_string());
    }
    if !RUN_METHOD.is_match(code) {
        feedback
            .issues
            .push("missing function `run(query: str) -> str`".to_string());
    }

    if feedback.issues.is_empty() {
        None
    } else {
        Some(feedback)
    }
}

#[derive(Deserialize)]
struct RawReview {
    approved: Option<bool>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Interpret the model's reply. Anything ambiguous fails.
pub fn coerce_verdict(raw: &str) -> Verdict {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("approved") || trimmed.eq_ignore_ascii_case("approved.") {
        return Verdict::Pass;
    }
    match serde_json::from_str::<RawReview>(extract_json(trimmed)) {
        Ok(RawReview {
            approved: Some(true),
            issues,
            ..
        }) if issues.is_empty() => Verdict::Pass,
        Ok(RawReview {
            approved: Some(_),
            issues,
            suggestions,
        }) => {
            let issues = if issues.is_empty() {
                vec!["reviewer rejected the code without listing issues".to_string()]
            } else {
                issues
            };
            Verdict::Fail(Feedback {
                issues,
                suggestions,
            })
        }
        _ => Verdict::Fail(Feedback::issue(INVALID_REVIEW_ISSUE)),
    }
}

const SYSTEM_PROMPT: &str = r#"You are a strict code reviewer for an agent factory. You check one Python module against its specification.

The module must:
- implement the specification's goal, inputs and outputs
- define a top-level object named `agent` with a method `run(query: str) -> str`
- avoid spawning processes and dynamic code execution
- handle errors instead of crashing

Reply with a single JSON object and nothing else:
{"approved": true|false, "issues": ["..."], "suggestions": ["..."]}
Approve only when there are no issues."#;

/// Reviewer backed by an LLM.
pub struct LlmReviewer {
    llm: Arc<dyn LlmBackend>,
}

impl LlmReviewer {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Reviewer for LlmReviewer {
    async fn review(&self, code: &str, spec: &SubAgentSpec, trace: &Trace) -> Verdict {
        if let Some(feedback) = static_check(code) {
            tracing::info!(issues = feedback.issues.len(), "Static review failed");
            trace
                .event(
                    Stage::Review,
                    "static_fail",
                    serde_json::to_value(&feedback).ok(),
                )
                .await;
            return Verdict::Fail(feedback);
        }

        let spec_json = serde_json::to_string_pretty(spec).unwrap_or_default();
        let prompt = format!("Specification:\n{spec_json}\n\nCode:\n```python\n{code}\n```");
        match self.llm.invoke(Role::Reviewer, SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => {
                trace.exchange(Stage::Review, &prompt, &raw).await;
                let verdict = coerce_verdict(&raw);
                if let Verdict::Fail(f) = &verdict
                    && f.issues.iter().any(|i| i == INVALID_REVIEW_ISSUE)
                {
                    tracing::warn!("Reviewer output could not be interpreted");
                }
                verdict
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reviewer call failed");
                trace
                    .event(
                        Stage::Review,
                        "call_failed",
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                Verdict::Fail(Feedback::issue(format!("reviewer call failed: {e}")))
            }
        }
    }
}
