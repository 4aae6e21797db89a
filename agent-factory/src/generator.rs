//! Code generator: one sub-agent spec in, one Python module out.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmBackend, Role};
use crate::plan::SubAgentSpec;
use crate::reviewer::Feedback;
use crate::trace::{Stage, Trace};

/// First line of the text returned instead of code when generation fails.
/// The reviewer rejects it, so a failed call takes the normal retry path.
pub const FAULT_MARKER: &str = "# GENERATION_FAULT:";

pub fn is_fault(code: &str) -> bool {
    code.trim_start().starts_with(FAULT_MARKER)
}

pub fn fault(reason: &str) -> String {
    format!("{FAULT_MARKER} {}\n", reason.replace('\n', " "))
}

/// The rejected attempt a regeneration has to improve on.
#[derive(Debug, Clone, Copy)]
pub struct PriorAttempt<'a> {
    pub code: &'a str,
    pub feedback: &'a Feedback,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Never fails: problems come back as [`fault`] text.
    async fn generate(
        &self,
        spec: &SubAgentSpec,
        context: &str,
        prior: Option<PriorAttempt<'_>>,
        trace: &Trace,
    ) -> String;
}

const SYSTEM_PROMPT: &str = r#"You are the code generator of an agent factory. You write one complete, self-contained Python 3 module implementing one sub-agent.

Contract:
- The module defines a top-level object named `agent` with a method `run(query: str) -> str`.
- `run` returns a string and never raises; report errors in the returned text.
- Do not spawn processes or execute dynamic code (no subprocess, os.system, exec, eval, importlib).
- Standard library only unless the specification names a resource.

Reply with the module source only, in a single ```python block."#;

pub struct LlmGenerator {
    llm: Arc<dyn LlmBackend>,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }
}

/// Build the generation prompt. With a prior attempt, every reviewer issue is
/// listed and an improved revision is demanded.
pub fn generation_prompt(spec: &SubAgentSpec, context: &str, prior: Option<PriorAttempt<'_>>) -> String {
    let spec_json = serde_json::to_string_pretty(spec).unwrap_or_default();
    let mut prompt = format!(
        "System context:\n{context}\n\nSub-agent specification:\n{spec_json}\n\nInstructions:\n{}\n",
        spec.instructions
    );
    if let Some(prior) = prior {
        prompt.push_str(&format!(
            "\nYour previous version was REJECTED by review.\n\nPrevious version:\n```python\n{}\n```\n\n\
             Issues found:\n{}\n\
             Write an IMPROVED revision of the previous version that fixes every issue above. \
             Do not start over and do not repeat the same mistakes.\n",
            prior.code.trim_end(),
            prior.feedback.render()
        ));
    }
    prompt
}

/// Strip a Markdown code fence if the model wrapped the module in one.
///
/// Fences only count at the start of a line, so backticks inside strings or
/// docstrings of unfenced code are left alone. The first fenced block wins.
pub fn strip_fence(text: &str) -> String {
    let trimmed = text.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    let mut body_start: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("```") {
            continue;
        }
        match body_start {
            None => body_start = Some(i + 1),
            Some(start) => return format!("{}\n", lines[start..i].join("\n").trim_end()),
        }
    }
    format!("{trimmed}\n")
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(
        &self,
        spec: &SubAgentSpec,
        context: &str,
        prior: Option<PriorAttempt<'_>>,
        trace: &Trace,
    ) -> String {
        if spec.name.trim().is_empty() {
            return fault("sub-agent has no name");
        }
        let prompt = generation_prompt(spec, context, prior);
        match self.llm.invoke(Role::Generator, SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => {
                trace.exchange(Stage::Generate, &prompt, &raw).await;
                strip_fence(&raw)
            }
            Err(e) => {
                tracing::warn!(subagent = %spec.name, error = %e, "Generator call failed");
                trace
                    .event(
                        Stage::Generate,
                        "call_failed",
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                fault(&e.to_string())
            }
        }
    }
}
