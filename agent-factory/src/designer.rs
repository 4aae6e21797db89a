//! Plan designer: goal in, structured plan out.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmBackend, LlmError, Role};
use crate::plan::Plan;
use crate::trace::{Stage, Trace};

#[derive(Debug, thiserror::Error)]
pub enum DesignError {
    #[error("goal is empty")]
    EmptyGoal,
    #[error("designer call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("designer returned malformed plan ({reason})")]
    Malformed { raw_response: String, reason: String },
}

#[async_trait]
pub trait Designer: Send + Sync {
    /// Produce a plan for `goal`. With `feedback`, produce a revised plan
    /// that addresses it.
    async fn design(
        &self,
        goal: &str,
        resources: &[String],
        feedback: Option<&str>,
        trace: &Trace,
    ) -> Result<Plan, DesignError>;
}

const SYSTEM_PROMPT: &str = r#"You are the plan designer of an agent factory. You decompose a goal into a small set of cooperating sub-agents, each of which will be implemented as one Python module.

Respond with a single JSON object and nothing else:
{
  "context": "how the sub-agents collaborate end to end",
  "subagents": [
    {
      "name": "snake_case_identifier",
      "role": "one-line role",
      "goal": "what this sub-agent achieves",
      "inputs": [{"name": "...", "type": "...", "description": "..."}],
      "outputs": [{"name": "...", "type": "...", "description": "..."}],
      "dependencies": ["names of sub-agents whose output this one consumes"],
      "instructions": "detailed build instructions",
      "suggested_model": "optional model name"
    }
  ],
  "evaluation_criteria": ["observable checks for the finished system"]
}

Rules:
- At least one sub-agent. Names are unique and use only letters, digits, '_' and '-'.
- List sub-agents so that dependencies come first.
- Prefer the fewest sub-agents that do the job."#;

const REPAIR_PROMPT: &str = "Your previous reply could not be parsed as the required JSON plan. \
Reply again with ONLY the JSON object: no prose, no Markdown fences, no comments.";

/// Designer backed by an LLM.
pub struct LlmDesigner {
    llm: Arc<dyn LlmBackend>,
}

impl LlmDesigner {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }

    fn prompt(goal: &str, resources: &[String], feedback: Option<&str>) -> String {
        let mut prompt = format!("Goal:\n{goal}\n");
        if !resources.is_empty() {
            prompt.push_str("\nAvailable resources:\n");
            for r in resources {
                prompt.push_str(&format!("- {r}\n"));
            }
        }
        if let Some(feedback) = feedback {
            prompt.push_str(&format!(
                "\nA previous plan for this goal was rejected with this feedback:\n{feedback}\n\n\
                 Produce a REVISED plan from scratch that addresses every point. \
                 Do not append to the old plan.\n"
            ));
        }
        prompt
    }
}

#[async_trait]
impl Designer for LlmDesigner {
    async fn design(
        &self,
        goal: &str,
        resources: &[String],
        feedback: Option<&str>,
        trace: &Trace,
    ) -> Result<Plan, DesignError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(DesignError::EmptyGoal);
        }

        let prompt = Self::prompt(goal, resources, feedback);
        let raw = self.llm.invoke(Role::Designer, SYSTEM_PROMPT, &prompt).await?;
        trace.exchange(Stage::Design, &prompt, &raw).await;

        let first_error = match Plan::from_model_output(&raw) {
            Ok(plan) => return Ok(plan),
            Err(e) => e,
        };
        tracing::warn!(error = %first_error, "Designer output malformed, asking for strict JSON");
        trace
            .event(
                Stage::Design,
                "repair",
                Some(serde_json::json!({ "reason": first_error.to_string() })),
            )
            .await;

        let repair = format!("{prompt}\n---\nPrevious reply:\n{raw}\n---\n{REPAIR_PROMPT}");
        let repaired = self.llm.invoke(Role::Designer, SYSTEM_PROMPT, &repair).await?;
        trace.exchange(Stage::Design, &repair, &repaired).await;

        Plan::from_model_output(&repaired).map_err(|e| DesignError::Malformed {
            raw_response: repaired,
            reason: e.to_string(),
        })
    }
}
