//! Terminal rendering for the CLI.
//!
//! Every line is prefixed with the stage speaking (`[designer]`,
//! `[reviewer]`, ...). Functions return strings so the binary decides where
//! they go.

use serde_json::Value;

use crate::factory::{BuildFailure, BuildResult, BuildStatus};
use crate::plan::Plan;
use crate::validator::ValidationReport;

/// Terminal width used for wrapping.
pub const LINE_WIDTH: usize = 100;

/// Which stage a step notification belongs to.
pub fn speaker(step: &str) -> &'static str {
    match step.split(':').next().unwrap_or("") {
        "design" => "designer",
        "generate" => "generator",
        "review" => "reviewer",
        _ => "factory",
    }
}

fn line(speaker: &str, emoji: &str, text: &str) -> String {
    format!("[{speaker}] {emoji} {text}")
}

/// One-line summary of an observer notification.
pub fn format_step(step: &str, payload: &Value) -> String {
    let name = payload["name"].as_str().unwrap_or("?");
    let attempt = payload["attempt"].as_u64().unwrap_or(0);
    let text = match step {
        "build:start" => format!(
            "Building: {} (workspace {})",
            payload["goal"].as_str().unwrap_or(""),
            payload["workspace"].as_str().unwrap_or("-")
        ),
        "design:start" => match payload["feedback"].as_str() {
            Some(feedback) => format!("Revising plan: {feedback}"),
            None => "Designing plan...".to_string(),
        },
        "design:complete" => {
            let n = payload["plan"]["subagents"].as_array().map_or(0, |a| a.len());
            format!("Plan ready with {n} sub-agent(s)")
        }
        "generate:start" => format!("Writing {name} (attempt {attempt})"),
        "review:start" => format!("Reviewing {name} (attempt {attempt})"),
        "review:verdict" => {
            if payload["verdict"]["verdict"] == "pass" {
                format!("{name} passed review")
            } else {
                let issues: Vec<&str> = payload["verdict"]["issues"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|i| i.as_str()).collect())
                    .unwrap_or_default();
                format!("{name} failed review: {}", issues.join("; "))
            }
        }
        "artifact:persisted" => format!(
            "Saved {name} -> {}",
            payload["path"].as_str().unwrap_or("?")
        ),
        "build:complete" => format!("Finished: {}", payload["status"].as_str().unwrap_or("?")),
        other => other.to_string(),
    };
    let emoji = match step {
        "build:start" => "🏭",
        "design:start" | "design:complete" => "🏗️",
        "generate:start" => "🔨",
        "review:start" => "🔍",
        "review:verdict" if payload["verdict"]["verdict"] == "pass" => "✅",
        "review:verdict" => "⚠️",
        "artifact:persisted" => "📄",
        _ => "•",
    };
    line(speaker(step), emoji, &text)
}

/// Plan as shown for approval.
pub fn format_plan(plan: &Plan) -> String {
    let mut out = vec![line("designer", "📋", "Proposed plan")];
    for l in wrap_lines(&plan.context, LINE_WIDTH) {
        out.push(format!("  {l}"));
    }
    for (i, spec) in plan.subagents.iter().enumerate() {
        out.push(format!("  {}. {} ({})", i + 1, spec.name, spec.role));
        for l in wrap_lines(&spec.goal, LINE_WIDTH - 6) {
            out.push(format!("     {l}"));
        }
        if !spec.dependencies.is_empty() {
            out.push(format!("     depends on: {}", spec.dependencies.join(", ")));
        }
        if let Some(model) = &spec.suggested_model {
            out.push(format!("     model: {model}"));
        }
    }
    if !plan.evaluation_criteria.is_empty() {
        out.push("  Evaluation criteria:".to_string());
        for c in &plan.evaluation_criteria {
            out.push(format!("   - {c}"));
        }
    }
    out.join("\n")
}

/// Final report. Each kind of failure reads differently.
pub fn format_result(result: &BuildResult) -> String {
    let mut out = Vec::new();
    match &result.status {
        BuildStatus::Success => {
            out.push(line(
                "factory",
                "🎉",
                &format!("Build succeeded: {} artifact(s)", result.artifacts.len()),
            ));
            for artifact in result.artifacts.values() {
                out.push(format!(
                    "  {} -> {} ({} attempt(s))",
                    artifact.name,
                    artifact.path.display(),
                    artifact.attempts
                ));
            }
        }
        BuildStatus::Cancelled { step } => {
            out.push(line("factory", "🛑", &format!("Build cancelled at {step}")));
        }
        BuildStatus::Failure(failure) => {
            let text = match failure {
                BuildFailure::MaxRetriesExceeded {
                    name,
                    attempts,
                    last_feedback,
                    ..
                } => {
                    let mut text = format!(
                        "The model never got {name} right ({attempts} attempts). Last review:\n"
                    );
                    text.push_str(&last_feedback.render());
                    text
                }
                BuildFailure::InvalidPlan(e) => format!("The request produced an invalid plan: {e}"),
                BuildFailure::Design(e) => format!("Could not design a plan: {e}"),
                BuildFailure::PlanRejected(reason) => format!("Plan not approved: {reason}"),
                BuildFailure::Persistence(e) => format!("Could not save output: {e}"),
                BuildFailure::Configuration(e) => format!("Configuration problem: {e}"),
            };
            out.push(line("factory", "❌", text.trim_end()));
        }
    }
    if let Some(ws) = &result.workspace {
        out.push(format!("  workspace: {}", ws.display()));
    }
    out.join("\n")
}

pub fn format_report(name: &str, report: &ValidationReport) -> String {
    let verdict = if report.success { "PASS" } else { "FAIL" };
    let mut out = vec![line(
        "validator",
        if report.success { "✅" } else { "❌" },
        &format!("{name}: {verdict}, score {}/5", report.score),
    )];
    for l in wrap_lines(&report.findings, LINE_WIDTH) {
        out.push(format!("  {l}"));
    }
    if let Some(error) = &report.error {
        out.push("  error:".to_string());
        out.extend(error.lines().take(20).map(|l| format!("    {l}")));
    }
    out.join("\n")
}

/// Source listing, truncated to `max_lines`.
pub fn code(filename: &str, content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = vec![format!("📄 {filename} ({} lines)", lines.len())];
    out.extend(lines.iter().take(max_lines).map(|l| format!("  {l}")));
    if lines.len() > max_lines {
        out.push(format!("  ... ({} more lines)", lines.len() - max_lines));
    }
    out.join("\n")
}

/// Wrap text into lines of max_len, breaking on word boundaries.
pub fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.len() <= max_len {
            result.push(line.to_string());
        } else {
            let mut current = String::new();
            for word in line.split_whitespace() {
                if current.len() + word.len() + 1 > max_len {
                    if !current.is_empty() {
                        result.push(current);
                    }
                    current = word.to_string();
                } else {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(word);
                }
            }
            if !current.is_empty() {
                result.push(current);
            }
        }
    }
    result
}
