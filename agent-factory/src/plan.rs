//! Plan data model: what the designer produces and the factory builds.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

/// A named, typed, described input or output field. Descriptive only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

// Models sometimes emit `"inputs": ["city"]` instead of objects.
impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Full {
            name: String,
            #[serde(rename = "type", default)]
            kind: String,
            #[serde(default)]
            description: String,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full(Full),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => FieldSpec {
                name,
                kind: String::new(),
                description: String::new(),
            },
            Repr::Full(f) => FieldSpec {
                name: f.name,
                kind: f.kind,
                description: f.description,
            },
        })
    }
}

/// One sub-agent to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentSpec {
    #[serde(alias = "agent_name")]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub inputs: Vec<FieldSpec>,
    #[serde(default)]
    pub outputs: Vec<FieldSpec>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_model: Option<String>,
}

/// Designer output. `subagents` order is build order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(alias = "end_to_end_context", default)]
    pub context: String,
    #[serde(alias = "agents", default)]
    pub subagents: Vec<SubAgentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluation_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("plan has no sub-agents")]
    Empty,
    #[error("sub-agent #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("sub-agent name {0:?} is not a safe identifier (use letters, digits, '_' or '-')")]
    UnsafeName(String),
    #[error("duplicate sub-agent name {0:?}")]
    DuplicateName(String),
    #[error("sub-agent {subagent:?} depends on unknown sub-agent {dependency:?}")]
    UnknownDependency { subagent: String, dependency: String },
    #[error("sub-agent {0:?} depends on itself")]
    SelfDependency(String),
    #[error("dependency cycle among sub-agents: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

impl Plan {
    /// Parse the designer's raw text, tolerating prose and code fences.
    pub fn from_model_output(text: &str) -> Result<Plan, serde_json::Error> {
        serde_json::from_str(extract_json(text))
    }

    pub fn get(&self, name: &str) -> Option<&SubAgentSpec> {
        self.subagents.iter().find(|s| s.name == name)
    }

    /// Check structural invariants and return the plan in dependency order.
    ///
    /// The ordering is a stable topological sort: among the sub-agents whose
    /// dependencies are satisfied, the earliest in plan order goes next. A
    /// plan that is already dependency-ordered comes back unchanged.
    pub fn validate(mut self) -> Result<Plan, PlanError> {
        if self.subagents.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for (index, spec) in self.subagents.iter_mut().enumerate() {
            spec.name = spec.name.trim().to_string();
            if spec.name.is_empty() {
                return Err(PlanError::EmptyName { index });
            }
            if !is_safe_name(&spec.name) {
                return Err(PlanError::UnsafeName(spec.name.clone()));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(PlanError::DuplicateName(spec.name.clone()));
            }
        }

        for spec in &mut self.subagents {
            let mut unique = BTreeSet::new();
            spec.dependencies.retain(|d| unique.insert(d.trim().to_string()));
            for dep in &mut spec.dependencies {
                *dep = dep.trim().to_string();
                if *dep == spec.name {
                    return Err(PlanError::SelfDependency(spec.name.clone()));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        subagent: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.subagents = dependency_order(std::mem::take(&mut self.subagents))?;
        Ok(self)
    }

    /// Shared context handed to the generator for one sub-agent.
    pub fn context_for(&self, spec: &SubAgentSpec) -> String {
        let mut out = self.context.clone();
        let deps: Vec<&SubAgentSpec> = spec
            .dependencies
            .iter()
            .filter_map(|d| self.get(d))
            .collect();
        if !deps.is_empty() {
            out.push_str("\n\nUpstream sub-agents this one consumes:");
            for dep in deps {
                let outputs: Vec<&str> = dep.outputs.iter().map(|f| f.name.as_str()).collect();
                out.push_str(&format!(
                    "\n- {}: {} (outputs: {})",
                    dep.name,
                    dep.goal,
                    if outputs.is_empty() {
                        "-".to_string()
                    } else {
                        outputs.join(", ")
                    }
                ));
            }
        }
        out
    }
}

fn is_safe_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn dependency_order(specs: Vec<SubAgentSpec>) -> Result<Vec<SubAgentSpec>, PlanError> {
    let mut pending: Vec<Option<SubAgentSpec>> = specs.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while ordered.len() < pending.len() {
        let next = pending.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.dependencies.iter().all(|d| placed.contains(d)))
        });
        let Some(index) = next else {
            let stuck = pending.iter().flatten().map(|s| s.name.clone()).collect();
            return Err(PlanError::Cycle(stuck));
        };
        if let Some(spec) = pending[index].take() {
            placed.insert(spec.name.clone());
            ordered.push(spec);
        }
    }
    Ok(ordered)
}

/// Find the JSON object inside model text.
///
/// Prefers a ```json fence, then any fence, then the outermost braces.
pub fn extract_json(text: &str) -> &str {
    if let Some(body) = fenced(text, "```json") {
        return body;
    }
    if let Some(body) = fenced(text, "```")
        && body.trim_start().starts_with('{')
    {
        return body;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    }
}

fn fenced<'a>(text: &'a str, open: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    // Skip the language tag line on a bare fence.
    let body_start = rest.find('\n').map_or(0, |i| i + 1);
    let rest = &rest[body_start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}
