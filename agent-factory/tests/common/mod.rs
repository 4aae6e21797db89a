#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use agent_factory::factory::{BuildMode, BuildRequest, Factory};
use agent_factory::llm::{LlmBackend, LlmError, Role};
use agent_factory::plan::Plan;
use agent_factory::workspace::{ArtifactSink, FsArtifactSink, SinkError, Workspace};

/// Module that passes the static review checks.
pub const GOOD_CODE: &str = "class Agent:\n    def run(self, query: str) -> str:\n        return 'ok: ' + query\n\nagent = Agent()\n";

/// Module with `agent` but no `run`.
pub const NO_RUN_CODE: &str = "class Agent:\n    def handle(self, query):\n        return query\n\nagent = Agent()\n";

pub type Script = dyn Fn(Role, &str, usize) -> Result<String, LlmError> + Send + Sync;

/// LLM backend driven by a closure. The closure sees the role, the prompt and
/// how many calls that role has made so far.
pub struct ScriptedLlm {
    script: Box<Script>,
    calls: Mutex<Vec<(Role, String)>>,
}

impl ScriptedLlm {
    pub fn new(
        script: impl Fn(Role, &str, usize) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(Role, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, role: Role) -> usize {
        self.calls.lock().unwrap().iter().filter(|(r, _)| *r == role).count()
    }

    pub fn prompts(&self, role: Role) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn invoke(&self, role: Role, _system: &str, prompt: &str) -> Result<String, LlmError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.iter().filter(|(r, _)| *r == role).count();
            calls.push((role, prompt.to_string()));
            n
        };
        (self.script)(role, prompt, n)
    }
}

/// True when a generator or reviewer prompt is about sub-agent `name`.
pub fn is_for(prompt: &str, name: &str) -> bool {
    prompt.contains(&format!("\"name\": \"{name}\""))
}

pub fn subagent(name: &str, deps: &[&str]) -> Value {
    json!({
        "name": name,
        "role": format!("{name} role"),
        "goal": format!("do the {name} part"),
        "inputs": [{"name": "query", "type": "str", "description": "user request"}],
        "outputs": [{"name": "result", "type": "str", "description": "answer"}],
        "dependencies": deps,
        "instructions": format!("implement {name}"),
    })
}

pub fn plan_json(subagents: Vec<Value>) -> String {
    json!({
        "context": "sub-agents hand results down the chain",
        "subagents": subagents,
        "evaluation_criteria": ["answers the question"],
    })
    .to_string()
}

/// Plan with sub-agents named `a0..a{n}` and no dependencies.
pub fn chain_plan(n: usize) -> String {
    plan_json((0..n).map(|i| subagent(&format!("a{i}"), &[])).collect())
}

pub fn factory(llm: Arc<ScriptedLlm>, base: &Path) -> Factory {
    Factory::with_llm(llm, Arc::new(FsArtifactSink::new(base)))
}

pub fn request(goal: &str, max_retries: u32) -> BuildRequest {
    BuildRequest::new(goal)
        .mode(BuildMode::Automated)
        .max_retries(max_retries)
}

/// Every file under `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(files_under(&path));
        } else {
            out.push(path);
        }
    }
    out.sort();
    out
}

/// Sink that allocates real workspaces but cannot write artifacts.
pub struct FailingSink {
    pub inner: FsArtifactSink,
}

#[async_trait]
impl ArtifactSink for FailingSink {
    async fn allocate(&self, goal: &str, build_id: &str) -> Result<Workspace, SinkError> {
        self.inner.allocate(goal, build_id).await
    }

    async fn write_plan(&self, workspace: &Workspace, plan: &Plan) -> Result<PathBuf, SinkError> {
        self.inner.write_plan(workspace, plan).await
    }

    async fn write_artifact(
        &self,
        workspace: &Workspace,
        name: &str,
        _code: &str,
    ) -> Result<PathBuf, SinkError> {
        Err(SinkError::Io {
            action: "write artifact",
            path: workspace.artifact_path(name, "py"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}
