//! Isolated execution of generated code.
//!
//! Each `send` copies the artifact into a fresh temporary directory and runs
//! it in a child process with a cleared environment, a wall-clock timeout and
//! a cap on captured output. The child speaks one JSON object per line:
//! `{"query": ...}` in, `{"response": ..., "error": ...}` out.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// File the artifact is written to inside the sandbox.
pub const ENTRY_FILE: &str = "agent.py";
/// File the harness is written to inside the sandbox.
pub const HARNESS_FILE: &str = "harness.py";
/// Query that tells the harness to stop.
pub const EXIT_QUERY: &str = "__EXIT__";

/// Loads `agent` from the artifact and answers queries on stdin. Anything the
/// agent prints goes to stderr so stdout stays machine-readable.
pub const PYTHON_HARNESS: &str = r#"import contextlib
import json
import sys
import traceback


def reply(response=None, error=None):
    sys.stdout.write(json.dumps({"response": response, "error": error}) + "\n")
    sys.stdout.flush()


try:
    with contextlib.redirect_stdout(sys.stderr):
        from agent import agent
except Exception:
    reply(error="failed to load agent: " + traceback.format_exc())
    sys.exit(1)

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        query = json.loads(line).get("query", "")
    except Exception as e:
        reply(error="bad request: %s" % e)
        continue
    if query == "__EXIT__":
        break
    try:
        with contextlib.redirect_stdout(sys.stderr):
            result = agent.run(query)
        reply(response=str(result))
    except Exception:
        reply(error=traceback.format_exc())
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub timeout_secs: u64,
    /// Cap per stream (stdout, stderr).
    pub max_output_bytes: u64,
    /// Variables copied from the parent environment. Everything else is
    /// cleared.
    pub env_passthrough: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 60,
            max_output_bytes: 64 * 1024,
            env_passthrough: vec!["PATH".to_string()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to prepare sandbox: {0}")]
    Setup(#[source] std::io::Error),
    #[error("failed to start {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What came back from one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Execution {
    pub response: Option<String>,
    pub error: Option<String>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Output hit the size cap.
    pub truncated: bool,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.response.is_some()
    }

    /// Human-readable reason the run failed, if it did.
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if self.response.is_some() {
            return None;
        }
        let mut reason = format!(
            "agent produced no response (exit code {})",
            self.exit_code.map_or("none".to_string(), |c| c.to_string())
        );
        if !self.stderr.trim().is_empty() {
            reason.push_str(&format!("\n{}", self.stderr.trim()));
        }
        Some(reason)
    }
}

#[derive(Deserialize)]
struct Reply {
    response: Option<String>,
    error: Option<String>,
}

/// Message-passing boundary around untrusted code.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn send(&self, code: &str, input: &str) -> Result<Execution, SandboxError>;
}

/// Runs each request in a fresh child process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
    harness: String,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            harness: PYTHON_HARNESS.to_string(),
        }
    }

    /// Replace the harness script (the interpreter runs it as `harness.py`).
    pub fn with_harness(mut self, harness: &str) -> Self {
        self.harness = harness.to_string();
        self
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(HARNESS_FILE)
            .current_dir(dir)
            .env_clear()
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .env("HOME", dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

async fn read_capped<R: AsyncRead + Unpin>(
    stream: Option<R>,
    limit: u64,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut stream) = stream else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    (&mut stream).take(limit).read_to_end(&mut buf).await?;
    let truncated = buf.len() as u64 >= limit;
    Ok((buf, truncated))
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn send(&self, code: &str, input: &str) -> Result<Execution, SandboxError> {
        let dir = tempfile::Builder::new()
            .prefix("agent-factory-sandbox-")
            .tempdir()
            .map_err(SandboxError::Setup)?;
        tokio::fs::write(dir.path().join(ENTRY_FILE), code)
            .await
            .map_err(SandboxError::Setup)?;
        tokio::fs::write(dir.path().join(HARNESS_FILE), &self.harness)
            .await
            .map_err(SandboxError::Setup)?;

        let mut child = self
            .command(dir.path())
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                interpreter: self.config.interpreter.clone(),
                source,
            })?;

        let mut request = serde_json::to_string(&serde_json::json!({ "query": input }))
            .map_err(std::io::Error::other)?;
        request.push('\n');
        request.push_str(&serde_json::json!({ "query": EXIT_QUERY }).to_string());
        request.push('\n');

        let limit = self.config.max_output_bytes.max(1);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let exchange = async {
            if let Some(mut stdin) = stdin {
                // The child may exit without reading; a broken pipe is not fatal.
                let _ = stdin.write_all(request.as_bytes()).await;
                drop(stdin);
            }
            let (out, err) = tokio::join!(read_capped(stdout, limit), read_capped(stderr, limit));
            let (out, out_truncated) = out?;
            let (err, err_truncated) = err?;
            let truncated = out_truncated || err_truncated;
            if truncated {
                let _ = child.start_kill();
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status.code(), truncated))
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        let (out, err, exit_code, truncated) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                tracing::warn!(timeout_secs = self.config.timeout_secs, "Sandboxed run timed out");
                return Err(SandboxError::Timeout(timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&out);
        let reply = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<Reply>(line.trim()).ok());

        let execution = Execution {
            response: reply.as_ref().and_then(|r| r.response.clone()),
            error: reply.and_then(|r| r.error),
            stderr: String::from_utf8_lossy(&err).to_string(),
            exit_code,
            truncated,
        };
        tracing::debug!(
            exit_code = ?execution.exit_code,
            ok = execution.succeeded(),
            truncated,
            "Sandboxed run finished"
        );
        Ok(execution)
    }
}
