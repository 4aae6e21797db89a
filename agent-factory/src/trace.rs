//! Append-only JSON-lines audit trail, one file per sub-agent.
//!
//! Records every stage transition and raw request/response pair. This is a
//! debugging aid separate from `tracing`: losing a record logs a warning but
//! never fails the build.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Pipeline stage a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Design,
    Generate,
    Review,
    Persist,
    State,
}

/// One line of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub build_id: String,
    pub subagent: String,
    pub stage: Stage,
    pub attempt: u32,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<serde_json::Value>,
}

/// Handle passed to each stage call. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Trace {
    path: Option<PathBuf>,
    build_id: String,
    subagent: String,
    attempt: u32,
}

impl Trace {
    /// A trace that drops everything.
    pub fn disabled() -> Self {
        Self {
            path: None,
            build_id: String::new(),
            subagent: String::new(),
            attempt: 0,
        }
    }

    pub fn new(path: PathBuf, build_id: &str, subagent: &str) -> Self {
        Self {
            path: Some(path),
            build_id: build_id.to_string(),
            subagent: subagent.to_string(),
            attempt: 0,
        }
    }

    /// Same file, tagged with a review attempt number.
    pub fn at_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Raw model exchange.
    pub async fn exchange(&self, stage: Stage, request: &str, response: &str) {
        self.append(TraceRecord {
            request: Some(request.to_string()),
            response: Some(response.to_string()),
            ..self.record(stage, "exchange")
        })
        .await;
    }

    /// A named event with optional structured detail.
    pub async fn event(&self, stage: Stage, event: &str, detail: Option<serde_json::Value>) {
        self.append(TraceRecord {
            detail,
            ..self.record(stage, event)
        })
        .await;
    }

    fn record(&self, stage: Stage, event: &str) -> TraceRecord {
        TraceRecord {
            timestamp: Utc::now(),
            build_id: self.build_id.clone(),
            subagent: self.subagent.clone(),
            stage,
            attempt: self.attempt,
            event: event.to_string(),
            request: None,
            response: None,
            detail: None,
        }
    }

    async fn append(&self, record: TraceRecord) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_line(path, &record).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to append trace record");
        }
    }
}

async fn write_line(path: &PathBuf, record: &TraceRecord) -> std::io::Result<()> {
    let mut line = serde_json::to_string(record).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Read back a trace file (used by tests and the CLI).
pub async fn read_records(path: &std::path::Path) -> std::io::Result<Vec<TraceRecord>> {
    let text = tokio::fs::read_to_string(path).await?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(std::io::Error::other))
        .collect()
}
