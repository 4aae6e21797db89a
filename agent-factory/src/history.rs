//! Build ledger backed by SQLite.
//!
//! One row per finished build: goal, outcome and where its workspace is, so
//! past runs can be listed and found again.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::factory::{BuildResult, BuildStatus};

/// A recorded build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub id: i64,
    pub build_id: String,
    pub goal: String,
    pub mode: String,
    pub status: String,
    pub detail: Option<String>,
    pub workspace: Option<String>,
    pub subagents: i64,
    pub artifacts: i64,
    pub created_at: String,
}

pub struct History {
    db: Mutex<Connection>,
}

impl History {
    /// Open or create a ledger database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = Connection::open(path).context("Failed to open history database")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS builds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                build_id TEXT NOT NULL UNIQUE,
                goal TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                workspace TEXT,
                subagents INTEGER NOT NULL,
                artifacts INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("history database lock poisoned"))
    }

    /// Store the outcome of a build.
    pub fn record(&self, result: &BuildResult) -> Result<()> {
        let detail = match &result.status {
            BuildStatus::Success => None,
            BuildStatus::Failure(f) => Some(format!("{}: {f}", f.kind())),
            BuildStatus::Cancelled { step } => Some(format!("cancelled at {step}")),
        };
        let workspace = result
            .workspace
            .as_ref()
            .map(|p| p.display().to_string());
        let subagents = result.plan.as_ref().map_or(0, |p| p.subagents.len()) as i64;
        let now = Utc::now().to_rfc3339();

        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO builds
                (build_id, goal, mode, status, detail, workspace, subagents, artifacts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                result.build_id,
                result.goal,
                result.mode.to_string(),
                result.status.label(),
                detail,
                workspace,
                subagents,
                result.artifacts.len() as i64,
                now
            ],
        )?;
        Ok(())
    }

    /// Most recent builds first.
    pub fn recent(&self, limit: usize) -> Result<Vec<BuildRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT} ORDER BY id DESC LIMIT ?1"))?;
        let records = stmt
            .query_map(rusqlite::params![limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Look up one build by id.
    pub fn get(&self, build_id: &str) -> Result<Option<BuildRecord>> {
        let db = self.conn()?;
        let record = db
            .query_row(
                &format!("{SELECT} WHERE build_id = ?1"),
                rusqlite::params![build_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

const SELECT: &str = "SELECT id, build_id, goal, mode, status, detail, workspace, subagents, artifacts, created_at
     FROM builds";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildRecord> {
    Ok(BuildRecord {
        id: row.get(0)?,
        build_id: row.get(1)?,
        goal: row.get(2)?,
        mode: row.get(3)?,
        status: row.get(4)?,
        detail: row.get(5)?,
        workspace: row.get(6)?,
        subagents: row.get(7)?,
        artifacts: row.get(8)?,
        created_at: row.get(9)?,
    })
}
