//! Job persistence across the approval pause.

use super::state::JobState;
use crate::error::{ReconError, Result};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub trait JobStore: Send + Sync {
    fn save(&self, state: &JobState) -> Result<()>;
    fn load(&self, job_id: &str) -> Result<Option<JobState>>;
    fn remove(&self, job_id: &str) -> Result<bool>;
}

/// Process-local store; jobs vanish on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, JobState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, state: &JobState) -> Result<()> {
        self.jobs.insert(state.job_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, job_id: &str) -> Result<Option<JobState>> {
        Ok(self.jobs.get(job_id).map(|entry| entry.value().clone()))
    }

    fn remove(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.remove(job_id).is_some())
    }
}

/// SQLite-backed store; each job is one JSON document.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS recon_jobs (
                job_id TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                status TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        info!("Job store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReconError::Store("Job store lock poisoned".to_string()))
    }
}

impl JobStore for SqliteJobStore {
    fn save(&self, state: &JobState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO recon_jobs (job_id, phase, status, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id) DO UPDATE SET
                phase = excluded.phase,
                status = excluded.status,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            params![
                state.job_id,
                state.phase.to_string(),
                serde_json::to_string(&state.status)?.trim_matches('"'),
                json,
                state.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load(&self, job_id: &str) -> Result<Option<JobState>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM recon_jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM recon_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::state::{Phase, ReconRequest, RunStatus};

    fn sample(id: &str) -> JobState {
        let mut state = JobState::new(id.to_string(), &ReconRequest::default());
        state.enter(Phase::AwaitApproval);
        state.status = RunStatus::PendingApproval;
        state.warn("something was dropped");
        state
    }

    fn exercise(store: &dyn JobStore) {
        assert!(store.load("missing").unwrap().is_none());
        let state = sample("job-1");
        store.save(&state).unwrap();
        assert_eq!(store.load("job-1").unwrap(), Some(state.clone()));

        let mut updated = state;
        updated.status = RunStatus::Done;
        store.save(&updated).unwrap();
        assert_eq!(store.load("job-1").unwrap().unwrap().status, RunStatus::Done);

        assert!(store.remove("job-1").unwrap());
        assert!(!store.remove("job-1").unwrap());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryJobStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteJobStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        SqliteJobStore::open(&path).unwrap().save(&sample("job-2")).unwrap();
        let reopened = SqliteJobStore::open(&path).unwrap();
        assert_eq!(reopened.load("job-2").unwrap().unwrap().phase, Phase::AwaitApproval);
    }
}
