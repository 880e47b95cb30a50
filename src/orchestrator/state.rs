use crate::capability::EntityPair;
use crate::connectors::SourceConfig;
use crate::dataset::{DatasetRef, Record};
use crate::error::ReconError;
use crate::query_synth::{ReconQuery, Thresholds};
use crate::schema_matcher::{ColumnMatch, ColumnPair, SchemaMapping};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Load,
    Materialize,
    Map,
    AwaitApproval,
    EntityResolve,
    SqlSynthesis,
    Execute,
    Explain,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "LOAD",
            Phase::Materialize => "MATERIALIZE",
            Phase::Map => "MAP",
            Phase::AwaitApproval => "AWAIT_APPROVAL",
            Phase::EntityResolve => "ENTITY_RESOLVE",
            Phase::SqlSynthesis => "SQL_SYNTHESIS",
            Phase::Execute => "EXECUTE",
            Phase::Explain => "EXPLAIN",
            Phase::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// In flight, not yet suspended or finished.
    Running,
    PendingApproval,
    /// Approved and past the suspension point.
    Approved,
    Done,
    Error,
}

/// The approver's verdict on the computed matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Revise {
        #[serde(default)]
        rejected: Vec<ColumnPair>,
    },
    Approved {
        #[serde(default)]
        approved_matches: Vec<ColumnPair>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub dataset_a: Option<SourceConfig>,
    #[serde(default)]
    pub dataset_b: Option<SourceConfig>,
    /// Defaults apply on a fresh run; a resumed job keeps its stored values.
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    #[serde(default)]
    pub approval: Option<ApprovalDecision>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&ReconError> for ErrorInfo {
    fn from(err: &ReconError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: crate::observability::redact(&err.to_string()),
        }
    }
}

/// Everything a run accumulates; persisted across the approval pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: Phase,
    pub status: RunStatus,
    pub dataset_a: Option<DatasetRef>,
    pub dataset_b: Option<DatasetRef>,
    pub thresholds: Thresholds,
    pub entities: Vec<String>,
    pub dry_run: bool,
    pub mapping: SchemaMapping,
    pub entity_pairs: Vec<EntityPair>,
    pub query: Option<ReconQuery>,
    pub execution_status: Option<String>,
    pub rows: Option<Vec<Record>>,
    pub explanation: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorInfo>,
    /// Phases entered, in order, across all invocations.
    pub history: Vec<Phase>,
    /// Pairs rejected by every `Revise` so far; never proposed again.
    #[serde(default)]
    pub excluded: Vec<ColumnPair>,
    /// Staging tables this job created and still owns.
    #[serde(default)]
    pub staged_tables: Vec<String>,
}

impl JobState {
    pub fn new(job_id: String, request: &ReconRequest) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            created_at: now,
            updated_at: now,
            phase: Phase::Load,
            status: RunStatus::Running,
            dataset_a: None,
            dataset_b: None,
            thresholds: request.thresholds.unwrap_or_default(),
            entities: request.entities.clone().unwrap_or_default(),
            dry_run: request.dry_run,
            mapping: SchemaMapping::default(),
            entity_pairs: Vec::new(),
            query: None,
            execution_status: None,
            rows: None,
            explanation: None,
            warnings: Vec::new(),
            error: None,
            history: vec![Phase::Load],
            excluded: Vec::new(),
            staged_tables: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.history.push(phase);
        self.updated_at = Utc::now();
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn fail(&mut self, err: &ReconError) {
        self.status = RunStatus::Error;
        self.error = Some(ErrorInfo::from(err));
        self.updated_at = Utc::now();
    }

    pub fn visited(&self, phase: Phase) -> bool {
        self.history.contains(&phase)
    }

    /// Add rejected pairs to the exclusion list, skipping ones already there.
    pub fn exclude(&mut self, rejected: &[ColumnPair]) {
        for pair in rejected {
            if !self.excluded.contains(pair) {
                self.excluded.push(pair.clone());
            }
        }
    }

    /// Finished for good: nothing later can resume it.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Done | RunStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconResponse {
    pub job_id: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub matches: Vec<ColumnMatch>,
    pub numeric_columns: Vec<String>,
    pub array_columns: Vec<String>,
    pub string_columns: Vec<String>,
    pub sql: Option<String>,
    pub execution_status: Option<String>,
    pub rows: Option<Vec<Record>>,
    pub explanation: Option<String>,
    pub entity_pairs: Vec<EntityPair>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorInfo>,
}

impl From<&JobState> for ReconResponse {
    fn from(state: &JobState) -> Self {
        Self {
            job_id: state.job_id.clone(),
            status: state.status,
            phase: state.phase,
            matches: state.mapping.matches.clone(),
            numeric_columns: state.mapping.numeric_columns.clone(),
            array_columns: state.mapping.array_columns.clone(),
            string_columns: state.mapping.string_columns.clone(),
            sql: state.query.as_ref().map(|q| q.sql.clone()),
            execution_status: state.execution_status.clone(),
            rows: state.rows.clone(),
            explanation: state.explanation.clone(),
            entity_pairs: state.entity_pairs.clone(),
            warnings: state.warnings.clone(),
            error: state.error.clone(),
        }
    }
}
