//! Orchestrator
//!
//! Drives one reconciliation job through its phases:
//!
//! ```text
//! LOAD -> MATERIALIZE -> MAP -> AWAIT_APPROVAL -> ENTITY_RESOLVE
//!      -> SQL_SYNTHESIS -> EXECUTE -> EXPLAIN -> DONE
//! ```
//!
//! AWAIT_APPROVAL is the only suspension point. A suspended job is saved to
//! the `JobStore` and resumed by a later request carrying its `job_id` and an
//! `ApprovalDecision`.

pub mod explain;
pub mod state;
pub mod store;

pub use state::{ApprovalDecision, ErrorInfo, JobState, Phase, ReconRequest, ReconResponse, RunStatus};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};

use crate::capability::{bounded, EntityMatcher, Explainer, MatchSuggester};
use crate::config::{PipelineSettings, Settings};
use crate::connectors::{ConnectorLoader, SourceConfig, SourceLoader};
use crate::dataset::{DatasetRef, TabularDataset};
use crate::entity_resolver::EntityResolver;
use crate::error::{ReconError, Result};
use crate::llm::LlmClient;
use crate::observability::redact;
use crate::query_synth::{QuerySynthesizer, TableSpec};
use crate::schema_matcher::SchemaMatcher;
use crate::warehouse::{BigQueryWarehouse, LocalWarehouse, Warehouse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The three language capabilities the pipeline consumes.
#[derive(Clone)]
pub struct Capabilities {
    pub suggester: Arc<dyn MatchSuggester>,
    pub explainer: Arc<dyn Explainer>,
    pub entity_matcher: Arc<dyn EntityMatcher>,
}

impl Capabilities {
    pub fn from_llm(client: Arc<LlmClient>) -> Self {
        Self {
            suggester: client.clone(),
            explainer: client.clone(),
            entity_matcher: client,
        }
    }
}

enum Transition {
    Next(Phase),
    Suspend,
}

/// Per-invocation scratch space that is never persisted.
struct RunContext {
    dataset_a: Option<SourceConfig>,
    dataset_b: Option<SourceConfig>,
    frames: Option<(TabularDataset, TabularDataset)>,
    approval: Option<ApprovalDecision>,
    revised: bool,
}

impl RunContext {
    fn new(request: &ReconRequest) -> Self {
        Self {
            dataset_a: request.dataset_a.clone(),
            dataset_b: request.dataset_b.clone(),
            frames: None,
            approval: request.approval.clone(),
            revised: false,
        }
    }
}

pub struct Orchestrator {
    loader: Arc<dyn SourceLoader>,
    warehouse: Arc<dyn Warehouse>,
    matcher: SchemaMatcher,
    synthesizer: QuerySynthesizer,
    resolver: EntityResolver,
    explainer: Arc<dyn Explainer>,
    store: Arc<dyn JobStore>,
    capability_timeout: Duration,
    execution_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        loader: Arc<dyn SourceLoader>,
        warehouse: Arc<dyn Warehouse>,
        capabilities: Capabilities,
        store: Arc<dyn JobStore>,
        pipeline: &PipelineSettings,
    ) -> Self {
        Self {
            loader,
            warehouse,
            matcher: SchemaMatcher::new(
                capabilities.suggester,
                pipeline.matcher.clone(),
                pipeline.capability_timeout,
            ),
            synthesizer: QuerySynthesizer::new(pipeline.join_keys.clone()),
            resolver: EntityResolver::new(
                capabilities.entity_matcher,
                pipeline.capability_timeout,
                pipeline.entity_threshold,
            ),
            explainer: capabilities.explainer,
            store,
            capability_timeout: pipeline.capability_timeout,
            execution_timeout: pipeline.execution_timeout,
        }
    }

    /// Wire the default stack: LLM client, BigQuery when credentials are
    /// present (otherwise the in-process warehouse), SQLite store when
    /// `RECON_JOB_DB` is set.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let llm = Arc::new(LlmClient::new(&settings.llm)?);
        let warehouse: Arc<dyn Warehouse> = if settings.uses_bigquery() {
            Arc::new(BigQueryWarehouse::from_settings(&settings.warehouse)?)
        } else {
            Arc::new(LocalWarehouse::new(settings.warehouse.staging_dataset.clone()))
        };
        let store: Arc<dyn JobStore> = match &settings.job_db {
            Some(path) => Arc::new(SqliteJobStore::open(path)?),
            None => Arc::new(MemoryJobStore::new()),
        };
        info!(
            "Orchestrator ready: llm={}, warehouse={}, store={}",
            llm.provider(),
            warehouse.name(),
            if settings.job_db.is_some() { "sqlite" } else { "memory" }
        );
        let loader = Arc::new(ConnectorLoader::new(warehouse.clone()));
        Ok(Self::new(
            loader,
            warehouse,
            Capabilities::from_llm(llm),
            store,
            &settings.pipeline,
        ))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    /// Run (or resume) a job until it suspends, finishes or fails.
    /// Never returns a bare error: failures come back as status ERROR.
    pub async fn run(&self, request: ReconRequest) -> ReconResponse {
        let mut state = match self.prepare(&request) {
            Ok(state) => state,
            Err(e) => {
                let job_id = request.job_id.clone().unwrap_or_else(new_job_id);
                error!("Rejected request for job {}: {}", job_id, redact(&e.to_string()));
                let mut state = JobState::new(job_id, &request);
                state.fail(&e);
                return ReconResponse::from(&state);
            }
        };
        let mut ctx = RunContext::new(&request);

        while state.phase != Phase::Done {
            let phase = state.phase;
            info!("Job {}: {}", state.job_id, phase);
            match self.step(&mut state, &mut ctx).await {
                Ok(Transition::Next(next)) => state.enter(next),
                Ok(Transition::Suspend) => {
                    state.status = RunStatus::PendingApproval;
                    info!("Job {} awaiting approval of {} matches", state.job_id, state.mapping.matches.len());
                    break;
                }
                Err(e) => {
                    error!("Job {} failed at {}: {}", state.job_id, phase, redact(&e.to_string()));
                    state.fail(&e);
                    break;
                }
            }
        }

        if state.is_terminal() {
            self.drop_staging(&mut state).await;
        }
        self.persist(&mut state);
        ReconResponse::from(&state)
    }

    fn prepare(&self, request: &ReconRequest) -> Result<JobState> {
        if let Some(thresholds) = &request.thresholds {
            thresholds.validate()?;
        }
        let Some(job_id) = request.job_id.as_deref() else {
            return fresh_state(new_job_id(), request);
        };

        match self.store.load(job_id)? {
            Some(mut state) if state.phase == Phase::AwaitApproval => {
                info!("Resuming job {} from {}", job_id, state.phase);
                if let Some(thresholds) = request.thresholds {
                    state.thresholds = thresholds;
                }
                if let Some(entities) = &request.entities {
                    state.entities = entities.clone();
                }
                for (name, config) in [("dataset_a", &request.dataset_a), ("dataset_b", &request.dataset_b)] {
                    if config.is_some() {
                        let message = format!(
                            "{} ignored when resuming job {}; the job keeps the dataset it was loaded with",
                            name, job_id
                        );
                        warn!("{}", message);
                        state.warn(message);
                    }
                }
                state.dry_run = request.dry_run;
                state.status = RunStatus::Running;
                state.error = None;
                Ok(state)
            }
            Some(previous) => {
                let mut state = fresh_state(new_job_id(), request)?;
                state.warn(format!(
                    "Job {} ended at {} and cannot be resumed; started job {} from LOAD",
                    job_id, previous.phase, state.job_id
                ));
                Ok(state)
            }
            None => {
                let mut state = fresh_state(job_id.to_string(), request)?;
                let message = format!("Unknown job id {}; re-running from LOAD", job_id);
                warn!("{}", message);
                state.warn(message);
                Ok(state)
            }
        }
    }

    async fn step(&self, state: &mut JobState, ctx: &mut RunContext) -> Result<Transition> {
        match state.phase {
            Phase::Load => self.load(state, ctx).await,
            Phase::Materialize => self.materialize(state, ctx).await,
            Phase::Map => {
                state.mapping = self
                    .matcher
                    .map(state.dataset_a.as_ref(), state.dataset_b.as_ref(), &state.excluded)
                    .await?;
                Ok(Transition::Next(Phase::AwaitApproval))
            }
            Phase::AwaitApproval => Ok(self.await_approval(state, ctx)),
            Phase::EntityResolve => {
                state.entity_pairs = self.resolver.resolve(&state.entities).await;
                Ok(Transition::Next(Phase::SqlSynthesis))
            }
            Phase::SqlSynthesis => self.synthesize(state),
            Phase::Execute => {
                self.execute(state).await;
                Ok(Transition::Next(Phase::Explain))
            }
            Phase::Explain => {
                self.explain(state).await;
                state.status = RunStatus::Done;
                Ok(Transition::Next(Phase::Done))
            }
            Phase::Done => Ok(Transition::Next(Phase::Done)),
        }
    }

    async fn load(&self, state: &mut JobState, ctx: &mut RunContext) -> Result<Transition> {
        let config_a = ctx
            .dataset_a
            .clone()
            .ok_or_else(|| ReconError::Configuration("Missing dataset_a".to_string()))?;
        let config_b = ctx
            .dataset_b
            .clone()
            .ok_or_else(|| ReconError::Configuration("Missing dataset_b".to_string()))?;

        let frame_a = self.loader.load(&config_a).await?;
        let frame_b = self.loader.load(&config_b).await?;
        state.dataset_a = Some(DatasetRef::from_dataset(config_a, &frame_a));
        state.dataset_b = Some(DatasetRef::from_dataset(config_b, &frame_b));
        ctx.frames = Some((frame_a, frame_b));
        Ok(Transition::Next(Phase::Materialize))
    }

    async fn materialize(&self, state: &mut JobState, ctx: &mut RunContext) -> Result<Transition> {
        let (frame_a, frame_b) = ctx
            .frames
            .as_ref()
            .ok_or_else(|| ReconError::Materialize("Datasets were not loaded".to_string()))?;

        let sides = [
            ("a", state.dataset_a.as_mut(), frame_a),
            ("b", state.dataset_b.as_mut(), frame_b),
        ];
        for (side, dataset_ref, frame) in sides {
            let dataset_ref = dataset_ref
                .ok_or_else(|| ReconError::Materialize(format!("Dataset {} is missing", side)))?;
            let table_id = match &dataset_ref.source {
                SourceConfig::Warehouse(source) => source.table_fqn.clone(),
                _ => {
                    let staged = self
                        .warehouse
                        .materialize(frame, &staging_table_name(&state.job_id, side))
                        .await
                        .map_err(|e| match e {
                            ReconError::Materialize(_) => e,
                            other => ReconError::Materialize(other.to_string()),
                        })?;
                    if !state.staged_tables.contains(&staged) {
                        state.staged_tables.push(staged.clone());
                    }
                    staged
                }
            };
            dataset_ref.table_id = Some(table_id);
        }
        Ok(Transition::Next(Phase::Map))
    }

    fn await_approval(&self, state: &mut JobState, ctx: &mut RunContext) -> Transition {
        match ctx.approval.clone() {
            Some(ApprovalDecision::Approved { approved_matches }) if !approved_matches.is_empty() => {
                let (approved, unknown) = state.mapping.retain_approved(&approved_matches);
                for pair in unknown {
                    let message = format!(
                        "Approved pair {} -> {} is not among the computed matches; ignored",
                        pair.source, pair.target
                    );
                    warn!("{}", message);
                    state.warn(message);
                }
                info!(
                    "Job {}: {} of {} matches approved",
                    state.job_id,
                    approved.matches.len(),
                    state.mapping.matches.len()
                );
                state.mapping = approved;
                state.status = RunStatus::Approved;
                self.persist(state);
                Transition::Next(Phase::EntityResolve)
            }
            Some(ApprovalDecision::Revise { rejected }) if !ctx.revised => {
                ctx.revised = true;
                state.exclude(&rejected);
                info!(
                    "Job {}: re-mapping without {} rejected pairs",
                    state.job_id,
                    state.excluded.len()
                );
                Transition::Next(Phase::Map)
            }
            _ => Transition::Suspend,
        }
    }

    fn synthesize(&self, state: &mut JobState) -> Result<Transition> {
        let table_a = table_spec(state.dataset_a.as_ref(), "dataset_a")?;
        let table_b = table_spec(state.dataset_b.as_ref(), "dataset_b")?;
        let synthesis = self
            .synthesizer
            .synthesize(&state.mapping.matches, &state.thresholds, &table_a, &table_b)?;
        state.warnings.extend(synthesis.warnings);
        state.query = Some(synthesis.query);
        Ok(Transition::Next(if state.dry_run {
            Phase::Explain
        } else {
            Phase::Execute
        }))
    }

    async fn execute(&self, state: &mut JobState) {
        let Some(query) = state.query.as_ref() else {
            state.execution_status = Some("FAILED: no query was synthesized".to_string());
            return;
        };
        match bounded(self.execution_timeout, self.warehouse.execute(query)).await {
            Ok(rows) => {
                info!("Job {}: {} rows flagged", state.job_id, rows.len());
                state.execution_status = Some(format!("{} rows flagged", rows.len()));
                state.rows = Some(rows.rows);
            }
            Err(e) => {
                let reason = redact(&e.to_string());
                warn!("Job {}: execution failed: {}", state.job_id, reason);
                state.execution_status = Some(format!("FAILED: {}", reason));
            }
        }
    }

    async fn explain(&self, state: &mut JobState) {
        let summary = explain::summarize(state);
        let explanation = match bounded(self.capability_timeout, self.explainer.explain(&summary)).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Explainer unavailable, using summary bullets: {}", redact(&e.to_string()));
                explain::fallback_explanation(&summary)
            }
        };
        state.explanation = Some(explanation);
    }

    /// Drop the job's staging tables. A failed drop is a warning, not an error.
    async fn drop_staging(&self, state: &mut JobState) {
        for table_id in std::mem::take(&mut state.staged_tables) {
            if let Err(e) = bounded(self.capability_timeout, self.warehouse.drop_staging(&table_id)).await {
                let message = format!("Staging table {} was not dropped: {}", table_id, redact(&e.to_string()));
                warn!("{}", message);
                state.warn(message);
            }
        }
    }

    fn persist(&self, state: &mut JobState) {
        if let Err(e) = self.store.save(state) {
            let message = format!("Job state was not saved: {}", redact(&e.to_string()));
            warn!("{}", message);
            state.warn(message);
        }
    }
}

fn fresh_state(job_id: String, request: &ReconRequest) -> Result<JobState> {
    for (name, config) in [("dataset_a", &request.dataset_a), ("dataset_b", &request.dataset_b)] {
        config
            .as_ref()
            .ok_or_else(|| ReconError::Configuration(format!("Missing {}", name)))?
            .validate()
            .map_err(|e| ReconError::Configuration(format!("{}: {}", name, e)))?;
    }
    Ok(JobState::new(job_id, request))
}

fn table_spec(dataset: Option<&DatasetRef>, name: &str) -> Result<TableSpec> {
    let dataset = dataset.ok_or_else(|| ReconError::Configuration(format!("Missing {}", name)))?;
    let table_id = dataset
        .table_id
        .clone()
        .ok_or_else(|| ReconError::Materialize(format!("{} has no physical table", name)))?;
    Ok(TableSpec::new(table_id, dataset.columns.clone()))
}

pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `<job>_<side>`, restricted to characters valid in a table name.
pub fn staging_table_name(job_id: &str, side: &str) -> String {
    let safe: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("recon_{}_{}", safe, side)
}
