use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use recon_align::connectors::{ConnectorLoader, FileSource, SourceConfig, SourceLoader};
use recon_align::dataset::{DatasetRef, Record};
use recon_align::llm::LlmClient;
use recon_align::observability::init_tracing;
use recon_align::orchestrator::{ApprovalDecision, Orchestrator, ReconRequest, ReconResponse, RunStatus};
use recon_align::schema_matcher::{ColumnPair, SchemaMatcher};
use recon_align::similarity::name_similarity;
use recon_align::warehouse::LocalWarehouse;
use recon_align::Settings;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "recon-align")]
#[command(about = "Schema alignment and reconciliation between two datasets")]
struct Args {
    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) a reconciliation job from a JSON request file
    Run {
        /// Path to the request JSON
        #[arg(short, long)]
        request: PathBuf,

        /// Synthesize SQL without executing it
        #[arg(long)]
        dry_run: bool,

        /// Approve every computed match instead of stopping for review
        #[arg(long)]
        auto_approve: bool,

        /// Write flagged rows to this CSV file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// SQLite job store (overrides RECON_JOB_DB)
        #[arg(long)]
        job_db: Option<PathBuf>,
    },
    /// Propose column matches between two local files
    Match {
        #[arg(short, long)]
        a: PathBuf,
        #[arg(short, long)]
        b: PathBuf,
    },
    /// Score two column names
    Similarity { a: String, b: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match args.command {
        Command::Run {
            request,
            dry_run,
            auto_approve,
            out,
            job_db,
        } => run(&request, dry_run, auto_approve, out.as_deref(), job_db).await,
        Command::Match { a, b } => match_files(a, b).await,
        Command::Similarity { a, b } => {
            println!("{:.4}", name_similarity(&a, &b));
            Ok(())
        }
    }
}

async fn run(
    request_path: &Path,
    dry_run: bool,
    auto_approve: bool,
    out: Option<&Path>,
    job_db: Option<PathBuf>,
) -> Result<()> {
    let raw = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read {}", request_path.display()))?;
    let mut request: ReconRequest = serde_json::from_str(&raw).context("Invalid request JSON")?;
    request.dry_run |= dry_run;

    let mut settings = Settings::from_env()?;
    if job_db.is_some() {
        settings.job_db = job_db;
    }
    let orchestrator = Orchestrator::from_settings(&settings)?;

    let mut response = orchestrator.run(request.clone()).await;
    if auto_approve && response.status == RunStatus::PendingApproval {
        let approved_matches: Vec<ColumnPair> = response.matches.iter().map(|m| m.pair()).collect();
        info!("Auto-approving {} matches for job {}", approved_matches.len(), response.job_id);
        let resume = ReconRequest {
            job_id: Some(response.job_id.clone()),
            approval: Some(ApprovalDecision::Approved { approved_matches }),
            dry_run: request.dry_run,
            ..ReconRequest::default()
        };
        response = orchestrator.run(resume).await;
    }

    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Some(path) = out {
        let rows = response.rows.as_deref().unwrap_or_default();
        write_rows_csv(path, rows)?;
        info!("Wrote {} flagged rows to {}", rows.len(), path.display());
    }

    if response.status == RunStatus::Error {
        bail!(describe_error(&response));
    }
    Ok(())
}

fn describe_error(response: &ReconResponse) -> String {
    match &response.error {
        Some(e) => format!("Job {} failed ({}): {}", response.job_id, e.kind, e.message),
        None => format!("Job {} failed", response.job_id),
    }
}

async fn match_files(a: PathBuf, b: PathBuf) -> Result<()> {
    let settings = Settings::from_env()?;
    let loader = ConnectorLoader::new(Arc::new(LocalWarehouse::new(
        settings.warehouse.staging_dataset.clone(),
    )));
    let llm = Arc::new(LlmClient::new(&settings.llm)?);
    let matcher = SchemaMatcher::new(
        llm,
        settings.pipeline.matcher.clone(),
        settings.pipeline.capability_timeout,
    );

    let mut refs = Vec::new();
    for path in [a, b] {
        let config = SourceConfig::File(FileSource {
            path,
            format: None,
            columns: Vec::new(),
        });
        let dataset = loader.load(&config).await?;
        refs.push(DatasetRef::from_dataset(config, &dataset));
    }

    let mapping = matcher.map(refs.first(), refs.get(1), &[]).await?;
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

/// Flatten `a_row`/`b_row` objects into `a.<col>`/`b.<col>` columns.
fn flatten_row(row: &Record) -> Vec<(String, String)> {
    let mut cells = Vec::new();
    for (key, value) in row {
        match value {
            Value::Object(nested) if key == "a_row" || key == "b_row" => {
                let prefix = &key[..1];
                for (col, v) in nested {
                    cells.push((format!("{}.{}", prefix, col), cell_text(v)));
                }
            }
            other => cells.push((key.clone(), cell_text(other))),
        }
    }
    cells
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_rows_csv(path: &Path, rows: &[Record]) -> Result<()> {
    let flattened: Vec<Vec<(String, String)>> = rows.iter().map(flatten_row).collect();
    let header: Vec<String> = flattened
        .iter()
        .flat_map(|row| row.iter().map(|(name, _)| name.clone()))
        .unique()
        .collect();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(&header)?;
    for row in &flattened {
        let record: Vec<&str> = header
            .iter()
            .map(|name| {
                row.iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("")
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_row() {
        let row: Record = serde_json::from_value(json!({
            "a_row": {"id": 1, "amount": 100.0},
            "b_row": {"id": 1, "amount": 100.5},
            "amount_abs_diff": 0.5
        }))
        .unwrap();
        let cells = flatten_row(&row);
        assert!(cells.contains(&("a.amount".to_string(), "100.0".to_string())));
        assert!(cells.contains(&("b.id".to_string(), "1".to_string())));
        assert!(cells.contains(&("amount_abs_diff".to_string(), "0.5".to_string())));
    }

    #[test]
    fn test_write_rows_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flagged.csv");
        let row: Record = serde_json::from_value(json!({
            "a_row": {"id": 7, "name": "x"},
            "b_row": {"id": 7, "name": null},
            "name_string_recon": "MISMATCH"
        }))
        .unwrap();
        write_rows_csv(&path, &[row]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("a.name"));
        assert!(header.contains("name_string_recon"));
        assert!(lines.next().unwrap().contains("MISMATCH"));
    }
}
