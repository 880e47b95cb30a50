//! Runtime settings read from the environment.

use crate::error::{ReconError, Result};
use crate::llm::LlmProvider;
use crate::query_synth::JoinKeyPolicy;
use crate::schema_matcher::MatcherConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_STAGING_DATASET: &str = "recon_staging";
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_ENTITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct WarehouseSettings {
    /// BigQuery is used only when both a project and a token are present.
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub location: Option<String>,
    pub staging_dataset: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub matcher: MatcherConfig,
    pub join_keys: JoinKeyPolicy,
    pub capability_timeout: Duration,
    /// Bound on a single reconciliation query.
    pub execution_timeout: Duration,
    pub entity_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            join_keys: JoinKeyPolicy::default(),
            capability_timeout: Duration::from_secs(DEFAULT_CAPABILITY_TIMEOUT_SECS),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            entity_threshold: DEFAULT_ENTITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub warehouse: WarehouseSettings,
    pub pipeline: PipelineSettings,
    pub job_db: Option<PathBuf>,
    pub server_addr: String,
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("OPENAI_API_KEY");
        let provider = match get("RECON_MODEL_PROVIDER") {
            Some(name) => name.parse::<LlmProvider>()?,
            None if api_key.is_some() => LlmProvider::OpenAi,
            None => LlmProvider::Mock,
        };
        let provider = if provider == LlmProvider::OpenAi && api_key.is_none() {
            warn!("RECON_MODEL_PROVIDER=openai but OPENAI_API_KEY is not set; using mock provider");
            LlmProvider::Mock
        } else {
            provider
        };

        let mut matcher = MatcherConfig::default();
        if let Some(v) = parse_var::<f64>(&get, "RECON_DETERMINISTIC_THRESHOLD")? {
            matcher.deterministic_threshold = unit_interval("RECON_DETERMINISTIC_THRESHOLD", v)?;
        }
        if let Some(v) = parse_var::<f64>(&get, "RECON_SUGGESTION_THRESHOLD")? {
            matcher.suggestion_threshold = unit_interval("RECON_SUGGESTION_THRESHOLD", v)?;
        }

        let mut pipeline = PipelineSettings {
            matcher,
            ..PipelineSettings::default()
        };
        if let Some(token) = get("RECON_JOIN_KEY_TOKEN") {
            pipeline.join_keys = JoinKeyPolicy::new(token);
        }
        if let Some(secs) = parse_var::<u64>(&get, "RECON_CAPABILITY_TIMEOUT_SECS")? {
            pipeline.capability_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>(&get, "RECON_EXECUTION_TIMEOUT_SECS")? {
            pipeline.execution_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = parse_var::<f64>(&get, "RECON_ENTITY_THRESHOLD")? {
            pipeline.entity_threshold = unit_interval("RECON_ENTITY_THRESHOLD", v)?;
        }

        Ok(Self {
            llm: LlmSettings {
                provider,
                api_key,
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            },
            warehouse: WarehouseSettings {
                project_id: get("GOOGLE_PROJECT_ID"),
                access_token: get("GOOGLE_ACCESS_TOKEN"),
                location: get("BIGQUERY_LOCATION"),
                staging_dataset: get("RECON_STAGING_DATASET")
                    .unwrap_or_else(|| DEFAULT_STAGING_DATASET.to_string()),
            },
            pipeline,
            job_db: get("RECON_JOB_DB").map(PathBuf::from),
            server_addr: get("RECON_SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
        })
    }

    pub fn uses_bigquery(&self) -> bool {
        self.warehouse.project_id.is_some() && self.warehouse.access_token.is_some()
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ReconError::Configuration(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(None),
    }
}

fn unit_interval(key: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ReconError::Configuration(format!("{} must be within [0, 1], got {}", key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.llm.provider, LlmProvider::Mock);
        assert_eq!(s.llm.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(s.warehouse.staging_dataset, "recon_staging");
        assert_eq!(s.pipeline.matcher.deterministic_threshold, 0.65);
        assert_eq!(s.pipeline.matcher.suggestion_threshold, 0.55);
        assert_eq!(s.pipeline.join_keys.key_token, "id");
        assert_eq!(s.pipeline.capability_timeout, Duration::from_secs(30));
        assert_eq!(s.server_addr, "0.0.0.0:8080");
        assert!(!s.uses_bigquery());
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("RECON_DETERMINISTIC_THRESHOLD", "0.7"),
            ("RECON_JOIN_KEY_TOKEN", "KEY"),
            ("GOOGLE_PROJECT_ID", "proj"),
            ("GOOGLE_ACCESS_TOKEN", "tok"),
            ("RECON_JOB_DB", "/tmp/jobs.db"),
        ])
        .unwrap();
        assert_eq!(s.llm.provider, LlmProvider::OpenAi);
        assert_eq!(s.pipeline.matcher.deterministic_threshold, 0.7);
        assert_eq!(s.pipeline.join_keys.key_token, "key");
        assert!(s.uses_bigquery());
        assert_eq!(s.job_db, Some(PathBuf::from("/tmp/jobs.db")));
    }

    #[test]
    fn test_openai_without_key_falls_back_to_mock() {
        let s = settings(&[("RECON_MODEL_PROVIDER", "openai")]).unwrap();
        assert_eq!(s.llm.provider, LlmProvider::Mock);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(settings(&[("RECON_MODEL_PROVIDER", "gemini")]).is_err());
        assert!(settings(&[("RECON_SUGGESTION_THRESHOLD", "1.5")]).is_err());
        assert!(settings(&[("RECON_CAPABILITY_TIMEOUT_SECS", "soon")]).is_err());
    }
}
