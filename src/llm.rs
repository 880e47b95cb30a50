use crate::capability::{
    parse_entity_pairs, parse_suggestions, strip_code_fences, EntityMatcher, EntityPair, Explainer,
    ExplanationSummary, MatchSuggester, Suggestion,
};
use crate::config::LlmSettings;
use crate::error::{ReconError, Result};
use crate::observability::redact;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const MOCK_PREFIX_CHARS: usize = 400;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    /// Echoes the prompt; useful offline and in tests.
    Mock,
}

impl FromStr for LlmProvider {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "mock" => Ok(LlmProvider::Mock),
            other => Err(ReconError::Configuration(format!(
                "Unknown LLM provider: {} (expected openai or mock)",
                other
            ))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::Mock => write!(f, "mock"),
        }
    }
}

/// Chat-completions client backing all three language capabilities.
pub struct LlmClient {
    provider: LlmProvider,
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ReconError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider: settings.provider,
            api_key: settings.api_key.clone().unwrap_or_default(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            client,
        })
    }

    pub fn mock() -> Self {
        Self {
            provider: LlmProvider::Mock,
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        if self.provider == LlmProvider::Mock {
            let prefix: String = prompt.chars().take(MOCK_PREFIX_CHARS).collect();
            return Ok(format!("MOCK_RESPONSE: {}", prefix));
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "Be precise, return JSON when asked, no markdown."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReconError::Llm(format!("LLM API call failed: {}", redact(&e.to_string()))))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReconError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(ReconError::Llm(format!(
                "LLM API returned {}: {}",
                status,
                redact(message)
            )));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ReconError::Llm("No content in LLM response".to_string()))?;

        debug!("LLM returned {} chars", content.len());
        Ok(content.to_string())
    }
}

fn suggestion_prompt(columns_a: &[String], columns_b: &[String]) -> String {
    format!(
        "You are a schema alignment expert.\n\
         Given two column lists, produce the closest matching pairs.\n\n\
         Columns A: {:?}\n\
         Columns B: {:?}\n\
         Return ONLY a JSON array of objects like:\n\
         [{{\"a\": \"colA\", \"b\": \"colB\", \"confidence\": 0.0 }}, ...]",
        columns_a, columns_b
    )
}

fn explanation_prompt(summary: &ExplanationSummary) -> Result<String> {
    let summary_json = serde_json::to_string(summary)?;
    Ok(format!(
        "You are a reconciliation analyst.\n\
         Given the job summary, explain likely causes of mismatches and remediation steps.\n\
         Write 4-6 short bullet points.\n\
         Summary: {}\n",
        summary_json
    ))
}

fn entity_prompt(entities: &[String]) -> Result<String> {
    let entities_json = serde_json::to_string(entities)?;
    Ok(format!(
        "Resolve fuzzy textual entity names across two systems.\n\
         Return JSON: {{\"pairs\":[{{\"left\":\"\",\"right\":\"\",\"confidence\":0.0}}]}}.\n\
         Entities: {}\n",
        entities_json
    ))
}

#[async_trait]
impl MatchSuggester for LlmClient {
    async fn suggest_matches(&self, columns_a: &[String], columns_b: &[String]) -> Result<Vec<Suggestion>> {
        let response = self.call_llm(&suggestion_prompt(columns_a, columns_b)).await?;
        Ok(parse_suggestions(&response))
    }
}

#[async_trait]
impl Explainer for LlmClient {
    async fn explain(&self, summary: &ExplanationSummary) -> Result<String> {
        let response = self.call_llm(&explanation_prompt(summary)?).await?;
        let text = strip_code_fences(&response).to_string();
        if text.is_empty() {
            return Err(ReconError::Llm("Empty explanation".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl EntityMatcher for LlmClient {
    async fn resolve_entities(&self, entities: &[String]) -> Result<Vec<EntityPair>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.call_llm(&entity_prompt(entities)?).await?;
        parse_entity_pairs(&response)
    }
}
