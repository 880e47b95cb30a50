//! Capability seams consumed by the pipeline.
//!
//! Every capability is an injected trait object. Callers wrap each call in
//! [`bounded`] and treat a timeout exactly like an error.

use crate::error::{ReconError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// A proposed (source, target) column pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub source: String,
    pub target: String,
    pub confidence: f64,
}

/// Two entity names believed to denote the same real-world thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPair {
    pub left: String,
    pub right: String,
    pub confidence: f64,
}

/// What the explainer gets to see about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    /// Query text, truncated.
    pub sql: String,
    pub execution_status: Option<String>,
    pub flagged_rows: Option<usize>,
    pub match_count: usize,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait MatchSuggester: Send + Sync {
    async fn suggest_matches(&self, columns_a: &[String], columns_b: &[String]) -> Result<Vec<Suggestion>>;
}

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, summary: &ExplanationSummary) -> Result<String>;
}

#[async_trait]
pub trait EntityMatcher: Send + Sync {
    async fn resolve_entities(&self, entities: &[String]) -> Result<Vec<EntityPair>>;
}

/// Run `fut` with a deadline; elapsing maps to `ReconError::Timeout`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ReconError::Timeout(timeout.as_secs()))?
}

/// Remove a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse a suggestion response. Accepts a bare array or an object with a
/// `matches`/`pairs` array; items use `a`/`b` or `source`/`target` keys.
/// Anything malformed yields an empty list.
pub fn parse_suggestions(text: &str) -> Vec<Suggestion> {
    let Ok(parsed) = serde_json::from_str::<Value>(strip_code_fences(text)) else {
        return Vec::new();
    };
    let items = match &parsed {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("matches").or_else(|| obj.get("pairs")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let source = string_field(item, &["a", "source", "a_col"])?;
            let target = string_field(item, &["b", "target", "b_col"])?;
            Some(Suggestion {
                source,
                target,
                confidence: confidence_field(item),
            })
        })
        .collect()
}

/// Parse `{"pairs": [{"left", "right", "confidence"}]}`.
pub fn parse_entity_pairs(text: &str) -> Result<Vec<EntityPair>> {
    let parsed: Value = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| ReconError::Llm(format!("Entity response is not JSON: {}", e)))?;
    let pairs = parsed
        .get("pairs")
        .and_then(Value::as_array)
        .ok_or_else(|| ReconError::Llm("Entity response has no `pairs` array".to_string()))?;
    Ok(pairs
        .iter()
        .filter_map(|item| {
            Some(EntityPair {
                left: string_field(item, &["left"])?,
                right: string_field(item, &["right"])?,
                confidence: confidence_field(item),
            })
        })
        .collect())
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .map(|s| s.to_string())
}

fn confidence_field(item: &Value) -> f64 {
    let raw = match item.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  [1]  "), "[1]");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
    }

    #[test]
    fn test_parse_suggestions_shapes() {
        let got = parse_suggestions(r#"[{"a": "emp_id", "b": "employee_id", "confidence": 0.9}]"#);
        assert_eq!(
            got,
            vec![Suggestion {
                source: "emp_id".into(),
                target: "employee_id".into(),
                confidence: 0.9
            }]
        );

        let got = parse_suggestions(
            "```json\n{\"matches\": [{\"source\": \"x\", \"target\": \"y\", \"confidence\": \"2\"}, {\"a\": 1}]}\n```",
        );
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].confidence, 1.0);

        let got = parse_suggestions(r#"[{"a": "x", "b": "y"}]"#);
        assert_eq!(got[0].confidence, 0.0);
    }

    #[test]
    fn test_parse_suggestions_garbage_is_empty() {
        assert!(parse_suggestions("MOCK_RESPONSE: You are a schema alignment expert").is_empty());
        assert!(parse_suggestions("42").is_empty());
        assert!(parse_suggestions(r#"{"other": []}"#).is_empty());
    }

    #[test]
    fn test_parse_entity_pairs() {
        let pairs =
            parse_entity_pairs(r#"{"pairs": [{"left": "ACME Corp", "right": "Acme", "confidence": 0.8}]}"#)
                .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].right, "Acme");
        assert!(parse_entity_pairs("not json").is_err());
        assert!(parse_entity_pairs("{}").is_err());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ReconError>(1)
        };
        let result = bounded(Duration::from_millis(10), slow).await;
        assert!(matches!(result, Err(ReconError::Timeout(_))));

        let fast = async { Ok::<_, ReconError>(7) };
        assert_eq!(bounded(Duration::from_secs(1), fast).await.unwrap(), 7);
    }
}
