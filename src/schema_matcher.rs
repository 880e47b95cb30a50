//! Schema Matcher
//!
//! Hybrid column alignment: suggestions from the `MatchSuggester`
//! capability are preferred when confident enough, with a deterministic
//! name-similarity fallback per source column.

use crate::capability::{bounded, MatchSuggester, Suggestion};
use crate::dataset::{ColumnType, DatasetRef};
use crate::error::{ReconError, Result};
use crate::observability::redact;
use crate::similarity::name_similarity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_DETERMINISTIC_THRESHOLD: f64 = 0.65;
pub const DEFAULT_SUGGESTION_THRESHOLD: f64 = 0.55;

#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Minimum name similarity for a deterministic match.
    pub deterministic_threshold: f64,
    /// Minimum confidence for a suggested match to win.
    pub suggestion_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            deterministic_threshold: DEFAULT_DETERMINISTIC_THRESHOLD,
            suggestion_threshold: DEFAULT_SUGGESTION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrigin {
    Suggested,
    Deterministic,
}

/// A (source, target) column pair as exchanged with approvers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnPair {
    #[serde(alias = "a", alias = "a_col")]
    pub source: String,
    #[serde(alias = "b", alias = "b_col")]
    pub target: String,
}

impl ColumnPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub source: String,
    pub target: String,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub origin: MatchOrigin,
}

impl ColumnMatch {
    pub fn pair(&self) -> ColumnPair {
        ColumnPair::new(self.source.clone(), self.target.clone())
    }

    pub fn is_pair(&self, pair: &ColumnPair) -> bool {
        self.source == pair.source && self.target == pair.target
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub matches: Vec<ColumnMatch>,
    pub numeric_columns: Vec<String>,
    pub array_columns: Vec<String>,
    pub string_columns: Vec<String>,
}

impl SchemaMapping {
    /// Derive the per-type column lists (distinct, sorted source columns).
    pub fn from_matches(matches: Vec<ColumnMatch>) -> Self {
        let mut by_type: BTreeMap<ColumnType, BTreeSet<String>> = BTreeMap::new();
        for m in &matches {
            by_type.entry(m.column_type).or_default().insert(m.source.clone());
        }
        let mut take = |t: ColumnType| -> Vec<String> {
            by_type.remove(&t).map(|s| s.into_iter().collect()).unwrap_or_default()
        };
        Self {
            numeric_columns: take(ColumnType::Numeric),
            array_columns: take(ColumnType::Array),
            string_columns: take(ColumnType::String),
            matches,
        }
    }

    /// Keep exactly the approved pairs. Returns the filtered mapping and the
    /// approved pairs that were not among the computed matches.
    pub fn retain_approved(&self, approved: &[ColumnPair]) -> (SchemaMapping, Vec<ColumnPair>) {
        let kept: Vec<ColumnMatch> = self
            .matches
            .iter()
            .filter(|m| approved.iter().any(|p| m.is_pair(p)))
            .cloned()
            .collect();
        let unknown: Vec<ColumnPair> = approved
            .iter()
            .filter(|p| !self.matches.iter().any(|m| m.is_pair(p)))
            .cloned()
            .collect();
        (SchemaMapping::from_matches(kept), unknown)
    }
}

pub struct SchemaMatcher {
    suggester: Arc<dyn MatchSuggester>,
    config: MatcherConfig,
    timeout: Duration,
}

impl SchemaMatcher {
    pub fn new(suggester: Arc<dyn MatchSuggester>, config: MatcherConfig, timeout: Duration) -> Self {
        Self {
            suggester,
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Align the columns of `a` onto `b`, skipping any `excluded` pair.
    ///
    /// Only missing inputs fail; a broken or slow suggester degrades to
    /// deterministic matching.
    pub async fn map(
        &self,
        a: Option<&DatasetRef>,
        b: Option<&DatasetRef>,
        excluded: &[ColumnPair],
    ) -> Result<SchemaMapping> {
        let a = a.ok_or_else(|| ReconError::Configuration("Schema mapping needs dataset_a".to_string()))?;
        let b = b.ok_or_else(|| ReconError::Configuration("Schema mapping needs dataset_b".to_string()))?;

        let suggestions = match bounded(self.timeout, self.suggester.suggest_matches(&a.columns, &b.columns)).await
        {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(
                    "Match suggestions unavailable, using deterministic matching only: {}",
                    redact(&e.to_string())
                );
                Vec::new()
            }
        };

        let mapping = merge_matches(
            &a.columns,
            &a.column_types,
            &b.columns,
            &suggestions,
            excluded,
            &self.config,
        );
        info!(
            "Mapped {} of {} source columns ({} suggestions received)",
            mapping.matches.len(),
            a.columns.len(),
            suggestions.len()
        );
        Ok(mapping)
    }
}

/// Merge suggestions with deterministic candidates, one match per source column.
pub fn merge_matches(
    columns_a: &[String],
    types_a: &BTreeMap<String, ColumnType>,
    columns_b: &[String],
    suggestions: &[Suggestion],
    excluded: &[ColumnPair],
    config: &MatcherConfig,
) -> SchemaMapping {
    let known_a: HashSet<&str> = columns_a.iter().map(String::as_str).collect();
    let known_b: HashSet<&str> = columns_b.iter().map(String::as_str).collect();
    let is_excluded = |source: &str, target: &str| {
        excluded
            .iter()
            .any(|p| p.source == source && p.target == target)
    };

    let usable: Vec<&Suggestion> = suggestions
        .iter()
        .filter(|s| {
            let ok = known_a.contains(s.source.as_str())
                && known_b.contains(s.target.as_str())
                && !is_excluded(s.source.as_str(), s.target.as_str());
            if !ok {
                debug!("Discarding suggestion {} -> {}", s.source, s.target);
            }
            ok
        })
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut matches = Vec::new();
    for source in columns_a {
        if !seen.insert(source.as_str()) {
            continue;
        }
        let column_type = types_a.get(source).copied().unwrap_or(ColumnType::String);

        let best_suggestion = usable
            .iter()
            .copied()
            .filter(|s| &s.source == source)
            .fold(None::<&Suggestion>, |best, s| match best {
                Some(b) if b.confidence >= s.confidence => Some(b),
                _ => Some(s),
            });
        if let Some(s) = best_suggestion.filter(|s| s.confidence >= config.suggestion_threshold) {
            matches.push(ColumnMatch {
                source: source.clone(),
                target: s.target.clone(),
                confidence: s.confidence,
                column_type,
                origin: MatchOrigin::Suggested,
            });
            continue;
        }

        let candidate = deterministic_best(source, columns_b, |t: &str| is_excluded(source.as_str(), t));
        if let Some((target, score)) = candidate.filter(|(_, s)| *s >= config.deterministic_threshold) {
            matches.push(ColumnMatch {
                source: source.clone(),
                target: target.clone(),
                confidence: score,
                column_type,
                origin: MatchOrigin::Deterministic,
            });
        }
    }

    SchemaMapping::from_matches(matches)
}

/// The target maximizing name similarity; the first target wins ties.
pub fn deterministic_best<'b, F>(source: &str, columns_b: &'b [String], skip: F) -> Option<(&'b String, f64)>
where
    F: Fn(&str) -> bool,
{
    let mut best: Option<(&String, f64)> = None;
    let mut best_score = 0.0;
    for target in columns_b {
        if skip(target) {
            continue;
        }
        let score = name_similarity(source, target);
        if score > best_score {
            best_score = score;
            best = Some((target, score));
        }
    }
    best
}
