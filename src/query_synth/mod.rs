//! Query Synthesizer
//!
//! Turns an approved match set into a deterministic reconciliation query:
//! join-key selection, column validation, typed comparison pairs and the
//! rendered SQL text.

pub mod rules;
pub mod template;

use crate::dataset::ColumnType;
use crate::error::{ReconError, Result};
use crate::schema_matcher::{ColumnMatch, ColumnPair};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub const DEFAULT_ABS_THRESHOLD: f64 = 0.01;
pub const DEFAULT_REL_THRESHOLD: f64 = 0.001;
pub const DEFAULT_JOIN_KEY_TOKEN: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_abs")]
    pub abs: f64,
    #[serde(default = "default_rel")]
    pub rel: f64,
}

fn default_abs() -> f64 {
    DEFAULT_ABS_THRESHOLD
}

fn default_rel() -> f64 {
    DEFAULT_REL_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            abs: DEFAULT_ABS_THRESHOLD,
            rel: DEFAULT_REL_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("abs", self.abs), ("rel", self.rel)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconError::Configuration(format!(
                    "Threshold `{}` must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Which matches are treated as join keys.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKeyPolicy {
    /// Lowercased substring marking a key column.
    pub key_token: String,
}

impl JoinKeyPolicy {
    pub fn new(key_token: impl Into<String>) -> Self {
        Self {
            key_token: key_token.into().to_lowercase(),
        }
    }

    fn is_key(&self, m: &ColumnMatch) -> bool {
        m.source.to_lowercase().contains(&self.key_token) || m.target.to_lowercase().contains(&self.key_token)
    }
}

impl Default for JoinKeyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_JOIN_KEY_TOKEN)
    }
}

/// A physical table and, when known, its column set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table_id: String,
    /// Empty means unknown; nothing is validated against it.
    #[serde(default)]
    pub columns: Vec<String>,
}

impl TableSpec {
    pub fn new(table_id: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table_id: table_id.into(),
            columns,
        }
    }

    fn knows(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSet {
    pub numeric: Vec<ColumnPair>,
    pub array: Vec<ColumnPair>,
    pub string: Vec<ColumnPair>,
}

impl ComparisonSet {
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.array.is_empty() && self.string.is_empty()
    }

    pub fn len(&self) -> usize {
        self.numeric.len() + self.array.len() + self.string.len()
    }

    fn push(&mut self, column_type: ColumnType, pair: ColumnPair) {
        match column_type {
            ColumnType::Numeric => self.numeric.push(pair),
            ColumnType::Array => self.array.push(pair),
            ColumnType::String => self.string.push(pair),
        }
    }
}

/// The structured form the query text is rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconPlan {
    pub table_a: String,
    pub table_b: String,
    pub join_pairs: Vec<ColumnPair>,
    pub comparisons: ComparisonSet,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconQuery {
    pub sql: String,
    pub plan: ReconPlan,
}

/// Query plus everything that was dropped on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub query: ReconQuery,
    pub warnings: Vec<String>,
}

pub struct QuerySynthesizer {
    policy: JoinKeyPolicy,
}

impl QuerySynthesizer {
    pub fn new(policy: JoinKeyPolicy) -> Self {
        Self { policy }
    }

    /// Join keys per policy: every key-like match, else the first match.
    pub fn select_join_keys<'m>(&self, matches: &'m [ColumnMatch]) -> Result<Vec<&'m ColumnMatch>> {
        let keyed: Vec<&ColumnMatch> = matches.iter().filter(|m| self.policy.is_key(m)).collect();
        if !keyed.is_empty() {
            return Ok(keyed);
        }
        matches
            .first()
            .map(|m| vec![m])
            .ok_or_else(|| ReconError::JoinKey("No matches available to join on".to_string()))
    }

    pub fn synthesize(
        &self,
        matches: &[ColumnMatch],
        thresholds: &Thresholds,
        table_a: &TableSpec,
        table_b: &TableSpec,
    ) -> Result<Synthesis> {
        thresholds.validate()?;
        let mut warnings = Vec::new();

        let candidates = self.select_join_keys(matches)?;
        let mut join_pairs = Vec::new();
        let mut rejected = Vec::new();
        for m in &candidates {
            if table_a.knows(&m.source) && table_b.knows(&m.target) {
                join_pairs.push(m.pair());
            } else {
                rejected.push(format!("{} = {}", m.source, m.target));
            }
        }
        if !rejected.is_empty() {
            let message = format!("Dropped join keys referencing unknown columns: {}", rejected.join(", "));
            warn!("{}", message);
            warnings.push(message);
        }
        if join_pairs.is_empty() {
            return Err(ReconError::JoinKey(format!(
                "No valid join keys; missing columns for: {}",
                rejected.join(", ")
            )));
        }

        let key_pairs: HashSet<ColumnPair> = candidates.iter().map(|m| m.pair()).collect();
        let mut comparisons = ComparisonSet::default();
        for m in matches.iter().filter(|m| !key_pairs.contains(&m.pair())) {
            if table_a.knows(&m.source) && table_b.knows(&m.target) {
                comparisons.push(m.column_type, m.pair());
            } else {
                let message = format!(
                    "Dropped {} comparison {} -> {}: column not found",
                    m.column_type, m.source, m.target
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }
        if comparisons.is_empty() {
            warnings.push("No comparison columns; the query cannot flag any row".to_string());
        }

        let plan = ReconPlan {
            table_a: table_a.table_id.clone(),
            table_b: table_b.table_id.clone(),
            join_pairs,
            comparisons,
            thresholds: *thresholds,
        };
        let sql = template::render(&plan);
        info!(
            "Synthesized reconciliation query: {} join keys, {} comparisons",
            plan.join_pairs.len(),
            plan.comparisons.len()
        );
        Ok(Synthesis {
            query: ReconQuery { sql, plan },
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_matcher::MatchOrigin;

    fn m(source: &str, target: &str, t: ColumnType) -> ColumnMatch {
        ColumnMatch {
            source: source.into(),
            target: target.into(),
            confidence: 0.9,
            column_type: t,
            origin: MatchOrigin::Deterministic,
        }
    }

    fn tables() -> (TableSpec, TableSpec) {
        (TableSpec::new("p.ds.a", vec![]), TableSpec::new("p.ds.b", vec![]))
    }

    #[test]
    fn test_join_key_by_token() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let matches = vec![
            m("name", "full_name", ColumnType::String),
            m("emp_id", "employee_id", ColumnType::Numeric),
        ];
        let keys = synth.select_join_keys(&matches).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].source, "emp_id");
        assert_eq!(keys[0].target, "employee_id");
    }

    #[test]
    fn test_join_key_falls_back_to_first_match() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let matches = vec![
            m("name", "full_name", ColumnType::String),
            m("amount", "amt", ColumnType::Numeric),
        ];
        let keys = synth.select_join_keys(&matches).unwrap();
        assert_eq!(keys[0].source, "name");
    }

    #[test]
    fn test_no_matches_is_join_key_error() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let (a, b) = tables();
        let err = synth.synthesize(&[], &Thresholds::default(), &a, &b).unwrap_err();
        assert!(matches!(err, ReconError::JoinKey(_)));
    }

    #[test]
    fn test_unknown_join_columns_are_fatal() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let a = TableSpec::new("a", vec!["emp_id".into()]);
        let b = TableSpec::new("b", vec!["other".into()]);
        let matches = vec![m("emp_id", "employee_id", ColumnType::Numeric)];
        let err = synth.synthesize(&matches, &Thresholds::default(), &a, &b).unwrap_err();
        match err {
            ReconError::JoinKey(msg) => assert!(msg.contains("emp_id = employee_id")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_comparisons_partitioned_and_validated() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let a = TableSpec::new("a", vec!["emp_id".into(), "salary".into(), "tags".into(), "ghost".into()]);
        let b = TableSpec::new("b", vec!["employee_id".into(), "pay".into(), "labels".into()]);
        let matches = vec![
            m("emp_id", "employee_id", ColumnType::Numeric),
            m("salary", "pay", ColumnType::Numeric),
            m("tags", "labels", ColumnType::Array),
            m("ghost", "missing", ColumnType::String),
        ];
        let out = synth.synthesize(&matches, &Thresholds::default(), &a, &b).unwrap();
        let plan = &out.query.plan;
        assert_eq!(plan.join_pairs, vec![ColumnPair::new("emp_id", "employee_id")]);
        assert_eq!(plan.comparisons.numeric, vec![ColumnPair::new("salary", "pay")]);
        assert_eq!(plan.comparisons.array, vec![ColumnPair::new("tags", "labels")]);
        assert!(plan.comparisons.string.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("ghost"));
    }

    #[test]
    fn test_join_only_query_warns_and_never_flags() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let (a, b) = tables();
        let matches = vec![m("id", "id", ColumnType::Numeric)];
        let out = synth.synthesize(&matches, &Thresholds::default(), &a, &b).unwrap();
        assert!(out.query.plan.comparisons.is_empty());
        assert!(out.query.sql.contains("WHERE FALSE"));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let (a, b) = tables();
        let matches = vec![
            m("emp_id", "employee_id", ColumnType::Numeric),
            m("salary", "pay", ColumnType::Numeric),
            m("city", "town", ColumnType::String),
        ];
        let first = synth.synthesize(&matches, &Thresholds::default(), &a, &b).unwrap();
        let second = synth.synthesize(&matches, &Thresholds::default(), &a, &b).unwrap();
        assert_eq!(first.query.sql, second.query.sql);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let synth = QuerySynthesizer::new(JoinKeyPolicy::default());
        let (a, b) = tables();
        let matches = vec![m("id", "id", ColumnType::Numeric)];
        let bad = Thresholds { abs: -1.0, rel: 0.1 };
        assert!(matches!(
            synth.synthesize(&matches, &bad, &a, &b),
            Err(ReconError::Configuration(_))
        ));
    }
}
