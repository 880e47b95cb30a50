//! Per-type mismatch rules.
//!
//! These mirror the generated SQL expression for expression so that the
//! in-process warehouse flags exactly what the real warehouse would.

use super::Thresholds;
use crate::dataset::{json_to_f64, json_to_text};
use crate::similarity::array_similarity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericDiff {
    pub abs_diff: Option<f64>,
    /// `None` when either side is null or the target is zero.
    pub rel_diff: Option<f64>,
}

impl NumericDiff {
    pub fn is_mismatch(&self, thresholds: &Thresholds) -> bool {
        self.abs_diff.map_or(false, |d| d > thresholds.abs)
            || self.rel_diff.map_or(false, |d| d > thresholds.rel)
    }
}

pub fn numeric_diff(a: Option<f64>, b: Option<f64>) -> NumericDiff {
    match (a, b) {
        (Some(a), Some(b)) => {
            let abs_diff = (a - b).abs();
            let rel_diff = if b == 0.0 { None } else { Some(abs_diff / b.abs()) };
            NumericDiff {
                abs_diff: Some(abs_diff),
                rel_diff,
            }
        }
        _ => NumericDiff {
            abs_diff: None,
            rel_diff: None,
        },
    }
}

/// Jaccard overlap of two array cells; null counts as empty.
pub fn array_overlap(a: &Value, b: &Value) -> f64 {
    array_similarity(array_items(a), array_items(b))
}

pub fn array_mismatch(score: f64) -> bool {
    score < 1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StringVerdict {
    Match,
    Mismatch,
}

impl StringVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringVerdict::Match => "MATCH",
            StringVerdict::Mismatch => "MISMATCH",
        }
    }
}

pub fn string_verdict(a: &Value, b: &Value) -> StringVerdict {
    match (a.is_null(), b.is_null()) {
        (true, true) => StringVerdict::Match,
        (true, false) | (false, true) => StringVerdict::Mismatch,
        (false, false) => {
            if json_to_text(a).to_lowercase() == json_to_text(b).to_lowercase() {
                StringVerdict::Match
            } else {
                StringVerdict::Mismatch
            }
        }
    }
}

pub fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        other => json_to_f64(other),
    }
}

fn array_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(json_to_text)
            .collect(),
        Value::Null => Vec::new(),
        other => vec![json_to_text(other)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_rule() {
        let t = Thresholds::default();
        let diff = numeric_diff(Some(100.0), Some(100.5));
        assert_eq!(diff.abs_diff, Some(0.5));
        assert!(diff.is_mismatch(&t));

        let diff = numeric_diff(Some(100.0), Some(100.0));
        assert!(!diff.is_mismatch(&t));

        let diff = numeric_diff(Some(5.0), Some(0.0));
        assert_eq!(diff.rel_diff, None);
        assert!(diff.is_mismatch(&t));

        let diff = numeric_diff(None, Some(3.0));
        assert!(!diff.is_mismatch(&t));
    }

    #[test]
    fn test_relative_threshold_alone_can_flag() {
        let t = Thresholds { abs: 10.0, rel: 0.001 };
        let diff = numeric_diff(Some(10.0), Some(10.5));
        assert!(diff.is_mismatch(&t));
    }

    #[test]
    fn test_array_rule() {
        let score = array_overlap(&json!(["x", "y"]), &json!(["x"]));
        assert_eq!(score, 0.5);
        assert!(array_mismatch(score));
        assert_eq!(array_overlap(&Value::Null, &json!([])), 1.0);
        assert!(!array_mismatch(array_overlap(&json!(["b", "a"]), &json!(["a", "b", "a"]))));
    }

    #[test]
    fn test_string_rule() {
        assert_eq!(string_verdict(&Value::Null, &Value::Null), StringVerdict::Match);
        assert_eq!(string_verdict(&json!("x"), &Value::Null), StringVerdict::Mismatch);
        assert_eq!(string_verdict(&json!("Pune"), &json!("PUNE")), StringVerdict::Match);
        assert_eq!(string_verdict(&json!(12), &json!("12")), StringVerdict::Match);
        assert_eq!(string_verdict(&json!("Pune"), &json!("Oslo")), StringVerdict::Mismatch);
    }
}
