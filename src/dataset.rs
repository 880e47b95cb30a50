//! Tabular datasets and their references.
//!
//! `TabularDataset` wraps a polars `DataFrame`; `DatasetRef` is the
//! serializable description of one side of a reconciliation job.

use crate::connectors::SourceConfig;
use crate::error::{ReconError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Column type classification used for matching and query synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Array,
    String,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Numeric => write!(f, "numeric"),
            ColumnType::Array => write!(f, "array"),
            ColumnType::String => write!(f, "string"),
        }
    }
}

/// One flat record: column name to JSON value.
pub type Record = Map<String, Value>;

/// An ordered row/column buffer with named, typed columns.
#[derive(Debug, Clone)]
pub struct TabularDataset {
    frame: DataFrame,
}

impl TabularDataset {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Keep only the requested columns (in the requested order).
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        if columns.is_empty() {
            return Ok(self.clone());
        }
        let frame = self.frame.select(columns.iter().map(|c| c.as_str()))?;
        Ok(Self { frame })
    }

    /// Classify every column by inspecting its values.
    ///
    /// List-typed columns (every non-null value a sequence) are arrays,
    /// numeric dtypes are numeric, anything else is a string.
    pub fn classify_columns(&self) -> BTreeMap<String, ColumnType> {
        self.frame
            .get_columns()
            .iter()
            .map(|series| {
                let column_type = match series.dtype() {
                    DataType::List(_) => ColumnType::Array,
                    dt if dt.is_numeric() => ColumnType::Numeric,
                    _ => ColumnType::String,
                };
                (series.name().to_string(), column_type)
            })
            .collect()
    }

    /// Row-major JSON view of the data.
    pub fn records(&self) -> Result<Vec<Record>> {
        let columns = self.frame.get_columns();
        let mut out = Vec::with_capacity(self.frame.height());
        for row_idx in 0..self.frame.height() {
            let mut record = Map::new();
            for series in columns {
                let value = series.get(row_idx)?;
                record.insert(series.name().to_string(), any_value_to_json(&value));
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Build a dataset from typed column values.
    ///
    /// Used by connectors that receive rows over the wire. Numeric columns
    /// become `Float64`, array columns `List(String)`, string columns `String`.
    pub fn from_columns(columns: Vec<(String, ColumnType, Vec<Value>)>) -> Result<Self> {
        let mut series_vec = Vec::with_capacity(columns.len());
        for (name, column_type, values) in columns {
            let series = match column_type {
                ColumnType::Numeric => {
                    let nums: Vec<Option<f64>> = values.iter().map(json_to_f64).collect();
                    Series::new(&name, nums)
                }
                ColumnType::Array => {
                    let lists: Vec<Series> = values
                        .iter()
                        .map(|v| {
                            let items: Vec<String> = match v {
                                Value::Array(items) => items.iter().map(json_to_text).collect(),
                                Value::Null => Vec::new(),
                                other => vec![json_to_text(other)],
                            };
                            Series::new("", items)
                        })
                        .collect();
                    Series::new(&name, lists)
                }
                ColumnType::String => {
                    let strings: Vec<Option<String>> = values
                        .iter()
                        .map(|v| if v.is_null() { None } else { Some(json_to_text(v)) })
                        .collect();
                    Series::new(&name, strings)
                }
            };
            series_vec.push(series);
        }
        DataFrame::new(series_vec)
            .map(Self::new)
            .map_err(|e| ReconError::Load(format!("Failed to build dataset: {}", e)))
    }
}

pub(crate) fn json_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub(crate) fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn any_value_to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(*v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::List(series) => {
            let items = (0..series.len())
                .map(|i| {
                    series
                        .get(i)
                        .map(|v| any_value_to_json(&v))
                        .unwrap_or(Value::Null)
                })
                .collect();
            Value::Array(items)
        }
        other => Value::String(other.to_string()),
    }
}

/// Serializable description of one side of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetRef {
    pub source: SourceConfig,
    /// Fully-qualified table identifier, filled at materialization.
    pub table_id: Option<String>,
    pub columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    pub row_count: usize,
}

impl DatasetRef {
    pub fn from_dataset(source: SourceConfig, dataset: &TabularDataset) -> Self {
        Self {
            source,
            table_id: None,
            columns: dataset.column_names(),
            column_types: dataset.classify_columns(),
            row_count: dataset.height(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_columns() {
        let tags = Series::new(
            "tags",
            vec![Series::new("", ["x", "y"]), Series::new("", ["z"])],
        );
        let mut frame = df![
            "emp_id" => [1i64, 2],
            "salary" => [100.0, 200.5],
            "city" => ["Pune", "Oslo"]
        ]
        .unwrap();
        frame.with_column(tags).unwrap();

        let types = TabularDataset::new(frame).classify_columns();
        assert_eq!(types["emp_id"], ColumnType::Numeric);
        assert_eq!(types["salary"], ColumnType::Numeric);
        assert_eq!(types["city"], ColumnType::String);
        assert_eq!(types["tags"], ColumnType::Array);
    }

    #[test]
    fn test_from_columns_and_records() {
        let dataset = TabularDataset::from_columns(vec![
            ("id".to_string(), ColumnType::Numeric, vec![json!(1), json!("2")]),
            ("name".to_string(), ColumnType::String, vec![json!("a"), Value::Null]),
            ("tags".to_string(), ColumnType::Array, vec![json!(["x", "y"]), Value::Null]),
        ])
        .unwrap();

        assert_eq!(dataset.column_names(), vec!["id", "name", "tags"]);
        let records = dataset.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], json!(1.0));
        assert_eq!(records[1]["id"], json!(2.0));
        assert_eq!(records[1]["name"], Value::Null);
        assert_eq!(records[0]["tags"], json!(["x", "y"]));
        assert_eq!(records[1]["tags"], json!([]));
    }

    #[test]
    fn test_select_keeps_requested_columns() {
        let frame = df!["a" => [1i64], "b" => ["x"], "c" => [2.0]].unwrap();
        let dataset = TabularDataset::new(frame);
        let selected = dataset.select(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(selected.column_names(), vec!["c", "a"]);
    }
}
