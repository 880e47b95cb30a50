//! In-process warehouse.
//!
//! Tables live in a concurrent catalog keyed by their qualified id.
//! `execute` evaluates the structured plan directly: an equality hash join
//! followed by the same per-type rules the SQL text encodes.

use super::{RowSet, Warehouse};
use crate::connectors::WarehouseSource;
use crate::dataset::{Record, TabularDataset};
use crate::error::{ReconError, Result};
use crate::query_synth::rules::{
    array_mismatch, array_overlap, cell_number, numeric_diff, string_verdict, StringVerdict,
};
use crate::query_synth::template::{
    abs_diff_alias, array_score_alias, rel_diff_alias, string_recon_alias, SOURCE_ROW, TARGET_ROW,
};
use crate::query_synth::{ReconPlan, ReconQuery};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

pub const LOCAL_PROJECT: &str = "local";

pub struct LocalWarehouse {
    staging_dataset: String,
    catalog: DashMap<String, TabularDataset>,
}

impl LocalWarehouse {
    pub fn new(staging_dataset: impl Into<String>) -> Self {
        Self {
            staging_dataset: staging_dataset.into(),
            catalog: DashMap::new(),
        }
    }

    /// Make a dataset addressable as a warehouse-native table.
    pub fn register(&self, table_id: impl Into<String>, dataset: TabularDataset) {
        self.catalog.insert(table_id.into(), dataset);
    }

    pub fn table(&self, table_id: &str) -> Option<TabularDataset> {
        self.catalog.get(table_id).map(|entry| entry.value().clone())
    }

    pub fn table_count(&self) -> usize {
        self.catalog.len()
    }

    fn records_of(&self, table_id: &str) -> Result<Vec<Record>> {
        let table = self
            .table(table_id)
            .ok_or_else(|| ReconError::Execution(format!("Table not found: {}", table_id)))?;
        table
            .records()
            .map_err(|e| ReconError::Execution(format!("Failed to read {}: {}", table_id, e)))
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn load_table(&self, source: &WarehouseSource) -> Result<TabularDataset> {
        let table = self
            .table(&source.table_fqn)
            .ok_or_else(|| ReconError::Load(format!("Table not found in local catalog: {}", source.table_fqn)))?;
        table.select(&source.columns)
    }

    async fn materialize(&self, dataset: &TabularDataset, table_name: &str) -> Result<String> {
        let table_id = format!("{}.{}.{}", LOCAL_PROJECT, self.staging_dataset, table_name);
        self.register(table_id.clone(), dataset.clone());
        info!("Materialized {} rows into {}", dataset.height(), table_id);
        Ok(table_id)
    }

    async fn execute(&self, query: &ReconQuery) -> Result<RowSet> {
        let plan = &query.plan;
        let rows_a = self.records_of(&plan.table_a)?;
        let rows_b = self.records_of(&plan.table_b)?;
        let rows = evaluate_plan(plan, &rows_a, &rows_b);
        debug!("Local execution flagged {} of {} source rows", rows.len(), rows_a.len());
        Ok(RowSet {
            columns: output_columns(plan),
            rows,
        })
    }

    async fn drop_staging(&self, table_id: &str) -> Result<()> {
        if self.catalog.remove(table_id).is_some() {
            debug!("Dropped staging table {}", table_id);
        }
        Ok(())
    }
}

fn output_columns(plan: &ReconPlan) -> Vec<String> {
    let c = &plan.comparisons;
    let mut columns = vec![SOURCE_ROW.to_string(), TARGET_ROW.to_string()];
    for pair in &c.numeric {
        columns.push(abs_diff_alias(pair));
        columns.push(rel_diff_alias(pair));
    }
    columns.extend(c.array.iter().map(array_score_alias));
    columns.extend(c.string.iter().map(string_recon_alias));
    columns
}

/// Inner equality join on all join pairs; null keys never match.
pub fn evaluate_plan(plan: &ReconPlan, rows_a: &[Record], rows_b: &[Record]) -> Vec<Record> {
    let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (idx, row) in rows_b.iter().enumerate() {
        if let Some(key) = join_key(row, plan.join_pairs.iter().map(|p| &p.target)) {
            index.entry(key).or_default().push(idx);
        }
    }

    let mut out = Vec::new();
    for row_a in rows_a {
        let Some(key) = join_key(row_a, plan.join_pairs.iter().map(|p| &p.source)) else {
            continue;
        };
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for &idx in matches {
            if let Some(flagged) = compare_rows(plan, row_a, &rows_b[idx]) {
                out.push(flagged);
            }
        }
    }
    out
}

fn join_key<'c>(row: &Record, columns: impl Iterator<Item = &'c String>) -> Option<Vec<String>> {
    columns
        .map(|c| row.get(c.as_str()).and_then(join_key_text))
        .collect()
}

fn compare_rows(plan: &ReconPlan, a: &Record, b: &Record) -> Option<Record> {
    let c = &plan.comparisons;
    let cell = |row: &Record, column: &str| row.get(column).cloned().unwrap_or(Value::Null);
    let mut record = Record::new();
    record.insert(SOURCE_ROW.to_string(), Value::Object(a.clone()));
    record.insert(TARGET_ROW.to_string(), Value::Object(b.clone()));
    let mut flagged = false;

    for pair in &c.numeric {
        let diff = numeric_diff(cell_number(&cell(a, &pair.source)), cell_number(&cell(b, &pair.target)));
        flagged |= diff.is_mismatch(&plan.thresholds);
        record.insert(abs_diff_alias(pair), number_or_null(diff.abs_diff));
        record.insert(rel_diff_alias(pair), number_or_null(diff.rel_diff));
    }
    for pair in &c.array {
        let score = array_overlap(&cell(a, &pair.source), &cell(b, &pair.target));
        flagged |= array_mismatch(score);
        record.insert(array_score_alias(pair), number_or_null(Some(score)));
    }
    for pair in &c.string {
        let verdict = string_verdict(&cell(a, &pair.source), &cell(b, &pair.target));
        flagged |= verdict == StringVerdict::Mismatch;
        record.insert(string_recon_alias(pair), Value::from(verdict.as_str()));
    }

    flagged.then_some(record)
}

fn number_or_null(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Canonical text for join comparison; `1` and `1.0` join.
fn join_key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64().map(|f| f.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_synth::{ComparisonSet, Thresholds};
    use crate::schema_matcher::ColumnPair;
    use polars::prelude::*;
    use serde_json::json;

    fn plan(table_a: &str, table_b: &str) -> ReconPlan {
        ReconPlan {
            table_a: table_a.into(),
            table_b: table_b.into(),
            join_pairs: vec![ColumnPair::new("emp_id", "employee_id")],
            comparisons: ComparisonSet {
                numeric: vec![ColumnPair::new("salary", "pay")],
                array: vec![],
                string: vec![ColumnPair::new("city", "town")],
            },
            thresholds: Thresholds::default(),
        }
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_evaluate_plan_flags_mismatches_only() {
        let rows_a = vec![
            record(json!({"emp_id": 1, "salary": 100.0, "city": "Pune"})),
            record(json!({"emp_id": 2, "salary": 200.0, "city": "Oslo"})),
            record(json!({"emp_id": 3, "salary": 300.0, "city": "Lima"})),
            record(json!({"emp_id": null, "salary": 1.0, "city": "Nowhere"})),
        ];
        let rows_b = vec![
            record(json!({"employee_id": 1.0, "pay": 100.5, "town": "pune"})),
            record(json!({"employee_id": 2, "pay": 200.0, "town": "OSLO"})),
            record(json!({"employee_id": 3, "pay": 300.0, "town": "Quito"})),
        ];
        let rows = evaluate_plan(&plan("a", "b"), &rows_a, &rows_b);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["salary_abs_diff"], json!(0.5));
        assert_eq!(rows[0]["city_string_recon"], json!("MATCH"));
        assert_eq!(rows[1]["city_string_recon"], json!("MISMATCH"));
        assert_eq!(rows[1][SOURCE_ROW]["emp_id"], json!(3));
    }

    #[tokio::test]
    async fn test_materialize_and_execute() {
        let warehouse = LocalWarehouse::new("recon_staging");
        let a = TabularDataset::new(df!["emp_id" => [1i64, 2], "salary" => [100.0, 5.0], "city" => ["x", "y"]].unwrap());
        let b = TabularDataset::new(
            df!["employee_id" => [1i64, 2], "pay" => [100.0, 9.0], "town" => ["x", "y"]].unwrap(),
        );
        let id_a = warehouse.materialize(&a, "job1_a").await.unwrap();
        let id_b = warehouse.materialize(&b, "job1_b").await.unwrap();
        assert_eq!(id_a, "local.recon_staging.job1_a");

        let query = ReconQuery {
            sql: String::new(),
            plan: plan(&id_a, &id_b),
        };
        let result = warehouse.execute(&query).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0]["salary_abs_diff"], json!(4.0));
        assert!(result.columns.contains(&"salary_rel_diff".to_string()));
    }

    #[tokio::test]
    async fn test_drop_staging_removes_table() {
        let warehouse = LocalWarehouse::new("recon_staging");
        let frame = TabularDataset::new(df!["id" => [1i64]].unwrap());
        let table_id = warehouse.materialize(&frame, "job2_a").await.unwrap();
        warehouse.register("proj.ds.orders", frame);
        assert_eq!(warehouse.table_count(), 2);

        warehouse.drop_staging(&table_id).await.unwrap();
        assert!(warehouse.table(&table_id).is_none());
        assert_eq!(warehouse.table_count(), 1);
        // Dropping twice is fine.
        warehouse.drop_staging(&table_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_unknown_table_is_execution_error() {
        let warehouse = LocalWarehouse::new("s");
        let query = ReconQuery {
            sql: String::new(),
            plan: plan("nope_a", "nope_b"),
        };
        assert!(matches!(
            warehouse.execute(&query).await,
            Err(ReconError::Execution(_))
        ));
    }

    #[tokio::test]
    async fn test_load_registered_table() {
        let warehouse = LocalWarehouse::new("s");
        warehouse.register("proj.ds.orders", TabularDataset::new(df!["id" => [1i64], "amt" => [2.0]].unwrap()));
        let source = WarehouseSource {
            table_fqn: "proj.ds.orders".into(),
            columns: vec!["amt".into()],
        };
        let loaded = warehouse.load_table(&source).await.unwrap();
        assert_eq!(loaded.column_names(), vec!["amt"]);

        let missing = WarehouseSource {
            table_fqn: "proj.ds.nope".into(),
            columns: vec![],
        };
        assert!(matches!(warehouse.load_table(&missing).await, Err(ReconError::Load(_))));
    }
}
