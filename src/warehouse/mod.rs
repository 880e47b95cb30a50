//! Warehouses: where datasets are staged and reconciliation queries run.

pub mod bigquery;
pub mod local;

use crate::connectors::WarehouseSource;
use crate::dataset::{Record, TabularDataset};
use crate::error::Result;
use crate::query_synth::ReconQuery;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use bigquery::BigQueryWarehouse;
pub use local::LocalWarehouse;

/// Rows flagged by a reconciliation query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read a table that already lives in the warehouse.
    async fn load_table(&self, source: &WarehouseSource) -> Result<TabularDataset>;

    /// Stage `dataset` under `table_name`; returns the fully-qualified id.
    async fn materialize(&self, dataset: &TabularDataset, table_name: &str) -> Result<String>;

    async fn execute(&self, query: &ReconQuery) -> Result<RowSet>;

    /// Drop a table created by `materialize`. Missing tables are not an error.
    async fn drop_staging(&self, table_id: &str) -> Result<()>;
}
