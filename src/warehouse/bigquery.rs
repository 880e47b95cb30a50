//! BigQuery Warehouse
//!
//! Talks to the BigQuery v2 REST API with a bearer token: `jobs.query` for
//! reads and reconciliation queries, `tables.insert` plus
//! `tabledata.insertAll` for staging local frames.

use super::{RowSet, Warehouse};
use crate::config::WarehouseSettings;
use crate::connectors::WarehouseSource;
use crate::dataset::{json_to_f64, json_to_text, ColumnType, Record, TabularDataset};
use crate::error::{ReconError, Result};
use crate::observability::redact;
use crate::query_synth::template::quote_ident;
use crate::query_synth::ReconQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BIGQUERY_API: &str = "https://bigquery.googleapis.com/bigquery/v2";
const QUERY_TIMEOUT_MS: u64 = 60_000;
const MAX_POLLS: usize = 60;
const INSERT_BATCH_ROWS: usize = 500;
/// Staging tables expire on their own if a run never gets to drop them.
const STAGING_TTL_HOURS: i64 = 24;

pub struct BigQueryWarehouse {
    base_url: String,
    project_id: String,
    access_token: String,
    location: Option<String>,
    staging_dataset: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "jobComplete", default)]
    job_complete: bool,
    #[serde(rename = "jobReference")]
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(rename = "pageToken")]
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct JobReference {
    #[serde(rename = "jobId")]
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    /// Sub-fields of a RECORD column.
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self.field_type.as_str(),
            "INTEGER" | "INT64" | "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC"
        )
    }

    fn column_type(&self) -> ColumnType {
        if self.is_repeated() {
            ColumnType::Array
        } else if self.is_numeric() {
            ColumnType::Numeric
        } else {
            ColumnType::String
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsertAllResponse {
    #[serde(rename = "insertErrors", default)]
    insert_errors: Vec<Value>,
}

/// A fully read query result.
struct QueryOutput {
    fields: Vec<FieldSchema>,
    rows: Vec<Vec<Value>>,
}

impl BigQueryWarehouse {
    pub fn new(
        project_id: String,
        access_token: String,
        staging_dataset: String,
        location: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReconError::Configuration(format!("Failed to create HTTP client for BigQuery: {}", e)))?;
        Ok(Self {
            base_url: BIGQUERY_API.to_string(),
            project_id,
            access_token,
            location,
            staging_dataset,
            client,
        })
    }

    pub fn from_settings(settings: &WarehouseSettings) -> Result<Self> {
        let project_id = settings
            .project_id
            .clone()
            .ok_or_else(|| ReconError::Configuration("GOOGLE_PROJECT_ID is not set".to_string()))?;
        let access_token = settings
            .access_token
            .clone()
            .ok_or_else(|| ReconError::Configuration("GOOGLE_ACCESS_TOKEN is not set".to_string()))?;
        Self::new(
            project_id,
            access_token,
            settings.staging_dataset.clone(),
            settings.location.clone(),
        )
    }

    /// Point at a different API root (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.base_url, self.project_id)
    }

    async fn api_error(context: &str, response: reqwest::Response) -> String {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body["error"]["message"].as_str().unwrap_or("no details");
        redact(&format!("{} failed with status {}: {}", context, status, message))
    }

    /// Run a query to completion, following `pageToken` until exhausted.
    async fn run_query(&self, sql: &str) -> Result<QueryOutput> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let response = self
            .client
            .post(format!("{}/queries", self.project_url()))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReconError::Execution(format!("Failed to submit BigQuery query: {}", redact(&e.to_string()))))?;
        if !response.status().is_success() {
            return Err(ReconError::Execution(Self::api_error("BigQuery query", response).await));
        }
        let mut page: QueryResponse = response
            .json()
            .await
            .map_err(|e| ReconError::Execution(format!("Failed to parse BigQuery response: {}", e)))?;

        let mut fields: Option<Vec<FieldSchema>> = None;
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut polls = 0;
        loop {
            if let Some(error) = page.errors.first() {
                return Err(ReconError::Execution(format!(
                    "BigQuery error: {} ({})",
                    error.message.as_deref().unwrap_or("unknown"),
                    error.reason.as_deref().unwrap_or("no reason")
                )));
            }
            if page.job_complete {
                if fields.is_none() {
                    fields = page.schema.as_ref().map(|s| s.fields.clone());
                }
                rows.extend(page.rows.drain(..).map(|r| r.f.into_iter().map(|c| c.v).collect::<Vec<_>>()));
            }
            let next_token = if page.job_complete { page.page_token.clone() } else { None };
            if page.job_complete && next_token.is_none() {
                break;
            }

            polls += 1;
            if polls > MAX_POLLS {
                return Err(ReconError::Execution("BigQuery job did not complete in time".to_string()));
            }
            let job = page
                .job_reference
                .as_ref()
                .ok_or_else(|| ReconError::Execution("BigQuery response has no job reference".to_string()))?;
            page = self.get_query_results(job, next_token.as_deref()).await?;
        }

        let fields = fields.unwrap_or_default();
        debug!("BigQuery returned {} rows", rows.len());
        Ok(QueryOutput { fields, rows })
    }

    async fn get_query_results(&self, job: &JobReference, page_token: Option<&str>) -> Result<QueryResponse> {
        let mut request = self
            .client
            .get(format!("{}/queries/{}", self.project_url(), job.job_id))
            .bearer_auth(&self.access_token)
            .query(&[("timeoutMs", QUERY_TIMEOUT_MS.to_string())]);
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            request = request.query(&[("location", location)]);
        }
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ReconError::Execution(format!("Failed to fetch BigQuery results: {}", redact(&e.to_string()))))?;
        if !response.status().is_success() {
            return Err(ReconError::Execution(Self::api_error("BigQuery getQueryResults", response).await));
        }
        response
            .json()
            .await
            .map_err(|e| ReconError::Execution(format!("Failed to parse BigQuery results: {}", e)))
    }

    async fn ensure_dataset(&self) -> Result<()> {
        let body = json!({
            "datasetReference": {"projectId": self.project_id, "datasetId": self.staging_dataset},
            "location": self.location,
        });
        let response = self
            .client
            .post(format!("{}/datasets", self.project_url()))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReconError::Materialize(redact(&e.to_string())))?;
        match response.status() {
            s if s.is_success() || s == StatusCode::CONFLICT => Ok(()),
            _ => Err(ReconError::Materialize(Self::api_error("Create dataset", response).await)),
        }
    }

    async fn create_table(&self, table_name: &str, fields: &[Value]) -> Result<()> {
        let tables_url = format!("{}/datasets/{}/tables", self.project_url(), self.staging_dataset);
        let body = self.table_body(table_name, fields, Utc::now());

        for attempt in 0..2 {
            let response = self
                .client
                .post(&tables_url)
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| ReconError::Materialize(redact(&e.to_string())))?;
            match response.status() {
                s if s.is_success() => return Ok(()),
                StatusCode::CONFLICT if attempt == 0 => {
                    warn!("Staging table {} exists, replacing it", table_name);
                    let deleted = self
                        .client
                        .delete(format!("{}/{}", tables_url, table_name))
                        .bearer_auth(&self.access_token)
                        .send()
                        .await
                        .map_err(|e| ReconError::Materialize(redact(&e.to_string())))?;
                    if !deleted.status().is_success() {
                        return Err(ReconError::Materialize(Self::api_error("Delete table", deleted).await));
                    }
                }
                _ => return Err(ReconError::Materialize(Self::api_error("Create table", response).await)),
            }
        }
        Err(ReconError::Materialize(format!("Could not create staging table {}", table_name)))
    }

    fn table_body(&self, table_name: &str, fields: &[Value], now: DateTime<Utc>) -> Value {
        let expires = now + chrono::Duration::hours(STAGING_TTL_HOURS);
        json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": self.staging_dataset,
                "tableId": table_name,
            },
            "schema": {"fields": fields},
            "expirationTime": expires.timestamp_millis().to_string(),
        })
    }

    async fn insert_rows(&self, table_name: &str, rows: Vec<Value>) -> Result<()> {
        let url = format!(
            "{}/datasets/{}/tables/{}/insertAll",
            self.project_url(),
            self.staging_dataset,
            table_name
        );
        for (batch_idx, batch) in rows.chunks(INSERT_BATCH_ROWS).enumerate() {
            let payload: Vec<Value> = batch
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    json!({
                        "insertId": format!("{}-{}", table_name, batch_idx * INSERT_BATCH_ROWS + i),
                        "json": row,
                    })
                })
                .collect();
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&json!({"rows": payload}))
                .send()
                .await
                .map_err(|e| ReconError::Materialize(redact(&e.to_string())))?;
            if !response.status().is_success() {
                return Err(ReconError::Materialize(Self::api_error("insertAll", response).await));
            }
            let result: InsertAllResponse = response
                .json()
                .await
                .map_err(|e| ReconError::Materialize(format!("Failed to parse insertAll response: {}", e)))?;
            if !result.insert_errors.is_empty() {
                return Err(ReconError::Materialize(format!(
                    "{} rows rejected by insertAll into {}",
                    result.insert_errors.len(),
                    table_name
                )));
            }
        }
        Ok(())
    }
}

fn schema_fields(dataset: &TabularDataset) -> Vec<(String, ColumnType, Value)> {
    dataset
        .classify_columns()
        .into_iter()
        .map(|(name, column_type)| {
            let field = match column_type {
                ColumnType::Numeric => json!({"name": name, "type": "FLOAT64", "mode": "NULLABLE"}),
                ColumnType::Array => json!({"name": name, "type": "STRING", "mode": "REPEATED"}),
                ColumnType::String => json!({"name": name, "type": "STRING", "mode": "NULLABLE"}),
            };
            (name, column_type, field)
        })
        .collect()
}

/// Coerce a record to the staged schema: numbers, string arrays, strings.
fn staged_row(record: &Record, types: &[(String, ColumnType, Value)]) -> Value {
    let mut out = serde_json::Map::new();
    for (name, column_type, _) in types {
        let value = record.get(name).cloned().unwrap_or(Value::Null);
        let coerced = match (column_type, &value) {
            (ColumnType::Array, Value::Array(items)) => {
                Value::Array(items.iter().filter(|v| !v.is_null()).map(|v| json!(json_to_text(v))).collect())
            }
            (ColumnType::Array, Value::Null) => Value::Array(Vec::new()),
            (_, Value::Null) => Value::Null,
            (ColumnType::Numeric, v) => json_to_f64(v).map(Value::from).unwrap_or(Value::Null),
            (_, v) => json!(json_to_text(v)),
        };
        out.insert(name.clone(), coerced);
    }
    Value::Object(out)
}

/// BigQuery returns every scalar as a string; parse numerics back.
/// RECORD cells arrive as `{"f": [{"v": ..}]}` and decode to objects keyed
/// by sub-field name; REPEATED cells arrive as `[{"v": ..}]`.
fn decode_cell(field: &FieldSchema, value: Value) -> Value {
    if field.is_repeated() {
        let items = match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| decode_value(field, unwrap_v(item)))
                .collect(),
            _ => Vec::new(),
        };
        return Value::Array(items);
    }
    decode_value(field, value)
}

fn unwrap_v(cell: Value) -> Value {
    match cell {
        Value::Object(mut map) => map.remove("v").unwrap_or(Value::Null),
        other => other,
    }
}

fn decode_value(field: &FieldSchema, value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Object(mut map) if field.is_record() => {
            let cells = match map.remove("f") {
                Some(Value::Array(cells)) => cells,
                _ => Vec::new(),
            };
            let record: Record = field
                .fields
                .iter()
                .zip(cells)
                .map(|(sub, cell)| (sub.name.clone(), decode_cell(sub, unwrap_v(cell))))
                .collect();
            Value::Object(record)
        }
        Value::String(s) if field.is_numeric() => s.parse::<f64>().map(Value::from).unwrap_or(Value::String(s)),
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

impl QueryOutput {
    fn into_records(self) -> Vec<Record> {
        let fields = self.fields;
        self.rows
            .into_iter()
            .map(|row| {
                fields
                    .iter()
                    .zip(row)
                    .map(|(field, value)| (field.name.clone(), decode_cell(field, value)))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    async fn load_table(&self, source: &WarehouseSource) -> Result<TabularDataset> {
        let projection = if source.columns.is_empty() {
            "*".to_string()
        } else {
            source.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        };
        let sql = format!("SELECT {} FROM {}", projection, quote_ident(&source.table_fqn));
        let output = self
            .run_query(&sql)
            .await
            .map_err(|e| ReconError::Load(format!("{}: {}", source.table_fqn, e)))?;

        let mut columns: Vec<(String, ColumnType, Vec<Value>)> = output
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.column_type(), Vec::with_capacity(output.rows.len())))
            .collect();
        for row in output.rows {
            for ((_, _, values), (field, cell)) in columns.iter_mut().zip(output.fields.iter().zip(row)) {
                values.push(decode_cell(field, cell));
            }
        }
        TabularDataset::from_columns(columns)
    }

    async fn materialize(&self, dataset: &TabularDataset, table_name: &str) -> Result<String> {
        self.ensure_dataset().await?;
        let types = schema_fields(dataset);
        let fields: Vec<Value> = types.iter().map(|(_, _, f)| f.clone()).collect();
        self.create_table(table_name, &fields).await?;

        let records = dataset
            .records()
            .map_err(|e| ReconError::Materialize(e.to_string()))?;
        let rows: Vec<Value> = records.iter().map(|r| staged_row(r, &types)).collect();
        let row_count = rows.len();
        self.insert_rows(table_name, rows).await?;

        let table_id = format!("{}.{}.{}", self.project_id, self.staging_dataset, table_name);
        info!("Materialized {} rows into {}", row_count, table_id);
        Ok(table_id)
    }

    async fn execute(&self, query: &ReconQuery) -> Result<RowSet> {
        let output = self.run_query(&query.sql).await?;
        let columns = output.fields.iter().map(|f| f.name.clone()).collect();
        Ok(RowSet {
            columns,
            rows: output.into_records(),
        })
    }

    async fn drop_staging(&self, table_id: &str) -> Result<()> {
        let (project, dataset, table) = split_table_id(table_id)
            .ok_or_else(|| ReconError::Materialize(format!("Not a staging table id: {}", table_id)))?;
        let response = self
            .client
            .delete(format!("{}/projects/{}/datasets/{}/tables/{}", self.base_url, project, dataset, table))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ReconError::Materialize(redact(&e.to_string())))?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => {
                debug!("Dropped staging table {}", table_id);
                Ok(())
            }
            _ => Err(ReconError::Materialize(Self::api_error("Delete table", response).await)),
        }
    }
}

/// Split `project.dataset.table`; the project part may itself contain dots.
fn split_table_id(table_id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = table_id.rsplitn(3, '.');
    let table = parts.next()?;
    let dataset = parts.next()?;
    let project = parts.next()?;
    if [project, dataset, table].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some((project, dataset, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn field(name: &str, field_type: &str, mode: Option<&str>) -> FieldSchema {
        FieldSchema {
            name: name.into(),
            field_type: field_type.into(),
            mode: mode.map(String::from),
            fields: vec![],
        }
    }

    fn record(name: &str, mode: Option<&str>, fields: Vec<FieldSchema>) -> FieldSchema {
        FieldSchema {
            fields,
            ..field(name, "RECORD", mode)
        }
    }

    #[test]
    fn test_decode_cells() {
        assert_eq!(decode_cell(&field("n", "INTEGER", None), json!("42")), json!(42.0));
        assert_eq!(decode_cell(&field("s", "STRING", None), json!("x")), json!("x"));
        assert_eq!(decode_cell(&field("n", "FLOAT64", None), Value::Null), Value::Null);
        assert_eq!(
            decode_cell(&field("t", "STRING", Some("REPEATED")), json!([{"v": "a"}, {"v": "b"}])),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_decode_record_cells() {
        let row_field = record(
            "a_row",
            Some("NULLABLE"),
            vec![
                field("id", "INTEGER", None),
                field("amount", "FLOAT", None),
                field("name", "STRING", None),
            ],
        );
        let cell = json!({"f": [{"v": "1"}, {"v": "100.0"}, {"v": "alice"}]});
        assert_eq!(
            decode_cell(&row_field, cell),
            json!({"id": 1.0, "amount": 100.0, "name": "alice"})
        );
        assert_eq!(decode_cell(&row_field, Value::Null), Value::Null);

        let nested = record(
            "items",
            Some("REPEATED"),
            vec![field("sku", "STRING", None), field("tags", "STRING", Some("REPEATED"))],
        );
        let cell = json!([
            {"v": {"f": [{"v": "A1"}, {"v": [{"v": "x"}, {"v": "y"}]}]}},
            {"v": {"f": [{"v": "B2"}, {"v": []}]}}
        ]);
        assert_eq!(
            decode_cell(&nested, cell),
            json!([{"sku": "A1", "tags": ["x", "y"]}, {"sku": "B2", "tags": []}])
        );
    }

    #[test]
    fn test_query_response_parsing_with_record_columns() {
        let raw = json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "job_2"},
            "schema": {"fields": [
                {"name": "a_row", "type": "RECORD", "mode": "NULLABLE", "fields": [
                    {"name": "id", "type": "INTEGER", "mode": "NULLABLE"},
                    {"name": "amount", "type": "FLOAT", "mode": "NULLABLE"}
                ]},
                {"name": "amount_abs_diff", "type": "FLOAT", "mode": "NULLABLE"}
            ]},
            "rows": [{"f": [{"v": {"f": [{"v": "2"}, {"v": "200.5"}]}}, {"v": "0.5"}]}]
        });
        let page: QueryResponse = serde_json::from_value(raw).unwrap();
        let output = QueryOutput {
            fields: page.schema.unwrap().fields,
            rows: page.rows.into_iter().map(|r| r.f.into_iter().map(|c| c.v).collect()).collect(),
        };
        let records = output.into_records();
        assert_eq!(records[0]["a_row"]["id"], json!(2.0));
        assert_eq!(records[0]["a_row"]["amount"], json!(200.5));
        assert_eq!(records[0]["amount_abs_diff"], json!(0.5));
    }

    #[test]
    fn test_query_response_parsing() {
        let raw = json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "schema": {"fields": [
                {"name": "emp_id", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "city", "type": "STRING", "mode": "NULLABLE"}
            ]},
            "rows": [{"f": [{"v": "1"}, {"v": "Pune"}]}, {"f": [{"v": "2"}, {"v": null}]}],
            "totalRows": "2"
        });
        let page: QueryResponse = serde_json::from_value(raw).unwrap();
        assert!(page.job_complete);
        let output = QueryOutput {
            fields: page.schema.unwrap().fields,
            rows: page.rows.into_iter().map(|r| r.f.into_iter().map(|c| c.v).collect()).collect(),
        };
        let records = output.into_records();
        assert_eq!(records[0]["emp_id"], json!(1.0));
        assert_eq!(records[1]["city"], Value::Null);
    }

    #[test]
    fn test_staged_row_coercion() {
        let types = vec![
            ("amt".to_string(), ColumnType::Numeric, Value::Null),
            ("tags".to_string(), ColumnType::Array, Value::Null),
            ("code".to_string(), ColumnType::String, Value::Null),
        ];
        let record: Record = json!({"amt": "1.5", "tags": [1, null, "x"], "code": 7})
            .as_object()
            .cloned()
            .unwrap();
        let row = staged_row(&record, &types);
        assert_eq!(row, json!({"amt": 1.5, "tags": ["1", "x"], "code": "7"}));
    }

    #[test]
    fn test_staging_table_body_expires() {
        let warehouse = BigQueryWarehouse::new("p".into(), "t".into(), "recon_staging".into(), None).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let body = warehouse.table_body("recon_job_a", &[json!({"name": "id", "type": "FLOAT64"})], now);
        assert_eq!(body["tableReference"]["datasetId"], json!("recon_staging"));
        assert_eq!(body["tableReference"]["tableId"], json!("recon_job_a"));
        let expected = (now + chrono::Duration::hours(24)).timestamp_millis().to_string();
        assert_eq!(body["expirationTime"], json!(expected));
    }

    #[test]
    fn test_split_table_id() {
        assert_eq!(
            split_table_id("p.recon_staging.recon_x_a"),
            Some(("p", "recon_staging", "recon_x_a"))
        );
        assert_eq!(
            split_table_id("example.com:p.ds.t"),
            Some(("example.com:p", "ds", "t"))
        );
        assert_eq!(split_table_id("ds.t"), None);
        assert_eq!(split_table_id("p..t"), None);
    }

    #[test]
    fn test_from_settings_requires_credentials() {
        let settings = WarehouseSettings {
            project_id: Some("p".into()),
            access_token: None,
            location: None,
            staging_dataset: "recon_staging".into(),
        };
        assert!(matches!(
            BigQueryWarehouse::from_settings(&settings),
            Err(ReconError::Configuration(_))
        ));
    }
}
