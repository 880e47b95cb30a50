//! PostgreSQL source loader.
//!
//! Rows are fetched with runtime-checked `sqlx` queries and converted into
//! a dataset column by column. Numeric types (`NUMERIC` included) become
//! `Float64`, arrays become list columns, dates, times, uuids and json are
//! rendered as text. A column that cannot be decoded fails the load.

use super::{mask_url_password, RelationalSource};
use crate::dataset::{ColumnType, TabularDataset};
use crate::error::{ReconError, Result};
use crate::observability::redact;
use serde_json::Value;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Executor, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 30;

pub async fn load_postgres(source: &RelationalSource) -> Result<TabularDataset> {
    let url = source.connection_url()?;
    let sql = source.select_sql()?;

    info!("Connecting to postgres at {}", mask_url_password(&url));
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .connect(&url)
        .await
        .map_err(|e| {
            ReconError::Load(format!(
                "Failed to connect to postgres: {}",
                redact(&e.to_string())
            ))
        })?;

    // Describe first so an empty result still yields the column set.
    let describe = (&pool).describe(&sql).await?;
    let columns: Vec<(String, String)> = describe
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
        .collect();

    let rows: Vec<PgRow> = sqlx::query(&sql).fetch_all(&pool).await?;
    pool.close().await;
    debug!("Fetched {} rows from postgres", rows.len());

    let mut out = Vec::with_capacity(columns.len());
    for (idx, (name, type_name)) in columns.iter().enumerate() {
        let column_type = classify_pg_type(type_name);
        let values = rows
            .iter()
            .map(|row| decode_cell(row, idx, name, type_name))
            .collect::<Result<Vec<Value>>>()?;
        out.push((name.clone(), column_type, values));
    }
    TabularDataset::from_columns(out)
}

pub(crate) fn classify_pg_type(type_name: &str) -> ColumnType {
    let upper = type_name.to_uppercase();
    if upper.ends_with("[]") {
        return ColumnType::Array;
    }
    match upper.as_str() {
        "INT2" | "INT4" | "INT8" | "FLOAT4" | "FLOAT8" | "NUMERIC" | "OID" => ColumnType::Numeric,
        _ => ColumnType::String,
    }
}

/// How a postgres column is read out of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PgDecoder {
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Bool,
    Date,
    Timestamp,
    TimestampTz,
    Time,
    Uuid,
    Json,
    TextArray,
    Int4Array,
    Int8Array,
    Float8Array,
    /// Anything else; must be decodable as text.
    Text,
}

impl PgDecoder {
    pub(crate) fn for_type(type_name: &str) -> Self {
        match type_name.to_uppercase().as_str() {
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "OID" => Self::Oid,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "BOOL" => Self::Bool,
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "TIME" => Self::Time,
            "UUID" => Self::Uuid,
            "JSON" | "JSONB" => Self::Json,
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => Self::TextArray,
            "INT4[]" => Self::Int4Array,
            "INT8[]" => Self::Int8Array,
            "FLOAT8[]" => Self::Float8Array,
            _ => Self::Text,
        }
    }
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn decode_cell(row: &PgRow, idx: usize, name: &str, type_name: &str) -> Result<Value> {
    let decoded: std::result::Result<Value, sqlx::Error> = match PgDecoder::for_type(type_name) {
        PgDecoder::Int2 => row.try_get::<Option<i16>, _>(idx).map(opt),
        PgDecoder::Int4 => row.try_get::<Option<i32>, _>(idx).map(opt),
        PgDecoder::Oid => row.try_get::<Option<Oid>, _>(idx).map(|v| opt(v.map(|oid| oid.0))),
        PgDecoder::Int8 => row.try_get::<Option<i64>, _>(idx).map(opt),
        PgDecoder::Float4 => row.try_get::<Option<f32>, _>(idx).map(|v| opt(v.map(f64::from))),
        PgDecoder::Float8 => row.try_get::<Option<f64>, _>(idx).map(opt),
        PgDecoder::Numeric => row
            .try_get::<Option<Decimal>, _>(idx)
            .map(|v| opt(v.and_then(|d| d.to_string().parse::<f64>().ok()))),
        PgDecoder::Bool => row.try_get::<Option<bool>, _>(idx).map(opt),
        PgDecoder::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| opt(v.map(|d| d.format("%Y-%m-%d").to_string()))),
        PgDecoder::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| opt(v.map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        PgDecoder::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| opt(v.map(|t| t.to_rfc3339()))),
        PgDecoder::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| opt(v.map(|t| t.format("%H:%M:%S%.f").to_string()))),
        PgDecoder::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)
            .map(|v| opt(v.map(|u| u.hyphenated().to_string()))),
        PgDecoder::Json => row
            .try_get::<Option<JsonValue>, _>(idx)
            .map(|v| opt(v.map(|j| j.to_string()))),
        PgDecoder::TextArray => row.try_get::<Option<Vec<String>>, _>(idx).map(opt),
        PgDecoder::Int4Array => row.try_get::<Option<Vec<i32>>, _>(idx).map(opt),
        PgDecoder::Int8Array => row.try_get::<Option<Vec<i64>>, _>(idx).map(opt),
        PgDecoder::Float8Array => row.try_get::<Option<Vec<f64>>, _>(idx).map(opt),
        PgDecoder::Text => row.try_get::<Option<String>, _>(idx).map(opt),
    };
    decoded.map_err(|e| decode_error(name, type_name, &e.to_string()))
}

/// A column that cannot be decoded fails the load instead of turning into nulls.
fn decode_error(name: &str, type_name: &str, reason: &str) -> ReconError {
    ReconError::Load(format!(
        "Cannot decode postgres column '{}' of type {}: {}; cast it to text in a custom query",
        name, type_name, reason
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pg_type() {
        assert_eq!(classify_pg_type("INT8"), ColumnType::Numeric);
        assert_eq!(classify_pg_type("float8"), ColumnType::Numeric);
        assert_eq!(classify_pg_type("TEXT[]"), ColumnType::Array);
        assert_eq!(classify_pg_type("VARCHAR"), ColumnType::String);
        assert_eq!(classify_pg_type("TIMESTAMPTZ"), ColumnType::String);
        assert_eq!(classify_pg_type("numeric"), ColumnType::Numeric);
    }

    #[test]
    fn test_decoder_covers_common_types() {
        assert_eq!(PgDecoder::for_type("NUMERIC"), PgDecoder::Numeric);
        assert_eq!(PgDecoder::for_type("date"), PgDecoder::Date);
        assert_eq!(PgDecoder::for_type("TIMESTAMP"), PgDecoder::Timestamp);
        assert_eq!(PgDecoder::for_type("TIMESTAMPTZ"), PgDecoder::TimestampTz);
        assert_eq!(PgDecoder::for_type("UUID"), PgDecoder::Uuid);
        assert_eq!(PgDecoder::for_type("JSONB"), PgDecoder::Json);
        assert_eq!(PgDecoder::for_type("json"), PgDecoder::Json);
        assert_eq!(PgDecoder::for_type("VARCHAR[]"), PgDecoder::TextArray);
        assert_eq!(PgDecoder::for_type("OID"), PgDecoder::Oid);
        assert_eq!(PgDecoder::for_type("VARCHAR"), PgDecoder::Text);
    }

    #[test]
    fn test_decode_error_names_the_column() {
        let err = decode_error("mood", "MOOD_ENUM", "mismatched types");
        assert_eq!(err.kind(), "load");
        let message = err.to_string();
        assert!(message.contains("'mood'"));
        assert!(message.contains("MOOD_ENUM"));
        assert!(message.contains("cast it to text"));
    }
}
