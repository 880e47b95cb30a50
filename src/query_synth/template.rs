//! SQL rendering for `ReconPlan` (BigQuery Standard SQL).

use super::ReconPlan;
use crate::schema_matcher::ColumnPair;

pub const ARRAY_SCORE_UDF: &str = "ARRAY_OVERLAP_SCORE";

const ARRAY_SCORE_UDF_SQL: &str = r#"CREATE TEMP FUNCTION ARRAY_OVERLAP_SCORE(a ARRAY<STRING>, b ARRAY<STRING>)
RETURNS FLOAT64
LANGUAGE js AS r"""
  const sa = new Set(a || []);
  const sb = new Set(b || []);
  if (sa.size === 0 && sb.size === 0) return 1.0;
  let inter = 0;
  sa.forEach(x => { if (sb.has(x)) inter += 1; });
  const union = new Set([...sa, ...sb]).size;
  return inter / union;
""";
"#;

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Output column names carried by flagged rows, per comparison kind.
pub fn abs_diff_alias(pair: &ColumnPair) -> String {
    format!("{}_abs_diff", pair.source)
}

pub fn rel_diff_alias(pair: &ColumnPair) -> String {
    format!("{}_rel_diff", pair.source)
}

pub fn array_score_alias(pair: &ColumnPair) -> String {
    format!("{}_array_score", pair.source)
}

pub fn string_recon_alias(pair: &ColumnPair) -> String {
    format!("{}_string_recon", pair.source)
}

/// Projection of the source row and target row, as nested records.
pub const SOURCE_ROW: &str = "a_row";
pub const TARGET_ROW: &str = "b_row";

fn col(table_alias: &str, column: &str) -> String {
    format!("{}.{}", table_alias, quote_ident(column))
}

fn as_string_array(table_alias: &str, column: &str) -> String {
    format!(
        "ARRAY(SELECT CAST(v AS STRING) FROM UNNEST({}) AS v)",
        col(table_alias, column)
    )
}

pub fn render(plan: &ReconPlan) -> String {
    let comparisons = &plan.comparisons;
    let mut projections = vec![
        format!("a AS {}", SOURCE_ROW),
        format!("b AS {}", TARGET_ROW),
    ];
    let mut predicates = Vec::new();

    for pair in &comparisons.numeric {
        let (a, b) = (col("a", &pair.source), col("b", &pair.target));
        let abs_alias = quote_ident(&abs_diff_alias(pair));
        let rel_alias = quote_ident(&rel_diff_alias(pair));
        projections.push(format!("ABS({a} - {b}) AS {abs_alias}"));
        projections.push(format!(
            "SAFE_DIVIDE(ABS({a} - {b}), NULLIF(ABS({b}), 0)) AS {rel_alias}"
        ));
        predicates.push(format!(
            "({abs_alias} > {} OR {rel_alias} > {})",
            plan.thresholds.abs, plan.thresholds.rel
        ));
    }

    for pair in &comparisons.array {
        let alias = quote_ident(&array_score_alias(pair));
        projections.push(format!(
            "{}({}, {}) AS {alias}",
            ARRAY_SCORE_UDF,
            as_string_array("a", &pair.source),
            as_string_array("b", &pair.target)
        ));
        predicates.push(format!("{alias} < 1.0"));
    }

    for pair in &comparisons.string {
        let (a, b) = (col("a", &pair.source), col("b", &pair.target));
        let alias = quote_ident(&string_recon_alias(pair));
        projections.push(format!(
            "CASE\n            WHEN {a} IS NULL AND {b} IS NULL THEN 'MATCH'\n            \
             WHEN {a} IS NULL OR {b} IS NULL THEN 'MISMATCH'\n            \
             WHEN LOWER(CAST({a} AS STRING)) = LOWER(CAST({b} AS STRING)) THEN 'MATCH'\n            \
             ELSE 'MISMATCH'\n        END AS {alias}"
        ));
        predicates.push(format!("{alias} = 'MISMATCH'"));
    }

    let join_condition = plan
        .join_pairs
        .iter()
        .map(|p| format!("{} = {}", col("a", &p.source), col("b", &p.target)))
        .collect::<Vec<_>>()
        .join("\n      AND ");

    let where_clause = if predicates.is_empty() {
        "FALSE".to_string()
    } else {
        predicates.join("\n   OR ")
    };

    let mut sql = String::new();
    if !comparisons.array.is_empty() {
        sql.push_str(ARRAY_SCORE_UDF_SQL);
        sql.push('\n');
    }
    sql.push_str("WITH joined AS (\n    SELECT\n        ");
    sql.push_str(&projections.join(",\n        "));
    sql.push_str(&format!(
        "\n    FROM {} a\n    JOIN {} b\n      ON {}\n)\nSELECT *\nFROM joined\nWHERE {};\n",
        quote_ident(&plan.table_a),
        quote_ident(&plan.table_b),
        join_condition,
        where_clause
    ));
    sql
}
