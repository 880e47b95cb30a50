use super::state::JobState;
use crate::capability::ExplanationSummary;

const SUMMARY_SQL_CHARS: usize = 400;

pub fn summarize(state: &JobState) -> ExplanationSummary {
    ExplanationSummary {
        sql: state
            .query
            .as_ref()
            .map(|q| q.sql.chars().take(SUMMARY_SQL_CHARS).collect())
            .unwrap_or_default(),
        execution_status: state.execution_status.clone(),
        flagged_rows: state.rows.as_ref().map(Vec::len),
        match_count: state.mapping.matches.len(),
        warnings: state.warnings.clone(),
    }
}

/// Plain bullet list used when the explainer is unavailable.
pub fn fallback_explanation(summary: &ExplanationSummary) -> String {
    let mut bullets = vec![format!(
        "- {} column matches were compared.",
        summary.match_count
    )];

    match summary.execution_status.as_deref() {
        None => bullets.push(
            "- The query was not executed (dry run); review the generated SQL before running it.".to_string(),
        ),
        Some(status) if status.starts_with("FAILED") => bullets.push(format!(
            "- The reconciliation query did not complete ({}); check table access and column types.",
            status
        )),
        Some(status) => bullets.push(format!("- Execution: {}.", status)),
    }

    match summary.flagged_rows {
        Some(0) => bullets.push("- No mismatching rows were found within the thresholds.".to_string()),
        Some(n) => bullets.push(format!(
            "- {} rows differ; inspect the diff columns for rounding or unit differences.",
            n
        )),
        None => {}
    }

    if !summary.warnings.is_empty() {
        bullets.push(format!(
            "- {} warnings were raised during the run; see the warnings list.",
            summary.warnings.len()
        ));
    }
    bullets.join("\n")
}
