//! Short pass summaries extracted from structured tool output.

use crate::core::Check;
use serde_json::Value;

/// Why structured output could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryError {
    /// Stdout was not JSON.
    Malformed(String),
    /// The document itself reports failure.
    Failed(String),
}

/// Parses a JSON check's stdout and returns its summary line.
///
/// # Errors
///
/// Returns [`SummaryError::Malformed`] when stdout is not JSON and
/// [`SummaryError::Failed`] when the document reports a failure despite a
/// zero exit code.
pub fn summarize(check: Check, stdout: &str) -> Result<String, SummaryError> {
    let doc: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| SummaryError::Malformed(format!("malformed {check} output: {e}")))?;

    match check {
        Check::Validate => validate_summary(&doc),
        Check::Lint => Ok(plural(array_len(&doc["issues"]), "issue")),
        Check::Security => Ok(plural(array_len(&doc["results"]), "finding")),
        Check::Compliance => Ok(compliance_summary(&doc)),
        Check::Cost => Ok(cost_summary(&doc)),
        Check::Format | Check::Test => Ok("ok".to_string()),
    }
}

fn array_len(value: &Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn validate_summary(doc: &Value) -> Result<String, SummaryError> {
    let errors = doc["error_count"].as_u64().unwrap_or(0);
    let warnings = doc["warning_count"].as_u64().unwrap_or(0);
    if doc["valid"].as_bool() == Some(false) || errors > 0 {
        return Err(SummaryError::Failed(doc.to_string()));
    }
    Ok(format!("valid, {}", plural(usize::try_from(warnings).unwrap_or(usize::MAX), "warning")))
}

fn compliance_summary(doc: &Value) -> String {
    // A single framework yields an object, several yield a list.
    let reports: Vec<&Value> = match doc {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let (passed, failed) = reports.iter().fold((0, 0), |(p, f), report| {
        (
            p + report["summary"]["passed"].as_u64().unwrap_or(0),
            f + report["summary"]["failed"].as_u64().unwrap_or(0),
        )
    });
    format!("{passed} passed, {failed} failed")
}

fn cost_summary(doc: &Value) -> String {
    let total = match &doc["totalMonthlyCost"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => "0".to_string(),
    };
    let currency = doc["currency"].as_str().unwrap_or("USD");
    format!("estimated monthly cost {total} {currency}")
}
