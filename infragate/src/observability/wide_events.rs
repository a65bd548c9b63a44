//! Wide event payloads summarising stages and whole runs.

use crate::core::{PipelineOutputs, StageResult};

/// Builds a stage payload.
#[must_use]
pub fn stage_payload(result: &StageResult) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "stage": result.stage_name,
        "status": result.status.to_string(),
        "started_at": result.started_at.to_rfc3339(),
        "duration_ms": result.duration_ms,
    });
    if let Some(kind) = result.failure_kind {
        payload["failure_kind"] = serde_json::json!(kind.as_str());
        payload["detail"] = serde_json::json!(result.detail);
    }
    payload
}

/// Builds a pipeline payload.
#[must_use]
pub fn pipeline_payload(outputs: &PipelineOutputs, duration_ms: f64) -> serde_json::Value {
    let stages: Vec<serde_json::Value> = outputs.results.iter().map(stage_payload).collect();
    let mut payload = serde_json::json!({
        "status": outputs.status().to_string(),
        "duration_ms": duration_ms,
        "stages": stages,
        "outputs": outputs.to_output_map(),
    });
    if let Some(kind) = outputs.error_kind {
        payload["error_kind"] = serde_json::json!(kind.as_str());
        payload["error"] = serde_json::json!(outputs.error);
    }
    payload
}
