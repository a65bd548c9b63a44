//! Per-stage results.

use super::StageStatus;
use crate::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The result of a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,
    /// Stage status.
    pub status: StageStatus,
    /// Free-form detail; raw tool diagnostics on failure.
    pub detail: String,
    /// Failure classification, when the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ErrorKind>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: f64,
}

impl StageResult {
    /// Creates a passing result.
    #[must_use]
    pub fn pass(stage_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Pass,
            detail: detail.into(),
            failure_kind: None,
            started_at: Utc::now(),
            duration_ms: 0.0,
        }
    }

    /// Creates a failing result.
    #[must_use]
    pub fn fail(stage_name: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Fail,
            detail: detail.into(),
            failure_kind: Some(kind),
            started_at: Utc::now(),
            duration_ms: 0.0,
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(stage_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Skipped,
            detail: reason.into(),
            failure_kind: None,
            started_at: Utc::now(),
            duration_ms: 0.0,
        }
    }

    /// Sets the timing information.
    #[must_use]
    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration_ms: f64) -> Self {
        self.started_at = started_at;
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the stage passed.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.status == StageStatus::Pass
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Converts the result to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage_name));
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));
        map.insert("detail".to_string(), serde_json::json!(self.detail));
        map.insert("duration_ms".to_string(), serde_json::json!(self.duration_ms));
        if let Some(kind) = self.failure_kind {
            map.insert("failure_kind".to_string(), serde_json::json!(kind.as_str()));
        }
        map
    }
}
