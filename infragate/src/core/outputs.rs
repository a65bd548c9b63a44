//! Named pipeline outputs, keyed by stage.

use super::{StageResult, StageStatus};
use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every required stage passed.
    Success,
    /// At least one stage failed or the pipeline aborted.
    Failure,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// The ordered results of one pipeline invocation.
///
/// Results keep the order they were recorded in; the output map view keys
/// each one as `<stage>_result`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOutputs {
    /// Pipeline name.
    pub pipeline: String,
    /// Ordered stage results.
    pub results: Vec<StageResult>,
    /// Set when the pipeline aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable abort message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra named outputs (plan digest, cost summary).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl PipelineOutputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            ..Default::default()
        }
    }

    /// Records a stage result.
    pub fn push(&mut self, result: StageResult) {
        self.results.push(result);
    }

    /// Records an abort.
    pub fn abort(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error_kind = Some(kind);
        self.error = Some(message.into());
    }

    /// Adds an extra named output.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Gets a stage result by name.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage_name == stage)
    }

    /// Gets a stage status by name.
    #[must_use]
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.get(stage).map(|r| r.status)
    }

    /// Returns true if the pipeline did not abort and no executed stage failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error_kind.is_none() && self.results.iter().all(|r| !r.is_failure())
    }

    /// Returns the overall status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        if self.success() {
            PipelineStatus::Success
        } else {
            PipelineStatus::Failure
        }
    }

    /// Names of stages that actually ran.
    #[must_use]
    pub fn executed_stages(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status.was_executed())
            .map(|r| r.stage_name.as_str())
            .collect()
    }

    /// Returns the flat output map exposed to callers.
    #[must_use]
    pub fn to_output_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .results
            .iter()
            .map(|r| (format!("{}_result", r.stage_name), r.status.to_string()))
            .collect();
        map.insert("status".to_string(), self.status().to_string());
        if let Some(kind) = self.error_kind {
            map.insert("error_kind".to_string(), kind.as_str().to_string());
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}
