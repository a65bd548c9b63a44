//! Error types for infragate pipelines.
//!
//! Every failure a pipeline can report maps to exactly one [`ErrorKind`],
//! which is the externally visible status code. Nothing is retried: the
//! recovery path for any of these is a human re-invocation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable, externally visible classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A verification stage failed.
    StageFailure,
    /// An approval gate was rejected.
    GateRejected,
    /// An approval gate expired before enough approvals arrived.
    GateTimedOut,
    /// The destroy confirmation word did not match.
    ConfirmationMismatch,
    /// Computing the plan failed.
    PlanError,
    /// Applying or destroying failed.
    ApplyError,
    /// A stage exceeded its wall-clock budget.
    Timeout,
    /// The pipeline was cancelled.
    Cancelled,
    /// The invocation parameters were invalid.
    Validation,
    /// An external tool could not be run.
    Tool,
    /// Local I/O failed.
    Io,
    /// Parameters or artifacts could not be (de)serialized.
    Serialization,
}

impl ErrorKind {
    /// Returns the snake_case code used in outputs and events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageFailure => "stage_failure",
            Self::GateRejected => "gate_rejected",
            Self::GateTimedOut => "gate_timed_out",
            Self::ConfirmationMismatch => "confirmation_mismatch",
            Self::PlanError => "plan_error",
            Self::ApplyError => "apply_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Validation => "validation",
            Self::Tool => "tool",
            Self::Io => "io",
            Self::Serialization => "serialization",
        }
    }

    /// Returns true for failures that abort the rest of the pipeline.
    ///
    /// Stage failures are the only kind isolated to their stage.
    #[must_use]
    pub fn is_pipeline_fatal(&self) -> bool {
        !matches!(self, Self::StageFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One or more verification stages failed.
    #[error("Stage '{stage}' failed: {detail}")]
    StageFailure {
        /// The failing stage.
        stage: String,
        /// Diagnostic text.
        detail: String,
    },

    /// An approval gate was rejected.
    #[error("Approval for environment '{environment}' rejected by {reviewer}")]
    GateRejected {
        /// Gate environment.
        environment: String,
        /// Reviewer who rejected.
        reviewer: String,
    },

    /// An approval gate timed out.
    #[error("Approval for environment '{environment}' timed out after {}s", timeout.as_secs())]
    GateTimedOut {
        /// Gate environment.
        environment: String,
        /// The configured gate timeout.
        timeout: Duration,
    },

    /// The confirmation word did not match.
    #[error("Confirmation word mismatch: destroy requires typing the exact confirmation word")]
    ConfirmationMismatch,

    /// Plan computation failed.
    #[error("Plan failed: {0}")]
    Plan(String),

    /// Apply or destroy failed.
    #[error("Apply failed: {0}")]
    Apply(String),

    /// A stage exceeded its budget.
    #[error("Stage '{stage}' timed out after {}s", limit.as_secs())]
    Timeout {
        /// The stage that timed out.
        stage: String,
        /// The configured budget.
        limit: Duration,
    },

    /// The pipeline was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Invalid invocation parameters.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A tool-related error.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Creates a stage failure error.
    #[must_use]
    pub fn stage_failure(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Creates a gate rejected error.
    #[must_use]
    pub fn gate_rejected(environment: impl Into<String>, reviewer: impl Into<String>) -> Self {
        Self::GateRejected {
            environment: environment.into(),
            reviewer: reviewer.into(),
        }
    }

    /// Creates a gate timed out error.
    #[must_use]
    pub fn gate_timed_out(environment: impl Into<String>, timeout: Duration) -> Self {
        Self::GateTimedOut {
            environment: environment.into(),
            timeout,
        }
    }

    /// Creates a stage timeout error.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            limit,
        }
    }

    /// Returns the externally visible error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StageFailure { .. } => ErrorKind::StageFailure,
            Self::GateRejected { .. } => ErrorKind::GateRejected,
            Self::GateTimedOut { .. } => ErrorKind::GateTimedOut,
            Self::ConfirmationMismatch => ErrorKind::ConfirmationMismatch,
            Self::Plan(_) => ErrorKind::PlanError,
            Self::Apply(_) => ErrorKind::ApplyError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Tool(_) => ErrorKind::Tool,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().as_str()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::StageFailure { stage, .. } | Self::Timeout { stage, .. } => {
                map.insert("stage".to_string(), serde_json::json!(stage));
            }
            Self::GateRejected {
                environment,
                reviewer,
            } => {
                map.insert("environment".to_string(), serde_json::json!(environment));
                map.insert("reviewer".to_string(), serde_json::json!(reviewer));
            }
            Self::GateTimedOut { environment, timeout } => {
                map.insert("environment".to_string(), serde_json::json!(environment));
                map.insert(
                    "timeout_seconds".to_string(),
                    serde_json::json!(timeout.as_secs_f64()),
                );
            }
            _ => {}
        }

        map
    }
}

/// Error raised when invocation parameters fail validation.
#[derive(Debug, Clone, Error)]
#[error("Invalid invocation parameter '{field}': {message}")]
pub struct ValidationError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while invoking an external tool.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool binary could not be spawned.
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// The program name.
        program: String,
        /// The OS-level reason.
        reason: String,
    },

    /// The tool was terminated without an exit code.
    #[error("'{program}' terminated abnormally")]
    Terminated {
        /// The program name.
        program: String,
    },

    /// No tool is registered for a check.
    #[error("No tool registered for check '{check}'")]
    NotRegistered {
        /// The check name.
        check: String,
    },
}

impl ToolError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates a terminated error.
    #[must_use]
    pub fn terminated(program: impl Into<String>) -> Self {
        Self::Terminated {
            program: program.into(),
        }
    }
}

/// Error raised when a workflow graph is malformed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkflowValidationError {
    /// The error message.
    pub message: String,
    /// The jobs involved in the error.
    pub jobs: Vec<String>,
}

impl WorkflowValidationError {
    /// Creates a new workflow validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            jobs: Vec::new(),
        }
    }

    /// Sets the jobs involved.
    #[must_use]
    pub fn with_jobs(mut self, jobs: Vec<String>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Creates a cycle error from the cycle path.
    #[must_use]
    pub fn cycle(path: Vec<String>) -> Self {
        Self::new(format!("Cycle detected in workflow: {}", path.join(" -> "))).with_jobs(path)
    }
}

/// Errors raised by the pipeline registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The reference could not be parsed.
    #[error("Invalid pipeline reference '{reference}': {reason}")]
    InvalidReference {
        /// The reference as given.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No pipeline is registered under the name.
    #[error("Unknown pipeline '{name}'")]
    UnknownPipeline {
        /// The pipeline name.
        name: String,
    },

    /// No registered version satisfies the requirement.
    #[error("No version of '{name}' matches '{requirement}' (registered: {available})")]
    NoMatchingVersion {
        /// The pipeline name.
        name: String,
        /// The requirement.
        requirement: String,
        /// Registered versions, comma separated.
        available: String,
    },

    /// The exact name and version is already registered.
    #[error("Pipeline '{name}@{version}' is already registered")]
    Duplicate {
        /// The pipeline name.
        name: String,
        /// The version.
        version: String,
    },
}

impl RegistryError {
    /// Creates an invalid-reference error.
    #[must_use]
    pub fn invalid(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ErrorKind::StageFailure.as_str(), "stage_failure");
        assert_eq!(ErrorKind::GateRejected.as_str(), "gate_rejected");
        assert_eq!(ErrorKind::GateTimedOut.as_str(), "gate_timed_out");
        assert_eq!(ErrorKind::ConfirmationMismatch.as_str(), "confirmation_mismatch");
        assert_eq!(ErrorKind::PlanError.as_str(), "plan_error");
        assert_eq!(ErrorKind::ApplyError.as_str(), "apply_error");
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::GateTimedOut).unwrap();
        assert_eq!(json, r#""gate_timed_out""#);
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(PipelineError::ConfirmationMismatch.kind(), ErrorKind::ConfirmationMismatch);
        assert_eq!(
            PipelineError::timeout("apply", Duration::from_secs(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(PipelineError::Plan("boom".into()).kind(), ErrorKind::PlanError);
        assert_eq!(
            PipelineError::from(ValidationError::new("region", "empty")).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_only_stage_failure_is_isolated() {
        assert!(!ErrorKind::StageFailure.is_pipeline_fatal());
        assert!(ErrorKind::GateRejected.is_pipeline_fatal());
        assert!(ErrorKind::ConfirmationMismatch.is_pipeline_fatal());
    }

    #[test]
    fn test_to_dict_gate_rejected() {
        let err = PipelineError::gate_rejected("prod", "alice");
        let dict = err.to_dict();

        assert_eq!(dict.get("kind").unwrap(), "gate_rejected");
        assert_eq!(dict.get("environment").unwrap(), "prod");
        assert_eq!(dict.get("reviewer").unwrap(), "alice");
    }

    #[test]
    fn test_timeout_message() {
        let err = PipelineError::timeout("plan", Duration::from_secs(90));
        assert_eq!(err.to_string(), "Stage 'plan' timed out after 90s");
    }

    #[test]
    fn test_workflow_cycle_error() {
        let err = WorkflowValidationError::cycle(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.jobs.len(), 3);
    }
}
