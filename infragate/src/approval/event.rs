//! Approval events submitted by reviewers.

use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A reviewer's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The reviewer approves.
    #[serde(alias = "approved")]
    Approve,
    /// The reviewer rejects.
    #[serde(alias = "rejected")]
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// An approval or rejection addressed to a gate.
///
/// Events are routed by `gate_id` when present, otherwise by `environment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    /// Reviewer identity.
    pub reviewer: String,
    /// The decision.
    pub decision: Decision,
    /// When the decision was made.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Target gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<Uuid>,
    /// Target environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Free-form reviewer comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalEvent {
    /// Creates an event with the current timestamp.
    #[must_use]
    pub fn new(reviewer: impl Into<String>, decision: Decision) -> Self {
        Self {
            reviewer: reviewer.into(),
            decision,
            timestamp: Utc::now(),
            gate_id: None,
            environment: None,
            comment: None,
        }
    }

    /// Creates an approval.
    #[must_use]
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self::new(reviewer, Decision::Approve)
    }

    /// Creates a rejection.
    #[must_use]
    pub fn reject(reviewer: impl Into<String>) -> Self {
        Self::new(reviewer, Decision::Reject)
    }

    /// Addresses the event to a gate.
    #[must_use]
    pub fn with_gate(mut self, gate_id: Uuid) -> Self {
        self.gate_id = Some(gate_id);
        self
    }

    /// Addresses the event to an environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Attaches a comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Parses one JSON line.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed lines.
    pub fn from_json_line(line: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Returns true for approvals.
    #[must_use]
    pub fn is_approval(&self) -> bool {
        self.decision == Decision::Approve
    }
}
