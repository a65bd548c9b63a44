//! Reviewer eligibility per environment.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::errors::PipelineError;

/// Decides whether a reviewer may approve for an environment.
///
/// Implementations backed by a remote service should answer from a local
/// cache; the gate consults the policy for every event it receives.
pub trait ApprovalPolicy: Send + Sync {
    /// Returns true if `reviewer` may approve or reject for `environment`.
    fn is_eligible(&self, environment: &str, reviewer: &str) -> bool;
}

/// A policy that accepts every reviewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyReviewer;

impl ApprovalPolicy for AllowAnyReviewer {
    fn is_eligible(&self, _environment: &str, _reviewer: &str) -> bool {
        true
    }
}

/// A config-driven policy mapping environments to allowed reviewers.
///
/// An environment that is absent or mapped to an empty list accepts any
/// reviewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticApprovalPolicy {
    /// Environment name to allowed reviewers.
    #[serde(default)]
    pub reviewers: BTreeMap<String, BTreeSet<String>>,
}

impl StaticApprovalPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts an environment to the given reviewers.
    #[must_use]
    pub fn with_reviewers<I, S>(mut self, environment: impl Into<String>, reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reviewers.insert(
            environment.into(),
            reviewers.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Parses a policy from JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a policy file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl ApprovalPolicy for StaticApprovalPolicy {
    fn is_eligible(&self, environment: &str, reviewer: &str) -> bool {
        match self.reviewers.get(environment) {
            Some(allowed) if !allowed.is_empty() => allowed.contains(reviewer),
            _ => true,
        }
    }
}
