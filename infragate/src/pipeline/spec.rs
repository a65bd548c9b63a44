//! Workflow job specifications and gating conditions.

use super::Pipeline;
use crate::config::PipelineInvocation;
use crate::context::RunIdentity;
use crate::errors::WorkflowValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What triggered a workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Branch the run was triggered on.
    #[serde(default)]
    pub branch: Option<String>,
    /// Triggering event (`push`, `pull_request`, ...).
    #[serde(default)]
    pub event: Option<String>,
}

impl TriggerContext {
    /// Creates a trigger.
    #[must_use]
    pub fn new(branch: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            event: Some(event.into()),
        }
    }
}

impl From<&RunIdentity> for TriggerContext {
    fn from(identity: &RunIdentity) -> Self {
        Self {
            branch: identity.branch.clone(),
            event: identity.event.clone(),
        }
    }
}

/// A predicate deciding whether a job runs.
///
/// Every job also requires all of its dependencies to have succeeded; the
/// condition is evaluated on top of that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// No extra requirement.
    Always,
    /// All dependencies succeeded.
    #[default]
    OnSuccess,
    /// The run is on this branch.
    Branch(String),
    /// The run was triggered by this event.
    Event(String),
    /// Every inner condition holds.
    All(Vec<Condition>),
    /// At least one inner condition holds.
    Any(Vec<Condition>),
    /// The inner condition does not hold.
    Not(Box<Condition>),
}

impl Condition {
    /// Combines conditions with AND.
    #[must_use]
    pub fn all(conditions: impl IntoIterator<Item = Self>) -> Self {
        Self::All(conditions.into_iter().collect())
    }

    /// Combines conditions with OR.
    #[must_use]
    pub fn any(conditions: impl IntoIterator<Item = Self>) -> Self {
        Self::Any(conditions.into_iter().collect())
    }

    /// Negates a condition.
    #[must_use]
    pub fn negate(condition: Self) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Matches a branch.
    #[must_use]
    pub fn branch(name: impl Into<String>) -> Self {
        Self::Branch(name.into())
    }

    /// Matches an event.
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }

    /// Evaluates against a trigger and the dependencies' outcome.
    #[must_use]
    pub fn evaluate(&self, trigger: &TriggerContext, dependencies_succeeded: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnSuccess => dependencies_succeeded,
            Self::Branch(name) => trigger.branch.as_deref() == Some(name.as_str()),
            Self::Event(name) => trigger.event.as_deref() == Some(name.as_str()),
            Self::All(inner) => inner
                .iter()
                .all(|c| c.evaluate(trigger, dependencies_succeeded)),
            Self::Any(inner) => inner
                .iter()
                .any(|c| c.evaluate(trigger, dependencies_succeeded)),
            Self::Not(inner) => !inner.evaluate(trigger, dependencies_succeeded),
        }
    }
}

/// One job in a workflow: a pipeline, its invocation and when to run it.
#[derive(Clone)]
pub struct JobSpec {
    /// The unique job name.
    pub name: String,
    /// The pipeline the job runs.
    pub pipeline: Arc<dyn Pipeline>,
    /// Parameters passed to the pipeline.
    pub invocation: PipelineInvocation,
    /// Names of jobs that must succeed first.
    pub dependencies: BTreeSet<String>,
    /// Extra gating predicate.
    pub condition: Condition,
}

impl JobSpec {
    /// Creates a job with default parameters and no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            name: name.into(),
            pipeline,
            invocation: PipelineInvocation::new(),
            dependencies: BTreeSet::new(),
            condition: Condition::default(),
        }
    }

    /// Sets the invocation.
    #[must_use]
    pub fn with_invocation(mut self, invocation: PipelineInvocation) -> Self {
        self.invocation = invocation;
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn needs(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Validates the job in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the job depends on itself.
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowValidationError::new("Job name cannot be empty"));
        }
        if self.dependencies.contains(&self.name) {
            return Err(WorkflowValidationError::new(format!(
                "Job '{}' cannot depend on itself",
                self.name
            ))
            .with_jobs(vec![self.name.clone()]));
        }
        Ok(())
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline.name())
            .field("dependencies", &self.dependencies)
            .field("condition", &self.condition)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_push() -> TriggerContext {
        TriggerContext::new("main", "push")
    }

    #[test]
    fn test_deploy_gate_condition() {
        let condition = Condition::all([
            Condition::OnSuccess,
            Condition::branch("main"),
            Condition::event("push"),
        ]);

        assert!(condition.evaluate(&main_push(), true));
        assert!(!condition.evaluate(&main_push(), false));
        assert!(!condition.evaluate(&TriggerContext::new("feature", "push"), true));
        assert!(!condition.evaluate(&TriggerContext::new("main", "pull_request"), true));
    }

    #[test]
    fn test_any_and_not() {
        let condition = Condition::any([
            Condition::branch("release"),
            Condition::negate(Condition::event("pull_request")),
        ]);

        assert!(condition.evaluate(&main_push(), true));
        assert!(!condition.evaluate(&TriggerContext::new("main", "pull_request"), true));
        assert!(condition.evaluate(&TriggerContext::new("release", "pull_request"), true));
    }

    #[test]
    fn test_missing_trigger_fields_never_match() {
        let trigger = TriggerContext::default();
        assert!(!Condition::branch("main").evaluate(&trigger, true));
        assert!(Condition::Always.evaluate(&trigger, false));
    }

    #[test]
    fn test_condition_json() {
        let condition: Condition = serde_json::from_str(
            r#"{"all": ["on_success", {"branch": "main"}, {"not": {"event": "schedule"}}]}"#,
        )
        .unwrap();

        assert_eq!(
            condition,
            Condition::all([
                Condition::OnSuccess,
                Condition::branch("main"),
                Condition::negate(Condition::event("schedule")),
            ])
        );
    }

    #[test]
    fn test_trigger_from_identity() {
        let identity = RunIdentity::new().with_branch("main").with_event("push");
        assert_eq!(TriggerContext::from(&identity), main_push());
    }
}
