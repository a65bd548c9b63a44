//! Test doubles for the executor and tool-runner seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::PipelineInvocation;
use crate::core::{ApplyResult, PlanArtifact, PlanMode};
use crate::errors::{PipelineError, ToolError};
use crate::executor::{verify_artifact, InfraExecutor};
use crate::tools::{ToolInvocation, ToolOutcome, ToolRunner};

/// One call seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    /// A plan was requested.
    Plan(PlanMode),
    /// An artifact was applied; holds its bytes as received.
    Apply(Vec<u8>),
}

/// An in-memory executor that records every call.
///
/// Plans produce the configured bytes. Apply verifies the artifact the same
/// way a real executor does, then records exactly what it was given.
#[derive(Debug)]
pub struct RecordingExecutor {
    plan_bytes: Vec<u8>,
    plan_error: Option<String>,
    apply_error: Option<String>,
    plan_delay: Duration,
    apply_delay: Duration,
    calls: Mutex<Vec<ExecutorCall>>,
    planned: Mutex<Vec<PlanArtifact>>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    /// Creates an executor that plans a fixed payload and always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plan_bytes: b"plan: 1 to add, 0 to change, 0 to destroy".to_vec(),
            plan_error: None,
            apply_error: None,
            plan_delay: Duration::ZERO,
            apply_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            planned: Mutex::new(Vec::new()),
        }
    }

    /// Sets the plan payload.
    #[must_use]
    pub fn with_plan_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.plan_bytes = bytes.into();
        self
    }

    /// Makes every plan fail.
    #[must_use]
    pub fn failing_plan(mut self, message: impl Into<String>) -> Self {
        self.plan_error = Some(message.into());
        self
    }

    /// Makes every apply fail.
    #[must_use]
    pub fn failing_apply(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self
    }

    /// Delays each plan.
    #[must_use]
    pub fn with_plan_delay(mut self, delay: Duration) -> Self {
        self.plan_delay = delay;
        self
    }

    /// Delays each apply.
    #[must_use]
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Returns every call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }

    /// Returns the bytes of every completed apply.
    #[must_use]
    pub fn applied(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ExecutorCall::Apply(bytes) => Some(bytes.clone()),
                ExecutorCall::Plan(_) => None,
            })
            .collect()
    }

    /// Returns every artifact handed out by `plan`.
    #[must_use]
    pub fn planned(&self) -> Vec<PlanArtifact> {
        self.planned.lock().clone()
    }

    /// Returns the number of plans requested.
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ExecutorCall::Plan(_)))
            .count()
    }
}

#[async_trait]
impl InfraExecutor for RecordingExecutor {
    async fn plan(
        &self,
        invocation: &PipelineInvocation,
        mode: PlanMode,
    ) -> Result<PlanArtifact, PipelineError> {
        self.calls.lock().push(ExecutorCall::Plan(mode));
        if !self.plan_delay.is_zero() {
            tokio::time::sleep(self.plan_delay).await;
        }
        if let Some(message) = &self.plan_error {
            return Err(PipelineError::Plan(message.clone()));
        }
        let artifact = PlanArtifact::new(
            mode,
            invocation.working_directory.clone(),
            invocation.environment.clone(),
            self.plan_bytes.clone(),
        );
        self.planned.lock().push(artifact.clone());
        Ok(artifact)
    }

    async fn apply(
        &self,
        invocation: &PipelineInvocation,
        artifact: &PlanArtifact,
    ) -> Result<ApplyResult, PipelineError> {
        verify_artifact(invocation, artifact)?;
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        if let Some(message) = &self.apply_error {
            return Err(PipelineError::Apply(message.clone()));
        }
        self.calls
            .lock()
            .push(ExecutorCall::Apply(artifact.bytes().to_vec()));
        Ok(ApplyResult::for_artifact(
            artifact,
            "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.",
        ))
    }
}

/// A tool runner answering from a script keyed by program and first argument.
///
/// Unscripted invocations succeed with empty output; a script entry of
/// `None` simulates a missing binary.
#[derive(Debug, Default)]
pub struct ScriptedToolRunner {
    script: HashMap<String, Option<ToolOutcome>>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

fn script_key(program: &str, first_arg: Option<&str>) -> String {
    match first_arg {
        Some(arg) => format!("{program} {arg}"),
        None => program.to_string(),
    }
}

impl ScriptedToolRunner {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome for `key`, either `"program"` or `"program arg"`.
    #[must_use]
    pub fn with_outcome(mut self, key: impl Into<String>, outcome: ToolOutcome) -> Self {
        self.script.insert(key.into(), Some(outcome));
        self
    }

    /// Scripts `key` as a binary that cannot be spawned.
    #[must_use]
    pub fn with_missing(mut self, key: impl Into<String>) -> Self {
        self.script.insert(key.into(), None);
        self
    }

    /// Scripts clean output for every default tool.
    #[must_use]
    pub fn clean() -> Self {
        Self::new()
            .with_outcome(
                "terraform validate",
                ToolOutcome::ok(r#"{"valid": true, "error_count": 0, "warning_count": 0}"#),
            )
            .with_outcome("tflint", ToolOutcome::ok(r#"{"issues": [], "errors": []}"#))
            .with_outcome("tfsec", ToolOutcome::ok(r#"{"results": null}"#))
            .with_outcome(
                "checkov",
                ToolOutcome::ok(r#"{"summary": {"passed": 12, "failed": 0}}"#),
            )
            .with_outcome(
                "infracost",
                ToolOutcome::ok(r#"{"totalMonthlyCost": "12.40", "currency": "USD"}"#),
            )
    }

    /// Returns every invocation seen.
    #[must_use]
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().clone()
    }

    /// Returns the command lines seen.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(ToolInvocation::command_line)
            .collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedToolRunner {
    async fn run(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
        let program = invocation.program.clone();
        let first = invocation.args.first().cloned();
        self.invocations.lock().push(invocation);

        let specific = self.script.get(&script_key(&program, first.as_deref()));
        let entry = specific.or_else(|| self.script.get(&program));
        match entry {
            Some(Some(outcome)) => Ok(outcome.clone()),
            Some(None) => Err(ToolError::spawn(program, "No such file or directory (os error 2)")),
            None => Ok(ToolOutcome::ok("")),
        }
    }
}
