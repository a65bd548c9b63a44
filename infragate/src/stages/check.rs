//! A verification check backed by an external tool.

use super::Stage;
use crate::config::FeatureFlags;
use crate::context::{ExecutionContext, StageContext};
use crate::core::{Check, StageResult};
use crate::credentials::Credentials;
use crate::errors::ErrorKind;
use crate::tools::{summarize, OutputFormat, SummaryError, ToolDefinition, ToolOutcome, ToolRunner};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Runs one check's tool and maps its outcome to a stage result.
///
/// Nonzero exits and unreadable structured output fail with the raw tool
/// diagnostics. A tool that cannot be spawned fails this stage only; it is
/// not retried.
pub struct CheckStage {
    definition: ToolDefinition,
    runner: Arc<dyn ToolRunner>,
    credentials: Credentials,
}

impl CheckStage {
    /// Creates a check stage.
    #[must_use]
    pub fn new(definition: ToolDefinition, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            definition,
            runner,
            credentials: Credentials::new(),
        }
    }

    /// Sets the credentials injected into the tool.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Returns the check.
    #[must_use]
    pub fn check(&self) -> Check {
        self.definition.check
    }

    async fn run_tool(&self, ctx: &StageContext) -> StageResult {
        let name = self.definition.check.as_str();
        let invocation = ctx.invocation();

        if let Some(setup) = self.definition.setup_invocation(invocation, &self.credentials) {
            match self.runner.run(setup).await {
                Ok(outcome) if outcome.success() => {}
                Ok(outcome) => {
                    return StageResult::fail(name, ErrorKind::StageFailure, outcome.diagnostic())
                }
                Err(e) => return StageResult::fail(name, ErrorKind::Tool, e.to_string()),
            }
        }

        let command = self.definition.invocation(invocation, &self.credentials);
        tracing::debug!(stage = name, command = %command.command_line(), "Running check");

        match self.runner.run(command).await {
            Ok(outcome) => self.interpret(&outcome),
            Err(e) => {
                tracing::warn!(stage = name, error = %e, "Check tool could not be run");
                StageResult::fail(name, ErrorKind::Tool, e.to_string())
            }
        }
    }

    fn interpret(&self, outcome: &ToolOutcome) -> StageResult {
        let name = self.definition.check.as_str();
        if !outcome.success() {
            return StageResult::fail(name, ErrorKind::StageFailure, outcome.diagnostic());
        }
        match self.definition.output {
            OutputFormat::Text => StageResult::pass(name, "ok"),
            OutputFormat::Json => match summarize(self.definition.check, &outcome.stdout) {
                Ok(summary) => StageResult::pass(name, summary),
                Err(SummaryError::Malformed(reason)) => {
                    tracing::warn!(stage = name, %reason, "Structured output unreadable");
                    StageResult::fail(name, ErrorKind::StageFailure, outcome.diagnostic())
                }
                Err(SummaryError::Failed(_)) => {
                    StageResult::fail(name, ErrorKind::StageFailure, outcome.diagnostic())
                }
            },
        }
    }
}

impl std::fmt::Debug for CheckStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckStage")
            .field("check", &self.definition.check)
            .field("program", &self.definition.program)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for CheckStage {
    fn name(&self) -> &str {
        self.definition.check.as_str()
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let check = self.definition.check;

        if !ctx.invocation().features.is_enabled(check) {
            let flag = FeatureFlags::flag_name(check).unwrap_or("feature flag");
            ctx.try_emit_event("stage.skipped", Some(serde_json::json!({"reason": flag})));
            return StageResult::skipped(check.as_str(), format!("{flag} is false"));
        }

        ctx.try_emit_event("stage.started", None);
        let started_at = Utc::now();
        let start = Instant::now();

        let result = self
            .run_tool(ctx)
            .await
            .with_timing(started_at, start.elapsed().as_secs_f64() * 1000.0);

        ctx.try_emit_event(
            "stage.completed",
            Some(serde_json::json!({
                "status": result.status.to_string(),
                "duration_ms": result.duration_ms,
            })),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureFlags, PipelineInvocation};
    use crate::context::PipelineContext;
    use crate::core::StageStatus;
    use crate::errors::ToolError;
    use crate::tools::{MockToolRunner, ToolRegistry};

    fn stage_ctx(invocation: PipelineInvocation, name: &str) -> StageContext {
        Arc::new(PipelineContext::new("ci", invocation)).for_stage(name)
    }

    fn stage(check: Check, runner: MockToolRunner) -> CheckStage {
        let definition = ToolRegistry::new().get(check).unwrap().clone();
        CheckStage::new(definition, Arc::new(runner))
    }

    #[tokio::test]
    async fn test_pass_on_zero_exit() {
        let mut runner = MockToolRunner::new();
        runner.expect_run().returning(|_| Ok(ToolOutcome::ok("")));

        let result = stage(Check::Format, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "format"))
            .await;
        assert_eq!(result.status, StageStatus::Pass);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_raw_diagnostics() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ToolOutcome::new(3, "main.tf\n", "--- old\n+++ new\n")));

        let result = stage(Check::Format, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "format"))
            .await;

        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.failure_kind, Some(ErrorKind::StageFailure));
        assert_eq!(result.detail, "--- old\n+++ new\nmain.tf");
    }

    #[tokio::test]
    async fn test_malformed_json_fails() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ToolOutcome::ok("panic: plugin crashed")));

        let result = stage(Check::Lint, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "lint"))
            .await;

        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.detail, "panic: plugin crashed");
    }

    #[tokio::test]
    async fn test_spawn_error_fails_once() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|inv| Err(ToolError::spawn(inv.program, "No such file or directory")));

        let result = stage(Check::Security, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "security"))
            .await;

        assert_eq!(result.status, StageStatus::Fail);
        assert_eq!(result.failure_kind, Some(ErrorKind::Tool));
        assert!(result.detail.contains("tfsec"));
    }

    #[tokio::test]
    async fn test_disabled_check_skipped_without_running() {
        let mut runner = MockToolRunner::new();
        runner.expect_run().never();

        let invocation = PipelineInvocation::new().with_features(FeatureFlags {
            enable_cost_estimation: false,
            ..FeatureFlags::default()
        });
        let result = stage(Check::Cost, runner)
            .execute(&stage_ctx(invocation, "cost"))
            .await;

        assert_eq!(result.status, StageStatus::Skipped);
        assert_eq!(result.detail, "enable_cost_estimation is false");
    }

    #[tokio::test]
    async fn test_validate_runs_init_first() {
        let mut seq = mockall::Sequence::new();
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.args.first().map(String::as_str) == Some("init"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ToolOutcome::ok("")));
        runner
            .expect_run()
            .withf(|inv| inv.args.first().map(String::as_str) == Some("validate"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ToolOutcome::ok(r#"{"valid": true, "warning_count": 0}"#)));

        let result = stage(Check::Validate, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "validate"))
            .await;

        assert_eq!(result.status, StageStatus::Pass);
        assert_eq!(result.detail, "valid, 0 warnings");
    }

    #[tokio::test]
    async fn test_cost_summary() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ToolOutcome::ok(r#"{"totalMonthlyCost": "12.00", "currency": "USD"}"#)));

        let result = stage(Check::Cost, runner)
            .execute(&stage_ctx(PipelineInvocation::new(), "cost"))
            .await;
        assert_eq!(result.detail, "estimated monthly cost 12.00 USD");
    }
}
