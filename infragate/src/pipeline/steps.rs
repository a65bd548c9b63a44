//! Building blocks shared by the pipelines.

use crate::approval::{ApprovalBroker, ApprovalGate, ApprovalPolicy, GateState, StaticApprovalPolicy};
use crate::cancellation::CancellationToken;
use crate::context::{ExecutionContext, PipelineContext};
use crate::core::{PipelineOutputs, PlanArtifact, PlanMode, StageResult};
use crate::errors::{ErrorKind, PipelineError};
use crate::executor::InfraExecutor;
use crate::observability::{pipeline_payload, stage_payload, SpanTimer};
use super::locks::{WorkspaceGuard, WorkspaceLocks};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The approval broker and policy gates are opened against.
#[derive(Clone)]
pub struct GateServices {
    /// Where gates register.
    pub broker: ApprovalBroker,
    /// Who may decide.
    pub policy: Arc<dyn ApprovalPolicy>,
}

impl GateServices {
    /// Creates gate services.
    #[must_use]
    pub fn new(broker: ApprovalBroker, policy: Arc<dyn ApprovalPolicy>) -> Self {
        Self { broker, policy }
    }
}

impl Default for GateServices {
    fn default() -> Self {
        Self::new(ApprovalBroker::new(), Arc::new(StaticApprovalPolicy::new()))
    }
}

impl std::fmt::Debug for GateServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateServices")
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

/// Runs `fut` under a wall-clock budget, giving up early on cancellation.
///
/// Dropping `fut` on timeout or cancellation stops its work.
pub(crate) async fn bounded<T, F>(
    stage: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(cancelled(cancel)),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(stage, limit_secs = limit.as_secs(), "Stage exceeded its budget");
                Err(PipelineError::timeout(stage, limit))
            }
        },
    }
}

pub(crate) fn cancelled(cancel: &CancellationToken) -> PipelineError {
    PipelineError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

/// Takes the workspace lock for the run's working directory.
pub(crate) async fn lock_workspace(
    locks: &WorkspaceLocks,
    ctx: &PipelineContext,
) -> Result<WorkspaceGuard, PipelineError> {
    let cancel = ctx.cancellation();
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(cancelled(cancel)),
        guard = locks.acquire(&ctx.invocation().working_directory) => Ok(guard),
    }
}

/// Runs the `plan` stage and records its result.
///
/// Returns `None` after aborting the run if planning failed.
pub(crate) async fn plan_stage(
    recorder: &mut RunRecorder,
    executor: &dyn InfraExecutor,
    mode: PlanMode,
) -> Option<PlanArtifact> {
    let ctx = Arc::clone(recorder.ctx());
    let invocation = ctx.invocation();
    let timer = recorder.stage_started("plan");
    let planned = bounded(
        "plan",
        invocation.timeouts.plan(),
        ctx.cancellation(),
        executor.plan(invocation, mode),
    )
    .await;

    match planned {
        Ok(artifact) => {
            tracing::info!(
                artifact_id = %artifact.id,
                mode = %mode,
                bytes = artifact.len(),
                digest = %artifact.digest(),
                "Plan computed"
            );
            recorder.pass(
                timer,
                format!("{} bytes, sha256 {}", artifact.len(), artifact.digest()),
            );
            recorder.set_extra("plan_digest", artifact.digest());
            Some(artifact)
        }
        Err(e) => {
            recorder.fail(timer, &e);
            None
        }
    }
}

/// Waits on one gate and maps its terminal state.
pub(crate) async fn await_gate(
    recorder: &RunRecorder,
    services: &GateServices,
    mut gate: ApprovalGate,
) -> (ApprovalGate, Result<(), PipelineError>) {
    let ctx = recorder.ctx();
    let mut subscription = services.broker.open(&gate);
    ctx.try_emit_event(
        "gate.opened",
        Some(serde_json::json!({
            "gate_id": gate.id.to_string(),
            "required_approvals": gate.required_approvals,
            "excluded_reviewers": gate.excluded_reviewers,
            "deadline": gate.deadline().to_rfc3339(),
        })),
    );
    tracing::info!(
        gate_id = %gate.id,
        environment = %gate.environment,
        required = gate.required_approvals,
        "Waiting for approval"
    );

    let state = subscription
        .wait(&mut gate, services.policy.as_ref(), ctx.cancellation())
        .await;
    drop(subscription);

    ctx.try_emit_event(
        "gate.decided",
        Some(serde_json::json!({
            "gate_id": gate.id.to_string(),
            "state": state.as_str(),
            "approvers": gate.approvers(),
        })),
    );

    let result = match state {
        GateState::Approved => Ok(()),
        GateState::Rejected => Err(PipelineError::gate_rejected(
            &gate.environment,
            gate.rejected_by().unwrap_or("unknown"),
        )),
        GateState::TimedOut => Err(PipelineError::gate_timed_out(&gate.environment, gate.timeout)),
        GateState::Cancelled | GateState::Pending => Err(cancelled(ctx.cancellation())),
    };
    (gate, result)
}

/// Accumulates a run's results and emits its lifecycle events.
pub(crate) struct RunRecorder {
    ctx: Arc<PipelineContext>,
    outputs: PipelineOutputs,
    timer: SpanTimer,
}

impl RunRecorder {
    /// Starts recording a run.
    pub(crate) fn start(ctx: Arc<PipelineContext>) -> Self {
        let name = ctx.pipeline().to_string();
        tracing::info!(
            pipeline = %name,
            run_id = %ctx.run_id(),
            environment = %ctx.environment(),
            "Pipeline started"
        );
        ctx.try_emit_event("pipeline.started", None);
        Self {
            outputs: PipelineOutputs::new(&name),
            timer: SpanTimer::start(name),
            ctx,
        }
    }

    pub(crate) fn ctx(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub(crate) fn outputs(&self) -> &PipelineOutputs {
        &self.outputs
    }

    /// Marks a stage as started.
    pub(crate) fn stage_started(&self, stage: &str) -> SpanTimer {
        self.ctx.for_stage(stage).try_emit_event("stage.started", None);
        SpanTimer::start(stage)
    }

    /// Records a finished stage result.
    pub(crate) fn push(&mut self, result: StageResult) {
        self.ctx
            .for_stage(&result.stage_name)
            .try_emit_event("stage.completed", Some(stage_payload(&result)));
        self.outputs.push(result);
    }

    /// Records a result whose stage already emitted its own events.
    pub(crate) fn record(&mut self, result: StageResult) {
        self.outputs.push(result);
    }

    /// Records a passing stage.
    pub(crate) fn pass(&mut self, timer: SpanTimer, detail: impl Into<String>) {
        let started_at = timer.started_at();
        let stage = timer.name().to_string();
        let result = StageResult::pass(stage, detail).with_timing(started_at, timer.finish());
        self.push(result);
    }

    /// Records a failed stage and aborts the run with the same error.
    pub(crate) fn fail(&mut self, timer: SpanTimer, error: &PipelineError) {
        let started_at = timer.started_at();
        let stage = timer.name().to_string();
        let result = StageResult::fail(stage, error.kind(), error.to_string())
            .with_timing(started_at, timer.finish());
        self.push(result);
        self.abort(error);
    }

    /// Aborts the run without a stage result.
    pub(crate) fn abort(&mut self, error: &PipelineError) {
        tracing::warn!(
            pipeline = %self.outputs.pipeline,
            error_kind = %error.kind(),
            error = %error,
            "Pipeline aborted"
        );
        self.outputs.abort(error.kind(), error.to_string());
    }

    /// Aborts with a kind and message.
    pub(crate) fn abort_with(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.outputs.abort(kind, message);
    }

    /// Adds an extra named output.
    pub(crate) fn set_extra(&mut self, key: &str, value: impl Into<String>) {
        self.outputs.set_extra(key, value);
    }

    /// Emits the closing event and returns the outputs.
    pub(crate) fn finish(self) -> PipelineOutputs {
        let duration_ms = self.timer.finish();
        let payload = pipeline_payload(&self.outputs, duration_ms);
        let event = if self.outputs.success() {
            "pipeline.completed"
        } else {
            "pipeline.failed"
        };
        tracing::info!(
            pipeline = %self.outputs.pipeline,
            status = %self.outputs.status(),
            duration_ms,
            "Pipeline finished"
        );
        self.ctx.try_emit_event(event, Some(payload));
        self.outputs
    }
}
