//! The destroy pipeline: confirmation, destroy plan, two approvals, destroy.

use super::locks::WorkspaceLocks;
use super::steps::{await_gate, bounded, lock_workspace, plan_stage, GateServices, RunRecorder};
use super::Pipeline;
use crate::approval::ApprovalGate;
use crate::confirmation::ConfirmationToken;
use crate::context::{ExecutionContext, PipelineContext};
use crate::core::{PipelineOutputs, PlanMode};
use crate::errors::PipelineError;
use crate::executor::InfraExecutor;
use async_trait::async_trait;
use std::sync::Arc;

/// Tears down an environment after a typed confirmation and two approvals
/// from different reviewers.
///
/// The confirmation word is checked before anything else runs. The second
/// gate excludes everyone who approved the first, and both are recorded as
/// a single `approval` stage.
pub struct DestroyPipeline {
    executor: Arc<dyn InfraExecutor>,
    gates: GateServices,
    locks: WorkspaceLocks,
}

impl DestroyPipeline {
    /// Creates a destroy pipeline with its own broker and lock table.
    #[must_use]
    pub fn new(executor: Arc<dyn InfraExecutor>) -> Self {
        Self {
            executor,
            gates: GateServices::default(),
            locks: WorkspaceLocks::new(),
        }
    }

    /// Sets the broker and policy gates are opened against.
    #[must_use]
    pub fn with_gates(mut self, gates: GateServices) -> Self {
        self.gates = gates;
        self
    }

    /// Shares a lock table with other pipelines.
    #[must_use]
    pub fn with_locks(mut self, locks: WorkspaceLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Returns the gate services.
    #[must_use]
    pub fn gates(&self) -> &GateServices {
        &self.gates
    }
}

impl std::fmt::Debug for DestroyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyPipeline")
            .field("gates", &self.gates)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Pipeline for DestroyPipeline {
    fn name(&self) -> &str {
        "destroy"
    }

    async fn run(&self, ctx: Arc<PipelineContext>) -> PipelineOutputs {
        let mut recorder = RunRecorder::start(Arc::clone(&ctx));
        let invocation = ctx.invocation();

        if let Err(e) = invocation.validate() {
            recorder.abort(&PipelineError::from(e));
            return recorder.finish();
        }

        let timer = recorder.stage_started("confirmation");
        let token = ConfirmationToken::new(
            invocation.confirmation.clone(),
            invocation.approval.expected_confirmation.clone(),
        );
        if let Err(e) = token.validate() {
            recorder.fail(timer, &e);
            return recorder.finish();
        }
        recorder.pass(timer, "confirmed");

        let _workspace = match lock_workspace(&self.locks, &ctx).await {
            Ok(guard) => guard,
            Err(e) => {
                recorder.abort(&e);
                return recorder.finish();
            }
        };

        let Some(artifact) =
            plan_stage(&mut recorder, self.executor.as_ref(), PlanMode::Destroy).await
        else {
            return recorder.finish();
        };

        let timer = recorder.stage_started("approval");
        let first = ApprovalGate::new(
            ctx.environment(),
            invocation.approval.required_approvals,
            invocation.timeouts.approval(),
        );
        let (first, decided) = await_gate(&recorder, &self.gates, first).await;
        if let Err(e) = decided {
            recorder.fail(timer, &e);
            return recorder.finish();
        }

        let second = ApprovalGate::new(
            ctx.environment(),
            invocation.approval.required_approvals,
            invocation.timeouts.approval(),
        )
        .with_excluded_reviewers(first.approvers().iter().cloned());
        let (second, decided) = await_gate(&recorder, &self.gates, second).await;
        if let Err(e) = decided {
            recorder.fail(timer, &e);
            return recorder.finish();
        }
        recorder.pass(
            timer,
            format!(
                "approved by {}; then {}",
                first.approvers().join(", "),
                second.approvers().join(", ")
            ),
        );

        let timer = recorder.stage_started("destroy");
        let destroyed = bounded(
            "destroy",
            invocation.timeouts.destroy(),
            ctx.cancellation(),
            self.executor.destroy(invocation, &artifact),
        )
        .await;
        match destroyed {
            Ok(result) => {
                tracing::info!(artifact_id = %result.artifact_id, "Destroy applied");
                recorder.pass(timer, result.detail);
            }
            Err(e) => recorder.fail(timer, &e),
        }

        recorder.finish()
    }
}
