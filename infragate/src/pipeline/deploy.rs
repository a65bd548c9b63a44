//! The deploy pipeline: plan, one approval, apply.

use super::locks::WorkspaceLocks;
use super::steps::{await_gate, bounded, lock_workspace, plan_stage, GateServices, RunRecorder};
use super::Pipeline;
use crate::approval::ApprovalGate;
use crate::context::{ExecutionContext, PipelineContext};
use crate::core::{PipelineOutputs, PlanMode};
use crate::errors::PipelineError;
use crate::executor::InfraExecutor;
use async_trait::async_trait;
use std::sync::Arc;

/// Plans, waits for approval on the target environment, then applies
/// exactly the planned artifact.
///
/// The working directory stays locked from plan to apply. A rejected or
/// expired gate aborts the run and nothing is applied.
pub struct DeployPipeline {
    executor: Arc<dyn InfraExecutor>,
    gates: GateServices,
    locks: WorkspaceLocks,
}

impl DeployPipeline {
    /// Creates a deploy pipeline with its own broker and lock table.
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

impl std::fmt::Debug for DeployPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployPipeline")
            .field("gates", &self.gates)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Pipeline for DeployPipeline {
    fn name(&self) -> &str {
        "deploy"
    }

    async fn run(&self, ctx: Arc<PipelineContext>) -> PipelineOutputs {
        let mut recorder = RunRecorder::start(Arc::clone(&ctx));
        let invocation = ctx.invocation();

        if let Err(e) = invocation.validate() {
            recorder.abort(&PipelineError::from(e));
            return recorder.finish();
        }

        let _workspace = match lock_workspace(&self.locks, &ctx).await {
            Ok(guard) => guard,
            Err(e) => {
                recorder.abort(&e);
                return recorder.finish();
            }
        };

        let Some(artifact) = plan_stage(&mut recorder, self.executor.as_ref(), PlanMode::Apply).await
        else {
            return recorder.finish();
        };

        let timer = recorder.stage_started("approval");
        let gate = ApprovalGate::new(
            ctx.environment(),
            invocation.approval.required_approvals,
            invocation.timeouts.approval(),
        );
        let (gate, decided) = await_gate(&recorder, &self.gates, gate).await;
        if let Err(e) = decided {
            recorder.fail(timer, &e);
            return recorder.finish();
        }
        recorder.pass(timer, format!("approved by {}", gate.approvers().join(", ")));

        let timer = recorder.stage_started("apply");
        let applied = bounded(
            "apply",
            invocation.timeouts.apply(),
            ctx.cancellation(),
            self.executor.apply(invocation, &artifact),
        )
        .await;
        match applied {
            Ok(result) => {
                tracing::info!(artifact_id = %result.artifact_id, "Plan applied");
                recorder.pass(timer, result.detail);
            }
            Err(e) => recorder.fail(timer, &e),
        }

        recorder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalBroker, ApprovalEvent, StaticApprovalPolicy};
    use crate::config::{PipelineInvocation, TimeoutBudget};
    use crate::core::StageStatus;
    use crate::errors::ErrorKind;
    use crate::testing::{
        assert_pipeline_failed_with, assert_pipeline_succeeded, assert_stage_absent,
        assert_stage_order, assert_stage_status, preloaded_gates, RecordingExecutor, TestContext,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_approved_deploy_applies_planned_artifact() {
        let executor = Arc::new(RecordingExecutor::new().with_plan_bytes(b"plan-v1".to_vec()));
        let pipeline = DeployPipeline::new(executor.clone())
            .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("alice")]));

        let outputs = pipeline.run(TestContext::new().build("deploy")).await;

        assert_pipeline_succeeded(&outputs);
        assert_stage_order(&outputs, &["plan", "approval", "apply"]);
        assert_eq!(outputs.get("approval").unwrap().detail, "approved by alice");
        assert_eq!(executor.applied(), vec![b"plan-v1".to_vec()]);
        assert_eq!(executor.plan_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_aborts_before_apply() {
        let executor = Arc::new(RecordingExecutor::new());
        let pipeline = DeployPipeline::new(executor.clone())
            .with_gates(preloaded_gates("dev", vec![ApprovalEvent::reject("bob")]));

        let outputs = pipeline.run(TestContext::new().build("deploy")).await;

        assert_pipeline_failed_with(&outputs, ErrorKind::GateRejected);
        assert_stage_status(&outputs, "approval", StageStatus::Fail);
        assert_stage_absent(&outputs, "apply");
        assert!(executor.applied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_timeout_aborts_before_apply() {
        let executor = Arc::new(RecordingExecutor::new());
        let invocation = PipelineInvocation::new().with_timeouts(TimeoutBudget {
            approval_seconds: 60,
            ..TimeoutBudget::default()
        });
        let pipeline = DeployPipeline::new(executor.clone());

        let outputs = pipeline
            .run(TestContext::new().with_invocation(invocation).build("deploy"))
            .await;

        assert_pipeline_failed_with(&outputs, ErrorKind::GateTimedOut);
        assert!(executor.applied().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_approval_timeout_is_a_validation_failure() {
        let executor = Arc::new(RecordingExecutor::new());
        let invocation = PipelineInvocation::new().with_timeouts(TimeoutBudget {
            approval_seconds: u64::MAX,
            ..TimeoutBudget::default()
        });
        let pipeline = DeployPipeline::new(executor.clone())
            .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("alice")]));

        let outputs = pipeline
            .run(TestContext::new().with_invocation(invocation).build("deploy"))
            .await;

        assert_pipeline_failed_with(&outputs, ErrorKind::Validation);
        assert_eq!(executor.plan_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_failure_opens_no_gate() {
        let executor = Arc::new(RecordingExecutor::new().failing_plan("provider error"));
        let broker = ApprovalBroker::buffering();
        let pipeline = DeployPipeline::new(executor).with_gates(GateServices::new(
            broker.clone(),
            Arc::new(StaticApprovalPolicy::new()),
        ));

        let fixture = TestContext::new();
        let outputs = pipeline.run(fixture.build("deploy")).await;

        assert_pipeline_failed_with(&outputs, ErrorKind::PlanError);
        assert_stage_order(&outputs, &["plan"]);
        assert!(!fixture.sink().names().contains(&"gate.opened".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_timeout_is_reported() {
        let executor = Arc::new(
            RecordingExecutor::new().with_apply_delay(Duration::from_secs(7200)),
        );
        let pipeline = DeployPipeline::new(executor.clone())
            .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("alice")]));

        let outputs = pipeline.run(TestContext::new().build("deploy")).await;

        assert_pipeline_failed_with(&outputs, ErrorKind::Timeout);
        assert_stage_status(&outputs, "apply", StageStatus::Fail);
        assert!(executor.applied().is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_reviewer_does_not_count() {
        let executor = Arc::new(RecordingExecutor::new());
        let broker = ApprovalBroker::buffering();
        broker.submit_for_environment("dev", ApprovalEvent::approve("mallory"));
        broker.submit_for_environment("dev", ApprovalEvent::approve("alice"));
        let policy = StaticApprovalPolicy::new().with_reviewers("dev", ["alice"]);
        let pipeline = DeployPipeline::new(executor)
            .with_gates(GateServices::new(broker, Arc::new(policy)));

        let outputs = pipeline.run(TestContext::new().build("deploy")).await;

        assert_pipeline_succeeded(&outputs);
        assert_eq!(outputs.get("approval").unwrap().detail, "approved by alice");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let executor = Arc::new(RecordingExecutor::new());
        let pipeline = Arc::new(DeployPipeline::new(executor.clone()));
        let fixture = TestContext::new();
        let ctx = fixture.build("deploy");

        let run = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run(ctx).await })
        };
        while pipeline.gates().broker.open_count() == 0 {
            tokio::task::yield_now().await;
        }
        fixture.cancellation().cancel("superseded by newer commit");

        let outputs = run.await.unwrap();
        assert_pipeline_failed_with(&outputs, ErrorKind::Cancelled);
        assert_eq!(pipeline.gates().broker.open_count(), 0);
        assert!(executor.applied().is_empty());
    }
}
