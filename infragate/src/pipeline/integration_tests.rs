//! End-to-end tests across pipelines, gates and executors.

use crate::approval::{ApprovalBroker, ApprovalEvent, StaticApprovalPolicy};
use crate::config::{FeatureFlags, PipelineInvocation, TimeoutBudget};
use crate::core::{Check, StageStatus};
use crate::errors::ErrorKind;
use crate::pipeline::{
    CiPipeline, DeployPipeline, DestroyPipeline, GateServices, Pipeline, WorkspaceLocks,
};
use crate::testing::{
    assert_pipeline_failed_with, assert_pipeline_succeeded, assert_stage_absent,
    assert_stage_order, assert_stage_status, preloaded_gates, RecordingExecutor,
    ScriptedToolRunner, TestContext,
};
use crate::tools::ToolOutcome;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn flags(bits: u8) -> FeatureFlags {
    FeatureFlags {
        enable_lint: bits & 0b0001 != 0,
        enable_security_scan: bits & 0b0010 != 0,
        enable_compliance: bits & 0b0100 != 0,
        enable_cost_estimation: bits & 0b1000 != 0,
    }
}

fn program_for(check: Check) -> Option<&'static str> {
    match check {
        Check::Lint => Some("tflint"),
        Check::Security => Some("tfsec"),
        Check::Compliance => Some("checkov"),
        Check::Cost => Some("infracost"),
        Check::Format | Check::Validate | Check::Test => None,
    }
}

async fn run_ci(runner: ScriptedToolRunner, invocation: PipelineInvocation) -> crate::core::PipelineOutputs {
    CiPipeline::new(Arc::new(runner))
        .run(TestContext::new().with_invocation(invocation).build("ci"))
        .await
}

#[tokio::test]
async fn test_disabled_checks_are_skipped_never_absent() {
    for bits in 0..16u8 {
        let features = flags(bits);
        let runner = Arc::new(ScriptedToolRunner::clean());
        let outputs = CiPipeline::new(runner.clone())
            .run(
                TestContext::new()
                    .with_invocation(PipelineInvocation::new().with_features(features))
                    .build("ci"),
            )
            .await;

        assert_eq!(outputs.results.len(), Check::ALL.len(), "flags {bits:04b}");
        for check in Check::ALL {
            let expected = if features.is_enabled(check) {
                StageStatus::Pass
            } else {
                StageStatus::Skipped
            };
            assert_stage_status(&outputs, check.as_str(), expected);

            if let Some(program) = program_for(check) {
                let spawned = runner.invocations().iter().any(|inv| inv.program == program);
                assert_eq!(spawned, features.is_enabled(check), "{program} with flags {bits:04b}");
            }
        }
        assert_pipeline_succeeded(&outputs);
    }
}

#[tokio::test]
async fn test_success_iff_all_executed_checks_pass() {
    let failing = [
        ("terraform fmt", Check::Format),
        ("terraform validate", Check::Validate),
        ("tflint", Check::Lint),
        ("terraform test", Check::Test),
        ("tfsec", Check::Security),
        ("checkov", Check::Compliance),
        ("infracost", Check::Cost),
    ];

    for (key, check) in failing {
        for enabled in [true, false] {
            let features = if enabled { flags(0b1111) } else { flags(0) };
            let runner = ScriptedToolRunner::clean()
                .with_outcome(key, ToolOutcome::new(1, "", format!("{key}: failed")));
            let outputs = run_ci(runner, PipelineInvocation::new().with_features(features)).await;

            let executed = features.is_enabled(check);
            assert_eq!(outputs.success(), !executed, "{key} enabled={enabled}");
            if executed {
                assert_stage_status(&outputs, check.as_str(), StageStatus::Fail);
                assert_eq!(outputs.get(check.as_str()).unwrap().detail, format!("{key}: failed"));
                assert_eq!(outputs.error_kind, Some(ErrorKind::StageFailure));
            }
        }
    }
}

#[tokio::test]
async fn test_cost_disabled_example() {
    let features = FeatureFlags {
        enable_cost_estimation: false,
        ..FeatureFlags::default()
    };
    let outputs = run_ci(
        ScriptedToolRunner::clean(),
        PipelineInvocation::new().with_features(features),
    )
    .await;

    assert_eq!(outputs.executed_stages().len(), 6);
    assert_stage_order(
        &outputs,
        &["format", "validate", "lint", "test", "security", "compliance", "cost"],
    );
    let map = outputs.to_output_map();
    assert_eq!(map["cost_result"], "skipped");
    for key in ["format", "validate", "lint", "test", "security", "compliance"] {
        assert_eq!(map[&format!("{key}_result")], "pass");
    }
    assert_eq!(map["status"], "success");
}

#[tokio::test]
async fn test_missing_binary_fails_only_its_stage() {
    let runner = ScriptedToolRunner::clean().with_missing("checkov");
    let outputs = run_ci(runner, PipelineInvocation::new()).await;

    let compliance = outputs.get("compliance").unwrap();
    assert_eq!(compliance.status, StageStatus::Fail);
    assert_eq!(compliance.failure_kind, Some(ErrorKind::Tool));
    assert_stage_status(&outputs, "cost", StageStatus::Pass);
    assert!(!outputs.success());
}

#[tokio::test]
async fn test_confirmation_mismatch_before_any_gate() {
    for supplied in ["destroy", "Destroy", "", "DESTROY!", "DES TROY"] {
        let executor = Arc::new(RecordingExecutor::new());
        let broker = ApprovalBroker::buffering();
        broker.submit_for_environment("dev", ApprovalEvent::approve("alice"));
        broker.submit_for_environment("dev", ApprovalEvent::approve("bob"));
        let pipeline = DestroyPipeline::new(executor.clone()).with_gates(GateServices::new(
            broker.clone(),
            Arc::new(StaticApprovalPolicy::new()),
        ));
        let fixture = TestContext::new()
            .with_invocation(PipelineInvocation::new().with_confirmation(supplied));

        let outputs = pipeline.run(fixture.build("destroy")).await;

        assert_pipeline_failed_with(&outputs, ErrorKind::ConfirmationMismatch);
        assert!(fixture.sink().events_of_type("gate.").is_empty(), "{supplied:?}");
        assert_eq!(broker.backlog_len("dev"), 2, "{supplied:?}");
        assert!(executor.calls().is_empty());
        assert_stage_absent(&outputs, "approval");
    }
}

#[tokio::test(start_paused = true)]
async fn test_destroy_needs_two_distinct_reviewers() {
    let executor = Arc::new(RecordingExecutor::new());
    let invocation = PipelineInvocation::new()
        .with_confirmation("DESTROY")
        .with_timeouts(TimeoutBudget {
            approval_seconds: 600,
            ..TimeoutBudget::default()
        });
    let pipeline = DestroyPipeline::new(executor.clone()).with_gates(preloaded_gates(
        "dev",
        vec![ApprovalEvent::approve("alice"), ApprovalEvent::approve("alice")],
    ));

    let outputs = pipeline
        .run(TestContext::new().with_invocation(invocation).build("destroy"))
        .await;

    assert_pipeline_failed_with(&outputs, ErrorKind::GateTimedOut);
    assert_stage_status(&outputs, "approval", StageStatus::Fail);
    assert_stage_absent(&outputs, "destroy");
    assert!(executor.applied().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_applied_artifact_is_the_planned_one_for_any_delay() {
    for delay_secs in [0, 1, 3_600, 23 * 3_600] {
        let executor = Arc::new(RecordingExecutor::new().with_plan_bytes(vec![7u8, 0, 255, 42]));
        let broker = ApprovalBroker::buffering();
        let pipeline = DeployPipeline::new(executor.clone()).with_gates(GateServices::new(
            broker.clone(),
            Arc::new(StaticApprovalPolicy::new()),
        ));

        let reviewer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            broker.submit_for_environment("dev", ApprovalEvent::approve("alice"));
        });
        let outputs = pipeline.run(TestContext::new().build("deploy")).await;
        reviewer.await.unwrap();

        assert_pipeline_succeeded(&outputs);
        let planned = executor.planned();
        assert_eq!(planned.len(), 1);
        assert_eq!(executor.applied(), vec![planned[0].bytes().to_vec()], "delay {delay_secs}s");
        assert_eq!(outputs.extra["plan_digest"], planned[0].digest());
    }
}

#[tokio::test(start_paused = true)]
async fn test_plan_timeout_applies_nothing() {
    let executor = Arc::new(RecordingExecutor::new().with_plan_delay(Duration::from_secs(3_600)));
    let invocation = PipelineInvocation::new().with_timeouts(TimeoutBudget {
        plan_seconds: 60,
        ..TimeoutBudget::default()
    });
    let fixture = TestContext::new().with_invocation(invocation);

    let outputs = DeployPipeline::new(executor.clone())
        .run(fixture.build("deploy"))
        .await;

    assert_pipeline_failed_with(&outputs, ErrorKind::Timeout);
    assert_stage_status(&outputs, "plan", StageStatus::Fail);
    assert_eq!(outputs.get("plan").unwrap().failure_kind, Some(ErrorKind::Timeout));
    assert!(fixture.sink().events_of_type("gate.").is_empty());
    assert!(executor.applied().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_destroy_timeout_commits_nothing() {
    let executor = Arc::new(RecordingExecutor::new().with_apply_delay(Duration::from_secs(7_200)));
    let invocation = PipelineInvocation::new()
        .with_confirmation("DESTROY")
        .with_timeouts(TimeoutBudget {
            destroy_seconds: 120,
            ..TimeoutBudget::default()
        });
    let pipeline = DestroyPipeline::new(executor.clone()).with_gates(preloaded_gates(
        "dev",
        vec![ApprovalEvent::approve("alice"), ApprovalEvent::approve("bob")],
    ));

    let outputs = pipeline
        .run(TestContext::new().with_invocation(invocation).build("destroy"))
        .await;

    assert_pipeline_failed_with(&outputs, ErrorKind::Timeout);
    assert_stage_status(&outputs, "destroy", StageStatus::Fail);
    assert!(executor.applied().is_empty());
}

#[tokio::test]
async fn test_deploy_event_trail() {
    let executor = Arc::new(RecordingExecutor::new());
    let fixture = TestContext::new();
    let outputs = DeployPipeline::new(executor)
        .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("alice")]))
        .run(fixture.build("deploy"))
        .await;

    assert_pipeline_succeeded(&outputs);
    assert_eq!(
        fixture.sink().names(),
        vec![
            "pipeline.started",
            "stage.started",
            "stage.completed",
            "stage.started",
            "gate.opened",
            "gate.decided",
            "stage.completed",
            "stage.started",
            "stage.completed",
            "pipeline.completed",
        ]
    );
    let (_, completed) = fixture.sink().events_of_type("pipeline.completed").remove(0);
    let completed = completed.unwrap();
    assert_eq!(completed["environment"], "dev");
    assert_eq!(completed["branch"], "main");
    assert_eq!(completed["outputs"]["apply_result"], "pass");
}

#[tokio::test]
async fn test_concurrent_invocations_on_different_directories() {
    let locks = WorkspaceLocks::new();
    let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
    let executor = Arc::new(RecordingExecutor::new());

    let runs = dirs.iter().map(|dir| {
        let pipeline = DeployPipeline::new(executor.clone())
            .with_locks(locks.clone())
            .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("alice")]));
        let ctx = TestContext::new()
            .with_invocation(PipelineInvocation::new().with_working_directory(dir.path()))
            .build("deploy");
        async move { pipeline.run(ctx).await }
    });
    let outputs = futures::future::join_all(runs).await;

    assert!(outputs.iter().all(crate::core::PipelineOutputs::success));
    assert_eq!(executor.applied().len(), 2);
    assert!(!locks.is_locked(dirs[0].path()));
}

#[tokio::test]
async fn test_same_directory_serializes_plan_to_apply() {
    let locks = WorkspaceLocks::new();
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(RecordingExecutor::new());
    let invocation = PipelineInvocation::new().with_working_directory(dir.path());

    let first_broker = ApprovalBroker::buffering();
    let first = Arc::new(
        DeployPipeline::new(executor.clone())
            .with_locks(locks.clone())
            .with_gates(GateServices::new(
                first_broker.clone(),
                Arc::new(StaticApprovalPolicy::new()),
            )),
    );
    let second = DeployPipeline::new(executor.clone())
        .with_locks(locks.clone())
        .with_gates(preloaded_gates("dev", vec![ApprovalEvent::approve("bob")]));

    let first_run = {
        let first = Arc::clone(&first);
        let ctx = TestContext::new().with_invocation(invocation.clone()).build("deploy");
        tokio::spawn(async move { first.run(ctx).await })
    };
    while first_broker.open_count() == 0 {
        tokio::task::yield_now().await;
    }

    let second_run = {
        let ctx = TestContext::new().with_invocation(invocation).build("deploy");
        tokio::spawn(async move { second.run(ctx).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(executor.plan_count(), 1);

    first_broker.submit_for_environment("dev", ApprovalEvent::approve("alice"));
    assert_pipeline_succeeded(&first_run.await.unwrap());
    assert_pipeline_succeeded(&second_run.await.unwrap());
    assert_eq!(executor.plan_count(), 2);
    assert_eq!(executor.applied().len(), 2);
}
