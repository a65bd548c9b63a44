//! Fixtures for driving pipelines in tests.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::approval::{ApprovalBroker, ApprovalEvent, StaticApprovalPolicy};
use crate::cancellation::CancellationToken;
use crate::config::PipelineInvocation;
use crate::context::{PipelineContext, RunIdentity};
use crate::events::CollectingEventSink;
use crate::pipeline::GateServices;

/// Builds a pipeline context wired to a collecting sink.
#[derive(Debug)]
pub struct TestContext {
    invocation: PipelineInvocation,
    identity: RunIdentity,
    sink: Arc<CollectingEventSink>,
    cancellation: Arc<CancellationToken>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    /// Creates a context for a default invocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            invocation: PipelineInvocation::new(),
            identity: RunIdentity::new().with_branch("main").with_event("push"),
            sink: Arc::new(CollectingEventSink::new()),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Replaces the invocation.
    #[must_use]
    pub fn with_invocation(mut self, invocation: PipelineInvocation) -> Self {
        self.invocation = invocation;
        self
    }

    /// Replaces the run identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the sink events land in.
    #[must_use]
    pub fn sink(&self) -> Arc<CollectingEventSink> {
        Arc::clone(&self.sink)
    }

    /// Returns the cancellation token shared with built contexts.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// Builds the context for `pipeline`.
    #[must_use]
    pub fn build(&self, pipeline: &str) -> Arc<PipelineContext> {
        Arc::new(
            PipelineContext::new(pipeline, self.invocation.clone())
                .with_identity(self.identity.clone())
                .with_event_sink(self.sink.clone())
                .with_cancellation(Arc::clone(&self.cancellation)),
        )
    }
}

/// Gate services backed by a buffering broker preloaded with decisions.
///
/// Each event is addressed to `environment`; consecutive gates consume the
/// queue in order.
#[must_use]
pub fn preloaded_gates(environment: &str, events: Vec<ApprovalEvent>) -> GateServices {
    let broker = ApprovalBroker::buffering();
    for event in events {
        broker.submit_for_environment(environment, event);
    }
    GateServices::new(broker, Arc::new(StaticApprovalPolicy::new()))
}

/// Waits for a gate on `environment` other than those in `seen`, then
/// delivers `events` to it and returns its ID.
pub async fn decide_next_gate(
    broker: &ApprovalBroker,
    environment: &str,
    seen: &[Uuid],
    events: Vec<ApprovalEvent>,
) -> Uuid {
    loop {
        let next = broker
            .open_gates()
            .into_iter()
            .find(|(id, env)| env == environment && !seen.contains(id));
        if let Some((gate_id, _)) = next {
            for event in events {
                broker.submit_to_gate(gate_id, event);
            }
            return gate_id;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
