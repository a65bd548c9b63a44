//! Execution contexts for pipeline and stage execution.

use super::RunIdentity;
use crate::cancellation::CancellationToken;
use crate::config::PipelineInvocation;
use crate::events::{EventSink, NoOpEventSink};
use std::sync::Arc;
use uuid::Uuid;

/// Trait unifying pipeline and stage context behaviors.
pub trait ExecutionContext: Send + Sync {
    /// Returns the pipeline run ID.
    fn run_id(&self) -> Uuid;

    /// Returns the pipeline name (`ci`, `deploy`, `destroy`).
    fn pipeline(&self) -> &str;

    /// Returns the target environment.
    fn environment(&self) -> &str;

    /// Tries to emit an event.
    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Checks if the run has been cancelled.
    fn is_cancelled(&self) -> bool;
}

/// The context for one pipeline invocation.
pub struct PipelineContext {
    /// Pipeline name.
    pipeline: String,
    /// Run identity.
    identity: RunIdentity,
    /// The validated invocation.
    invocation: Arc<PipelineInvocation>,
    /// Event sink for emitting events.
    event_sink: Arc<dyn EventSink>,
    /// Cancellation token shared with the caller.
    cancel: Arc<CancellationToken>,
}

impl PipelineContext {
    /// Creates a new pipeline context.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, invocation: PipelineInvocation) -> Self {
        Self {
            pipeline: pipeline.into(),
            identity: RunIdentity::new(),
            invocation: Arc::new(invocation),
            event_sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the run identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the invocation.
    #[must_use]
    pub fn invocation(&self) -> &PipelineInvocation {
        &self.invocation
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Returns the cancel reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel.reason()
    }

    /// Scopes the context to a single stage.
    #[must_use]
    pub fn for_stage(self: &Arc<Self>, stage_name: impl Into<String>) -> StageContext {
        StageContext {
            pipeline_ctx: Arc::clone(self),
            stage_name: stage_name.into(),
        }
    }

    fn enrich(&self, data: Option<serde_json::Value>) -> serde_json::Value {
        let mut enriched = data.unwrap_or(serde_json::json!({}));

        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert(
                "pipeline_run_id".to_string(),
                serde_json::json!(self.identity.run_id.to_string()),
            );
            map.insert("pipeline".to_string(), serde_json::json!(&self.pipeline));
            map.insert(
                "environment".to_string(),
                serde_json::json!(&self.invocation.environment),
            );
            if let Some(ref branch) = self.identity.branch {
                map.insert("branch".to_string(), serde_json::json!(branch));
            }
        }

        enriched
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("pipeline", &self.pipeline)
            .field("run_id", &self.identity.run_id)
            .field("environment", &self.invocation.environment)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for PipelineContext {
    fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    fn pipeline(&self) -> &str {
        &self.pipeline
    }

    fn environment(&self) -> &str {
        &self.invocation.environment
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.event_sink.try_emit(event_type, Some(self.enrich(data)));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The context for a single stage execution.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The pipeline context.
    pipeline_ctx: Arc<PipelineContext>,
    /// The stage name.
    stage_name: String,
}

impl StageContext {
    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the pipeline context.
    #[must_use]
    pub fn pipeline_context(&self) -> &Arc<PipelineContext> {
        &self.pipeline_ctx
    }

    /// Returns the invocation.
    #[must_use]
    pub fn invocation(&self) -> &PipelineInvocation {
        self.pipeline_ctx.invocation()
    }
}

impl ExecutionContext for StageContext {
    fn run_id(&self) -> Uuid {
        self.pipeline_ctx.run_id()
    }

    fn pipeline(&self) -> &str {
        self.pipeline_ctx.pipeline()
    }

    fn environment(&self) -> &str {
        self.pipeline_ctx.environment()
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = self.pipeline_ctx.enrich(data);
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("stage".to_string(), serde_json::json!(&self.stage_name));
        }
        self.pipeline_ctx.event_sink.try_emit(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.pipeline_ctx.is_cancelled()
    }
}
