//! The verification (CI) pipeline.

use super::steps::RunRecorder;
use super::Pipeline;
use crate::context::{ExecutionContext, PipelineContext};
use crate::core::{Check, PipelineOutputs, StageResult};
use crate::credentials::{CredentialProvider, StaticCredentialProvider};
use crate::errors::{ErrorKind, PipelineError};
use crate::stages::{CheckStage, Stage};
use crate::tools::{ToolRegistry, ToolRunner};
use async_trait::async_trait;
use std::sync::Arc;

/// Runs every check in fixed order against the working directory.
///
/// All checks run even when earlier ones fail; the run succeeds iff every
/// check that was not skipped passed.
pub struct CiPipeline {
    tools: ToolRegistry,
    runner: Arc<dyn ToolRunner>,
    credentials: Arc<dyn CredentialProvider>,
}

impl CiPipeline {
    /// Creates a CI pipeline with the default tool for every check.
    #[must_use]
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            tools: ToolRegistry::new(),
            runner,
            credentials: Arc::new(StaticCredentialProvider::empty()),
        }
    }

    /// Replaces the tool registry.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the credential provider.
    #[must_use]
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }
}

impl std::fmt::Debug for CiPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiPipeline")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Pipeline for CiPipeline {
    fn name(&self) -> &str {
        "ci"
    }

    async fn run(&self, ctx: Arc<PipelineContext>) -> PipelineOutputs {
        let mut recorder = RunRecorder::start(Arc::clone(&ctx));

        if let Err(e) = ctx.invocation().validate() {
            recorder.abort(&PipelineError::from(e));
            return recorder.finish();
        }

        let credentials = match self.credentials.fresh_credentials(ctx.environment()).await {
            Ok(credentials) => credentials,
            Err(e) => {
                recorder.abort(&e);
                return recorder.finish();
            }
        };

        for check in Check::ALL {
            if ctx.is_cancelled() {
                recorder.abort(&super::steps::cancelled(ctx.cancellation()));
                return recorder.finish();
            }

            let result = match self.tools.get(check) {
                Ok(definition) => {
                    let stage = CheckStage::new(definition.clone(), Arc::clone(&self.runner))
                        .with_credentials(credentials.clone());
                    stage.execute(&ctx.for_stage(stage.name())).await
                }
                Err(e) => StageResult::fail(check.as_str(), ErrorKind::Tool, e.to_string()),
            };
            if result.is_failure() {
                tracing::warn!(stage = %check, detail = %result.detail, "Check failed");
            }
            recorder.record(result);
        }

        let failed: Vec<&str> = recorder
            .outputs()
            .results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.stage_name.as_str())
            .collect();
        if !failed.is_empty() {
            let message = format!("failed checks: {}", failed.join(", "));
            recorder.abort_with(ErrorKind::StageFailure, message);
        }

        recorder.finish()
    }
}
