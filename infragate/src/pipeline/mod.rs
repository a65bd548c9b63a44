//! Pipelines and workflows.
//!
//! This module provides:
//! - The CI, deploy and destroy pipelines
//! - Workspace locks held across plan, gate and apply
//! - Workflows composing pipelines as gated, dependent jobs

mod builder;
mod ci;
mod dag;
mod deploy;
mod destroy;
mod locks;
mod spec;
mod steps;

#[cfg(test)]
mod integration_tests;

pub use builder::WorkflowBuilder;
pub use ci::CiPipeline;
pub use dag::{JobOutcome, JobStatus, Workflow, WorkflowRun};
pub use deploy::DeployPipeline;
pub use destroy::DestroyPipeline;
pub use locks::{WorkspaceGuard, WorkspaceLocks};
pub use spec::{Condition, JobSpec, TriggerContext};
pub use steps::GateServices;

use crate::context::PipelineContext;
use crate::core::PipelineOutputs;
use async_trait::async_trait;
use std::sync::Arc;

/// One invocation contract: CI, deploy or destroy.
///
/// Running never returns an error; every failure is reported through the
/// outputs' stage results and error kind.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Returns the pipeline name.
    fn name(&self) -> &str;

    /// Runs the pipeline to completion.
    async fn run(&self, ctx: Arc<PipelineContext>) -> PipelineOutputs;
}
