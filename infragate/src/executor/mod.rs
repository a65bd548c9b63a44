//! Plan, apply and destroy.
//!
//! An [`InfraExecutor`] turns an invocation into a [`PlanArtifact`] and
//! later applies exactly that artifact. Pipelines bound every call with
//! the invocation's timeout budget; dropping an executor future must stop
//! any work it started.

mod terraform;

pub use terraform::TerraformExecutor;

use crate::config::PipelineInvocation;
use crate::core::{ApplyResult, PlanArtifact, PlanMode};
use crate::errors::PipelineError;
use async_trait::async_trait;

/// Computes and applies infrastructure plans.
#[async_trait]
pub trait InfraExecutor: Send + Sync {
    /// Computes a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Plan`] if the plan cannot be computed.
    async fn plan(
        &self,
        invocation: &PipelineInvocation,
        mode: PlanMode,
    ) -> Result<PlanArtifact, PipelineError>;

    /// Applies a previously computed plan without re-planning.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Apply`] if the artifact fails verification
    /// or the apply fails.
    async fn apply(
        &self,
        invocation: &PipelineInvocation,
        artifact: &PlanArtifact,
    ) -> Result<ApplyResult, PipelineError>;

    /// Applies a destroy-mode plan.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Apply`] for a non-destroy artifact or a
    /// failed apply.
    async fn destroy(
        &self,
        invocation: &PipelineInvocation,
        artifact: &PlanArtifact,
    ) -> Result<ApplyResult, PipelineError> {
        if artifact.mode != PlanMode::Destroy {
            return Err(PipelineError::Apply(format!(
                "artifact {} is a {} plan, not a destroy plan",
                artifact.id, artifact.mode
            )));
        }
        self.apply(invocation, artifact).await
    }
}

/// Checks that an artifact is intact and belongs to the invocation.
///
/// # Errors
///
/// Returns [`PipelineError::Apply`] describing the first mismatch.
pub fn verify_artifact(
    invocation: &PipelineInvocation,
    artifact: &PlanArtifact,
) -> Result<(), PipelineError> {
    if !artifact.verify() {
        return Err(PipelineError::Apply(format!(
            "artifact {} does not match its digest {}",
            artifact.id,
            artifact.digest()
        )));
    }
    if artifact.environment != invocation.environment {
        return Err(PipelineError::Apply(format!(
            "artifact {} was planned for '{}', not '{}'",
            artifact.id, artifact.environment, invocation.environment
        )));
    }
    if artifact.working_directory != invocation.working_directory {
        return Err(PipelineError::Apply(format!(
            "artifact {} was planned in {}, not {}",
            artifact.id,
            artifact.working_directory.display(),
            invocation.working_directory.display()
        )));
    }
    Ok(())
}
