//! Terraform-backed executor.

use super::{verify_artifact, InfraExecutor};
use crate::config::PipelineInvocation;
use crate::core::{ApplyResult, PlanArtifact, PlanMode};
use crate::credentials::{CredentialProvider, StaticCredentialProvider};
use crate::errors::PipelineError;
use crate::tools::{ToolInvocation, ToolOutcome, ToolRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Directory under the working directory holding run-scoped plan files.
const PLAN_DIR: &str = ".infragate";

/// Runs `terraform init`, `plan -out` and `apply <planfile>`.
pub struct TerraformExecutor {
    runner: Arc<dyn ToolRunner>,
    credentials: Arc<dyn CredentialProvider>,
    program: String,
}

impl TerraformExecutor {
    /// Creates an executor running `terraform` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            credentials: Arc::new(StaticCredentialProvider::empty()),
            program: "terraform".to_string(),
        }
    }

    /// Sets the credential provider.
    #[must_use]
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }

    /// Overrides the terraform binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn command(
        &self,
        invocation: &PipelineInvocation,
    ) -> Result<ToolInvocation, PipelineError> {
        let credentials = self.credentials.fresh_credentials(&invocation.environment).await?;
        Ok(ToolInvocation::new(&self.program, &invocation.working_directory)
            .env("AWS_REGION", &invocation.region)
            .env("AWS_DEFAULT_REGION", &invocation.region)
            .env("TF_IN_AUTOMATION", "1")
            .env("TFENV_TERRAFORM_VERSION", &invocation.terraform_version)
            .with_credentials(credentials))
    }

    async fn run(&self, command: ToolInvocation) -> Result<ToolOutcome, PipelineError> {
        tracing::info!(command = %command.command_line(), "Running terraform");
        Ok(self.runner.run(command).await?)
    }

}

impl std::fmt::Debug for TerraformExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformExecutor")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

/// A run-scoped plan file, removed when dropped.
///
/// Dropping covers early returns and a caller abandoning the future on
/// timeout or cancellation.
#[derive(Debug)]
struct PlanFile {
    relative: PathBuf,
    absolute: PathBuf,
}

impl PlanFile {
    async fn prepare(invocation: &PipelineInvocation, id: Uuid) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(invocation.working_directory.join(PLAN_DIR)).await?;
        let relative = Path::new(PLAN_DIR).join(format!("{id}.tfplan"));
        Ok(Self {
            absolute: invocation.working_directory.join(&relative),
            relative,
        })
    }
}

impl Drop for PlanFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.absolute) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.absolute.display(), error = %e, "Could not remove plan file");
            }
        }
    }
}

fn last_line(outcome: &ToolOutcome) -> String {
    outcome
        .stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("apply complete")
        .trim()
        .to_string()
}

#[async_trait]
impl InfraExecutor for TerraformExecutor {
    async fn plan(
        &self,
        invocation: &PipelineInvocation,
        mode: PlanMode,
    ) -> Result<PlanArtifact, PipelineError> {
        let base = self
            .command(invocation)
            .await
            .map_err(|e| PipelineError::Plan(e.to_string()))?;

        let init = self
            .run(base.clone().args(["init", "-input=false"]))
            .await
            .map_err(|e| PipelineError::Plan(e.to_string()))?;
        if !init.success() {
            return Err(PipelineError::Plan(init.diagnostic()));
        }

        let file = PlanFile::prepare(invocation, Uuid::new_v4())
            .await
            .map_err(|e| PipelineError::Plan(format!("plan directory: {e}")))?;

        let mut plan = base
            .arg("plan")
            .arg("-input=false")
            .arg(format!("-out={}", file.relative.display()));
        if mode == PlanMode::Destroy {
            plan = plan.arg("-destroy");
        }

        let outcome = self
            .run(plan)
            .await
            .map_err(|e| PipelineError::Plan(e.to_string()))?;
        if !outcome.success() {
            return Err(PipelineError::Plan(outcome.diagnostic()));
        }

        let bytes = tokio::fs::read(&file.absolute).await.map_err(|e| {
            PipelineError::Plan(format!("plan file {}: {e}", file.absolute.display()))
        })?;
        drop(file);

        let artifact = PlanArtifact::new(
            mode,
            &invocation.working_directory,
            &invocation.environment,
            bytes,
        );
        tracing::info!(
            artifact_id = %artifact.id,
            mode = %mode,
            len = artifact.len(),
            digest = %artifact.digest(),
            "Plan computed"
        );
        Ok(artifact)
    }

    async fn apply(
        &self,
        invocation: &PipelineInvocation,
        artifact: &PlanArtifact,
    ) -> Result<ApplyResult, PipelineError> {
        verify_artifact(invocation, artifact)?;

        let command = self
            .command(invocation)
            .await
            .map_err(|e| PipelineError::Apply(e.to_string()))?;

        let file = PlanFile::prepare(invocation, artifact.id)
            .await
            .map_err(|e| PipelineError::Apply(format!("plan directory: {e}")))?;
        tokio::fs::write(&file.absolute, artifact.bytes())
            .await
            .map_err(|e| {
                PipelineError::Apply(format!("plan file {}: {e}", file.absolute.display()))
            })?;

        let command = command
            .args(["apply", "-input=false"])
            .arg(file.relative.to_string_lossy().into_owned());

        let result = self.run(command).await;
        drop(file);

        let outcome = result.map_err(|e| PipelineError::Apply(e.to_string()))?;
        if !outcome.success() {
            return Err(PipelineError::Apply(outcome.diagnostic()));
        }

        tracing::info!(artifact_id = %artifact.id, mode = %artifact.mode, "Plan applied");
        Ok(ApplyResult::for_artifact(artifact, last_line(&outcome)))
    }
}
