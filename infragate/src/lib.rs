//! # Infragate
//!
//! Terraform CI, deploy and destroy pipelines with human approval gates.
//!
//! Infragate provides:
//!
//! - **CI pipeline**: format, validate, lint, test, security, compliance and
//!   cost checks with per-stage results and an overall status
//! - **Deploy pipeline**: plan, a single environment approval, then apply of
//!   exactly the approved plan
//! - **Destroy pipeline**: a typed confirmation word and two approvals from
//!   different reviewers before the destroy plan is applied
//! - **Workflows**: caller-defined composition of pipelines as gated jobs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use infragate::prelude::*;
//!
//! let runner = Arc::new(ProcessToolRunner);
//! let deploy = DeployPipeline::new(Arc::new(TerraformExecutor::new(runner.clone())));
//!
//! let workflow = WorkflowBuilder::new("terraform")
//!     .job(JobSpec::new("ci", Arc::new(CiPipeline::new(runner))))?
//!     .job(
//!         JobSpec::new("deploy", Arc::new(deploy))
//!             .needs("ci")
//!             .when(Condition::all([Condition::branch("main"), Condition::event("push")])),
//!     )?
//!     .build()?;
//!
//! let run = workflow.run(&RunIdentity::new().with_branch("main").with_event("push")).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod approval;
pub mod cancellation;
pub mod config;
pub mod confirmation;
pub mod context;
pub mod core;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod stages;
pub mod testing;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::approval::{
        ApprovalBroker, ApprovalEvent, ApprovalGate, ApprovalPolicy, Decision, GateState,
        StaticApprovalPolicy,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ApprovalSettings, FeatureFlags, PipelineInvocation, TimeoutBudget};
    pub use crate::confirmation::ConfirmationToken;
    pub use crate::context::{ExecutionContext, PipelineContext, RunIdentity, StageContext};
    pub use crate::core::{
        ApplyResult, Check, PipelineOutputs, PipelineStatus, PlanArtifact, PlanMode,
        StageResult, StageStatus,
    };
    pub use crate::credentials::{
        CredentialProvider, Credentials, EnvCredentialProvider, SecretString,
        StaticCredentialProvider,
    };
    pub use crate::errors::{ErrorKind, PipelineError, RegistryError, WorkflowValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{InfraExecutor, TerraformExecutor};
    pub use crate::pipeline::{
        CiPipeline, Condition, DeployPipeline, DestroyPipeline, GateServices, JobSpec,
        Pipeline, Workflow, WorkflowBuilder, WorkspaceLocks,
    };
    pub use crate::registry::PipelineRegistry;
    pub use crate::stages::Stage;
    pub use crate::tools::{ProcessToolRunner, ToolRegistry, ToolRunner};
    pub use std::sync::Arc;
}
