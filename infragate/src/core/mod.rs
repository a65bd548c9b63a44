//! Core domain model types for infragate.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Verification checks and stage status enums
//! - Per-stage results and the named output set
//! - Plan artifacts

mod artifact;
mod outputs;
mod result;
mod status;

pub use artifact::{ApplyResult, PlanArtifact, PlanMode};
pub use outputs::{PipelineOutputs, PipelineStatus};
pub use result::StageResult;
pub use status::{Check, StageStatus};
