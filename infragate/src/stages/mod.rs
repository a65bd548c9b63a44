//! Stage trait and implementations.
//!
//! Stages are the units the CI pipeline runs in order. Each stage yields
//! exactly one [`StageResult`]; a stage never aborts the pipeline itself.

mod check;

pub use check::CheckStage;

use crate::context::StageContext;
use crate::core::StageResult;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The stage result: pass, fail or skipped.
    async fn execute(&self, ctx: &StageContext) -> StageResult;
}
