//! Context management for pipeline execution.
//!
//! A [`PipelineContext`] carries the run identity, the validated invocation,
//! the event sink and the cancellation token. Stages see a [`StageContext`]
//! that tags every event with the stage name.

mod execution;
mod identity;

pub use execution::{ExecutionContext, PipelineContext, StageContext};
pub use identity::RunIdentity;
