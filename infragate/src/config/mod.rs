//! Invocation parameters and their defaults.

mod invocation;

pub use invocation::{ApprovalSettings, FeatureFlags, PipelineInvocation, TimeoutBudget};
