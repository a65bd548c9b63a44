//! External tool execution.
//!
//! This module provides:
//! - The [`ToolRunner`] seam and its process-backed implementation
//! - Tool definitions for every verification check
//! - Summaries extracted from structured tool output

mod definitions;
mod runner;
mod summary;

pub use definitions::{ConfigFlag, OutputFormat, ToolDefinition, ToolRegistry};
#[cfg(test)]
pub use runner::MockToolRunner;
pub use runner::{ProcessToolRunner, ToolInvocation, ToolOutcome, ToolRunner};
pub use summary::{summarize, SummaryError};
