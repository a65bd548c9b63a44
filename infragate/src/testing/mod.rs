//! Testing utilities for infragate pipelines.
//!
//! This module provides:
//! - In-memory executor and scripted tool runner
//! - Context fixtures and preloaded approval brokers
//! - Assertions over pipeline outputs

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_pipeline_failed_with, assert_pipeline_succeeded, assert_stage_absent,
    assert_stage_order, assert_stage_status,
};
pub use fixtures::{decide_next_gate, preloaded_gates, TestContext};
pub use mocks::{ExecutorCall, RecordingExecutor, ScriptedToolRunner};
