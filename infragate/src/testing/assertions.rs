//! Test assertions for pipeline outputs.

use crate::core::{PipelineOutputs, StageStatus};
use crate::errors::ErrorKind;

/// Asserts that the pipeline succeeded.
pub fn assert_pipeline_succeeded(outputs: &PipelineOutputs) {
    assert!(
        outputs.success(),
        "Expected success, got {:?}: {:?}",
        outputs.error_kind,
        outputs.error
    );
}

/// Asserts that the pipeline failed with the given kind.
pub fn assert_pipeline_failed_with(outputs: &PipelineOutputs, kind: ErrorKind) {
    assert!(!outputs.success(), "Expected failure, pipeline succeeded");
    assert_eq!(
        outputs.error_kind,
        Some(kind),
        "Expected error kind {kind}, got {:?} ({:?})",
        outputs.error_kind,
        outputs.error
    );
}

/// Asserts a stage's status.
pub fn assert_stage_status(outputs: &PipelineOutputs, stage: &str, expected: StageStatus) {
    let actual = outputs.status_of(stage);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts that a stage produced no result at all.
pub fn assert_stage_absent(outputs: &PipelineOutputs, stage: &str) {
    assert!(
        outputs.get(stage).is_none(),
        "Expected no result for '{stage}', got {:?}",
        outputs.get(stage)
    );
}

/// Asserts the exact order of recorded stages.
pub fn assert_stage_order(outputs: &PipelineOutputs, expected: &[&str]) {
    let actual: Vec<&str> = outputs
        .results
        .iter()
        .map(|r| r.stage_name.as_str())
        .collect();
    assert_eq!(actual, expected, "Unexpected stage order");
}
