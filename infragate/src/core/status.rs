//! Stage status and verification check enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A verification check run by the CI pipeline.
///
/// The declaration order is the fixed execution and reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Formatting check.
    Format,
    /// Configuration validation.
    Validate,
    /// Linting.
    Lint,
    /// Module tests.
    Test,
    /// Security scan.
    Security,
    /// Policy compliance check.
    Compliance,
    /// Cost estimation.
    Cost,
}

impl Check {
    /// All checks, in execution order.
    pub const ALL: [Self; 7] = [
        Self::Format,
        Self::Validate,
        Self::Lint,
        Self::Test,
        Self::Security,
        Self::Compliance,
        Self::Cost,
    ];

    /// Returns the stage name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Validate => "validate",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Security => "security",
            Self::Compliance => "compliance",
            Self::Cost => "cost",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage ran and succeeded.
    Pass,
    /// Stage ran and failed.
    Fail,
    /// Stage was disabled or not reached.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage actually ran.
    #[must_use]
    pub fn was_executed(&self) -> bool {
        !matches!(self, Self::Skipped)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}
