//! Caller-supplied pipeline parameters.

use crate::core::Check;
use crate::errors::{PipelineError, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Parameters for a single pipeline run.
///
/// Immutable once constructed. Every optional field has a default, so an
/// empty JSON object is a valid invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInvocation {
    /// Directory containing the Terraform configuration.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    /// Target environment name.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Terraform version to run with.
    #[serde(default = "default_terraform_version")]
    pub terraform_version: String,
    /// Cloud region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Optional-stage switches.
    #[serde(flatten)]
    pub features: FeatureFlags,
    /// Tool name to config file path.
    #[serde(default)]
    pub tool_config_paths: BTreeMap<String, PathBuf>,
    /// Per-stage wall-clock budgets.
    #[serde(default)]
    pub timeouts: TimeoutBudget,
    /// Approval gate settings.
    #[serde(default)]
    pub approval: ApprovalSettings,
    /// The confirmation word typed by the invoker (destroy only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_terraform_version() -> String {
    "1.6.6".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for PipelineInvocation {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            environment: default_environment(),
            terraform_version: default_terraform_version(),
            region: default_region(),
            features: FeatureFlags::default(),
            tool_config_paths: BTreeMap::new(),
            timeouts: TimeoutBudget::default(),
            approval: ApprovalSettings::default(),
            confirmation: None,
        }
    }
}

impl PipelineInvocation {
    /// Creates an invocation with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an invocation from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON and a validation
    /// error for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let invocation: Self = serde_json::from_str(json)?;
        invocation.validate()?;
        Ok(invocation)
    }

    /// Reads, parses and validates an invocation file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`PipelineInvocation::from_json`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the feature flags.
    #[must_use]
    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Adds a tool config path.
    #[must_use]
    pub fn with_tool_config(mut self, tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tool_config_paths.insert(tool.into(), path.into());
        self
    }

    /// Sets the timeout budget.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutBudget) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the approval settings.
    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalSettings) -> Self {
        self.approval = approval;
        self
    }

    /// Sets the confirmation word.
    #[must_use]
    pub fn with_confirmation(mut self, word: impl Into<String>) -> Self {
        self.confirmation = Some(word.into());
        self
    }

    /// Returns the config path registered for a tool, if any.
    #[must_use]
    pub fn tool_config(&self, tool: &str) -> Option<&Path> {
        self.tool_config_paths.get(tool).map(PathBuf::as_path)
    }

    /// Validates the invocation.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(ValidationError::new("working_directory", "must not be empty"));
        }
        if !is_valid_environment(&self.environment) {
            return Err(ValidationError::new(
                "environment",
                format!(
                    "'{}' must be 1-64 characters of letters, digits, '-' or '_'",
                    self.environment
                ),
            ));
        }
        if semver::Version::parse(&self.terraform_version).is_err() {
            return Err(ValidationError::new(
                "terraform_version",
                format!("'{}' is not a semantic version", self.terraform_version),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ValidationError::new("region", "must not be empty"));
        }
        self.timeouts.validate()?;
        self.approval.validate()
    }
}

fn is_valid_environment(environment: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(environment))
}

/// Switches for the optional CI stages.
///
/// Format, validate and test always run and have no switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Run the security scanner.
    #[serde(default = "enabled")]
    pub enable_security_scan: bool,
    /// Run the compliance checker.
    #[serde(default = "enabled")]
    pub enable_compliance: bool,
    /// Run the cost estimator.
    #[serde(default = "enabled")]
    pub enable_cost_estimation: bool,
    /// Run the linter.
    #[serde(default = "enabled")]
    pub enable_lint: bool,
}

fn enabled() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_security_scan: true,
            enable_compliance: true,
            enable_cost_estimation: true,
            enable_lint: true,
        }
    }
}

impl FeatureFlags {
    /// Returns the flag gating a check, or `None` for always-on checks.
    #[must_use]
    pub fn flag_name(check: Check) -> Option<&'static str> {
        match check {
            Check::Lint => Some("enable_lint"),
            Check::Security => Some("enable_security_scan"),
            Check::Compliance => Some("enable_compliance"),
            Check::Cost => Some("enable_cost_estimation"),
            Check::Format | Check::Validate | Check::Test => None,
        }
    }

    /// Returns true if the check should run.
    #[must_use]
    pub fn is_enabled(&self, check: Check) -> bool {
        match check {
            Check::Lint => self.enable_lint,
            Check::Security => self.enable_security_scan,
            Check::Compliance => self.enable_compliance,
            Check::Cost => self.enable_cost_estimation,
            Check::Format | Check::Validate | Check::Test => true,
        }
    }
}

/// Wall-clock budgets for the gated pipeline stages, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutBudget {
    /// Plan budget.
    #[serde(default = "default_plan_seconds")]
    pub plan_seconds: u64,
    /// Apply budget.
    #[serde(default = "default_apply_seconds")]
    pub apply_seconds: u64,
    /// Destroy budget.
    #[serde(default = "default_destroy_seconds")]
    pub destroy_seconds: u64,
    /// How long an approval gate waits.
    #[serde(default = "default_approval_seconds")]
    pub approval_seconds: u64,
}

fn default_plan_seconds() -> u64 {
    30 * 60
}

fn default_apply_seconds() -> u64 {
    60 * 60
}

fn default_destroy_seconds() -> u64 {
    60 * 60
}

fn default_approval_seconds() -> u64 {
    24 * 60 * 60
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            plan_seconds: default_plan_seconds(),
            apply_seconds: default_apply_seconds(),
            destroy_seconds: default_destroy_seconds(),
            approval_seconds: default_approval_seconds(),
        }
    }
}

impl TimeoutBudget {
    /// Largest accepted budget for any stage or gate.
    pub const MAX_SECONDS: u64 = 30 * 24 * 60 * 60;

    /// Plan budget as a duration.
    #[must_use]
    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_seconds)
    }

    /// Apply budget as a duration.
    #[must_use]
    pub fn apply(&self) -> Duration {
        Duration::from_secs(self.apply_seconds)
    }

    /// Destroy budget as a duration.
    #[must_use]
    pub fn destroy(&self) -> Duration {
        Duration::from_secs(self.destroy_seconds)
    }

    /// Approval wait as a duration.
    #[must_use]
    pub fn approval(&self) -> Duration {
        Duration::from_secs(self.approval_seconds)
    }

    /// Rejects zero budgets and budgets above [`TimeoutBudget::MAX_SECONDS`].
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("timeouts.plan_seconds", self.plan_seconds),
            ("timeouts.apply_seconds", self.apply_seconds),
            ("timeouts.destroy_seconds", self.destroy_seconds),
            ("timeouts.approval_seconds", self.approval_seconds),
        ] {
            if value == 0 {
                return Err(ValidationError::new(field, "must be greater than zero"));
            }
            if value > Self::MAX_SECONDS {
                return Err(ValidationError::new(
                    field,
                    format!("must be at most {} (30 days)", Self::MAX_SECONDS),
                ));
            }
        }
        Ok(())
    }
}

/// How many approvals a gate needs and what destroy must be confirmed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    /// Distinct approvals each gate needs.
    #[serde(default = "default_required_approvals")]
    pub required_approvals: usize,
    /// The word a destroy invocation must be confirmed with.
    #[serde(default = "default_expected_confirmation")]
    pub expected_confirmation: String,
}

fn default_required_approvals() -> usize {
    1
}

fn default_expected_confirmation() -> String {
    "DESTROY".to_string()
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            required_approvals: default_required_approvals(),
            expected_confirmation: default_expected_confirmation(),
        }
    }
}

impl ApprovalSettings {
    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero approval count or a blank expected word.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.required_approvals == 0 {
            return Err(ValidationError::new(
                "approval.required_approvals",
                "must be at least 1",
            ));
        }
        if self.expected_confirmation.trim().is_empty() {
            return Err(ValidationError::new(
                "approval.expected_confirmation",
                "must not be blank",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_json_uses_defaults() {
        let invocation = PipelineInvocation::from_json("{}").unwrap();
        assert_eq!(invocation, PipelineInvocation::default());
        assert_eq!(invocation.working_directory, PathBuf::from("."));
        assert!(invocation.features.enable_lint);
        assert_eq!(invocation.timeouts.plan(), Duration::from_secs(1800));
    }

    #[test]
    fn test_flat_feature_flags() {
        let invocation = PipelineInvocation::from_json(
            r#"{"environment": "prod", "enable_cost_estimation": false}"#,
        )
        .unwrap();

        assert_eq!(invocation.environment, "prod");
        assert!(!invocation.features.enable_cost_estimation);
        assert!(invocation.features.enable_security_scan);
        assert!(!invocation.features.is_enabled(Check::Cost));
        assert!(invocation.features.is_enabled(Check::Format));
    }

    #[test]
    fn test_partial_timeouts() {
        let invocation =
            PipelineInvocation::from_json(r#"{"timeouts": {"apply_seconds": 120}}"#).unwrap();
        assert_eq!(invocation.timeouts.apply(), Duration::from_secs(120));
        assert_eq!(invocation.timeouts.destroy(), Duration::from_secs(3600));
    }

    #[test]
    fn test_tool_config_paths() {
        let invocation = PipelineInvocation::from_json(
            r#"{"tool_config_paths": {"tflint": ".tflint.hcl"}}"#,
        )
        .unwrap();
        assert_eq!(invocation.tool_config("tflint"), Some(Path::new(".tflint.hcl")));
        assert_eq!(invocation.tool_config("tfsec"), None);
    }

    #[test]
    fn test_invalid_environment() {
        let err = PipelineInvocation::new()
            .with_environment("prod env")
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "environment");
    }

    #[test]
    fn test_invalid_terraform_version() {
        let err = PipelineInvocation::from_json(r#"{"terraform_version": "latest"}"#).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = PipelineInvocation::new()
            .with_timeouts(TimeoutBudget {
                apply_seconds: 0,
                ..TimeoutBudget::default()
            })
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "timeouts.apply_seconds");
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        for approval_seconds in [u64::MAX, TimeoutBudget::MAX_SECONDS + 1] {
            let err = PipelineInvocation::new()
                .with_timeouts(TimeoutBudget {
                    approval_seconds,
                    ..TimeoutBudget::default()
                })
                .validate()
                .unwrap_err();
            assert_eq!(err.field, "timeouts.approval_seconds");
        }

        let at_limit = TimeoutBudget {
            approval_seconds: TimeoutBudget::MAX_SECONDS,
            ..TimeoutBudget::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineInvocation::from_json("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Serialization);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"region": "eu-west-1", "enable_lint": false}}"#).unwrap();

        let invocation = PipelineInvocation::from_file(file.path()).unwrap();
        assert_eq!(invocation.region, "eu-west-1");
        assert!(!invocation.features.enable_lint);
    }

    #[test]
    fn test_approval_settings() {
        let invocation = PipelineInvocation::from_json(
            r#"{"approval": {"required_approvals": 2}, "confirmation": "DESTROY"}"#,
        )
        .unwrap();
        assert_eq!(invocation.approval.required_approvals, 2);
        assert_eq!(invocation.approval.expected_confirmation, "DESTROY");
        assert_eq!(invocation.confirmation.as_deref(), Some("DESTROY"));

        let err = PipelineInvocation::from_json(r#"{"approval": {"required_approvals": 0}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(FeatureFlags::flag_name(Check::Cost), Some("enable_cost_estimation"));
        assert_eq!(FeatureFlags::flag_name(Check::Validate), None);
    }
}
