//! The command each verification check runs.

use super::ToolInvocation;
use crate::config::PipelineInvocation;
use crate::core::Check;
use crate::credentials::Credentials;
use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a tool reports results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Free-form text; only the exit code matters.
    Text,
    /// A JSON document on stdout.
    Json,
}

/// The flag a tool takes for its config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFlag {
    /// Key in `tool_config_paths`.
    pub tool: String,
    /// The flag preceding the path.
    pub flag: String,
    /// Consecutive arguments the config file stands in for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

/// Definition of the command behind a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The check this tool implements.
    pub check: Check,
    /// The program to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Output format.
    pub output: OutputFormat,
    /// Arguments of a preparatory run of the same program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_args: Option<Vec<String>>,
    /// Config file flag, if the tool takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigFlag>,
}

impl ToolDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new<I, S>(check: Check, program: impl Into<String>, args: I, output: OutputFormat) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            check,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output,
            setup_args: None,
            config: None,
        }
    }

    /// Sets the preparatory run.
    #[must_use]
    pub fn with_setup<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setup_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the config file flag.
    #[must_use]
    pub fn with_config_flag(mut self, tool: impl Into<String>, flag: impl Into<String>) -> Self {
        self.config = Some(ConfigFlag {
            tool: tool.into(),
            flag: flag.into(),
            replaces: Vec::new(),
        });
        self
    }

    /// Drops `args` from the command whenever a config file is passed.
    ///
    /// Has no effect without a config flag.
    #[must_use]
    pub fn replaced_by_config<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(config) = self.config.as_mut() {
            config.replaces = args.into_iter().map(Into::into).collect();
        }
        self
    }

    fn base(&self, invocation: &PipelineInvocation, credentials: &Credentials) -> ToolInvocation {
        ToolInvocation::new(&self.program, &invocation.working_directory)
            .env("AWS_REGION", &invocation.region)
            .env("AWS_DEFAULT_REGION", &invocation.region)
            .env("TF_IN_AUTOMATION", "1")
            .with_credentials(credentials.clone())
    }

    /// Builds the main command for an invocation.
    #[must_use]
    pub fn invocation(
        &self,
        invocation: &PipelineInvocation,
        credentials: &Credentials,
    ) -> ToolInvocation {
        let config = self.config.as_ref().and_then(|config| {
            invocation
                .tool_config(&config.tool)
                .map(|path| (config, path))
        });

        let Some((config, path)) = config else {
            return self.base(invocation, credentials).args(self.args.iter().cloned());
        };
        self.base(invocation, credentials)
            .args(without(&self.args, &config.replaces))
            .arg(config.flag.clone())
            .arg(path.to_string_lossy().into_owned())
    }

    /// Builds the preparatory command, if any.
    #[must_use]
    pub fn setup_invocation(
        &self,
        invocation: &PipelineInvocation,
        credentials: &Credentials,
    ) -> Option<ToolInvocation> {
        self.setup_args
            .as_ref()
            .map(|args| self.base(invocation, credentials).args(args.iter().cloned()))
    }
}

/// Returns `args` with the first run of `removed` taken out.
fn without(args: &[String], removed: &[String]) -> Vec<String> {
    if removed.is_empty() {
        return args.to_vec();
    }
    match args.windows(removed.len()).position(|w| w == removed) {
        Some(at) => args[..at]
            .iter()
            .chain(&args[at + removed.len()..])
            .cloned()
            .collect(),
        None => args.to_vec(),
    }
}

/// The tool behind every check.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    definitions: BTreeMap<Check, ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        let definitions = [
            ToolDefinition::new(
                Check::Format,
                "terraform",
                ["fmt", "-check", "-recursive", "-diff"],
                OutputFormat::Text,
            ),
            ToolDefinition::new(Check::Validate, "terraform", ["validate", "-json"], OutputFormat::Json)
                .with_setup(["init", "-backend=false", "-input=false"]),
            ToolDefinition::new(Check::Lint, "tflint", ["--format=json"], OutputFormat::Json)
                .with_config_flag("tflint", "--config"),
            ToolDefinition::new(Check::Test, "terraform", ["test"], OutputFormat::Text),
            ToolDefinition::new(Check::Security, "tfsec", [".", "--format=json"], OutputFormat::Json)
                .with_config_flag("tfsec", "--config-file"),
            ToolDefinition::new(
                Check::Compliance,
                "checkov",
                ["-d", ".", "--output", "json", "--quiet"],
                OutputFormat::Json,
            )
            .with_config_flag("checkov", "--config-file"),
            ToolDefinition::new(
                Check::Cost,
                "infracost",
                ["breakdown", "--path", ".", "--format", "json"],
                OutputFormat::Json,
            )
            .with_config_flag("infracost", "--config-file")
            .replaced_by_config(["--path", "."]),
        ];

        Self {
            definitions: definitions.into_iter().map(|d| (d.check, d)).collect(),
        }
    }
}

impl ToolRegistry {
    /// Creates a registry with the default tool for every check.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            definitions: BTreeMap::new(),
        }
    }

    /// Replaces the tool for a check.
    #[must_use]
    pub fn with_definition(mut self, definition: ToolDefinition) -> Self {
        self.register(definition);
        self
    }

    /// Registers or replaces the tool for a check.
    pub fn register(&mut self, definition: ToolDefinition) {
        self.definitions.insert(definition.check, definition);
    }

    /// Gets the tool for a check.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotRegistered`] if nothing is registered.
    pub fn get(&self, check: Check) -> Result<&ToolDefinition, ToolError> {
        self.definitions
            .get(&check)
            .ok_or_else(|| ToolError::NotRegistered {
                check: check.as_str().to_string(),
            })
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_registry_covers_every_check() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.len(), Check::ALL.len());
        for check in Check::ALL {
            assert!(registry.get(check).is_ok());
        }
    }

    #[test]
    fn test_format_command() {
        let registry = ToolRegistry::new();
        let cmd = registry
            .get(Check::Format)
            .unwrap()
            .invocation(&PipelineInvocation::new(), &Credentials::new());

        assert_eq!(cmd.command_line(), "terraform fmt -check -recursive -diff");
        assert_eq!(cmd.env["AWS_REGION"], "us-east-1");
        assert_eq!(cmd.env["AWS_DEFAULT_REGION"], "us-east-1");
    }

    #[test]
    fn test_validate_has_init_setup() {
        let registry = ToolRegistry::new();
        let setup = registry
            .get(Check::Validate)
            .unwrap()
            .setup_invocation(&PipelineInvocation::new(), &Credentials::new())
            .unwrap();
        assert_eq!(setup.command_line(), "terraform init -backend=false -input=false");
    }

    #[test]
    fn test_config_path_appended() {
        let invocation = PipelineInvocation::new().with_tool_config("tflint", "ci/.tflint.hcl");
        let registry = ToolRegistry::new();

        let cmd = registry
            .get(Check::Lint)
            .unwrap()
            .invocation(&invocation, &Credentials::new());
        assert_eq!(cmd.command_line(), "tflint --format=json --config ci/.tflint.hcl");

        let cmd = registry
            .get(Check::Security)
            .unwrap()
            .invocation(&invocation, &Credentials::new());
        assert_eq!(cmd.command_line(), "tfsec . --format=json");
    }

    #[test]
    fn test_infracost_config_file_replaces_path() {
        let registry = ToolRegistry::new();
        let cost = registry.get(Check::Cost).unwrap();

        let plain = cost.invocation(&PipelineInvocation::new(), &Credentials::new());
        assert_eq!(plain.command_line(), "infracost breakdown --path . --format json");

        let configured = PipelineInvocation::new().with_tool_config("infracost", "infracost.yml");
        let cmd = cost.invocation(&configured, &Credentials::new());
        assert_eq!(
            cmd.command_line(),
            "infracost breakdown --format json --config-file infracost.yml"
        );
    }

    #[test]
    fn test_override_and_missing() {
        let registry = ToolRegistry::empty().with_definition(ToolDefinition::new(
            Check::Test,
            "terratest",
            ["run"],
            OutputFormat::Text,
        ));

        assert_eq!(registry.get(Check::Test).unwrap().program, "terratest");
        assert!(matches!(
            registry.get(Check::Cost),
            Err(ToolError::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_credentials_passed_through() {
        let creds = Credentials::new().with_var("AWS_SESSION_TOKEN", "tok");
        let cmd = ToolRegistry::new()
            .get(Check::Cost)
            .unwrap()
            .invocation(&PipelineInvocation::new(), &creds);
        assert_eq!(cmd.credentials.names(), vec!["AWS_SESSION_TOKEN"]);
    }
}
