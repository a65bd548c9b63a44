//! Spawning external tools.

use crate::credentials::Credentials;
use crate::errors::ToolError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// The program to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Plain environment variables.
    pub env: BTreeMap<String, String>,
    /// Secret environment variables.
    pub credentials: Credentials,
}

impl ToolInvocation {
    /// Creates an invocation of `program` in `cwd`.
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            credentials: Credentials::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Sets the credentials injected into the process.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Renders the command line for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished tool produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutcome {
    /// Creates an outcome.
    #[must_use]
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Creates a successful outcome with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Returns true for a zero exit code.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Raw diagnostic text: stderr, then stdout.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim_end();
        let stdout = self.stdout.trim_end();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr.to_string(),
            (true, _) => stdout.to_string(),
        }
    }
}

/// Runs external tools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs the invocation to completion.
    ///
    /// Dropping the returned future kills the child process.
    async fn run(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError>;
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessToolRunner;

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
        let start = Instant::now();
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .envs(invocation.credentials.exposed_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %invocation.command_line(), cwd = %invocation.cwd.display(), "Spawning tool");

        let output = command
            .output()
            .await
            .map_err(|e| ToolError::spawn(&invocation.program, e.to_string()))?;

        let exit_code = output
            .status
            .code()
            .ok_or_else(|| ToolError::terminated(&invocation.program))?;

        tracing::debug!(
            program = %invocation.program,
            exit_code,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Tool finished"
        );

        Ok(ToolOutcome {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let invocation = ToolInvocation::new("terraform", "/work")
            .arg("fmt")
            .args(["-check", "-recursive"])
            .env("AWS_REGION", "eu-west-1");

        assert_eq!(invocation.command_line(), "terraform fmt -check -recursive");
        assert_eq!(invocation.env["AWS_REGION"], "eu-west-1");
    }

    #[test]
    fn test_diagnostic_prefers_stderr_then_stdout() {
        assert_eq!(ToolOutcome::new(1, "out\n", "err\n").diagnostic(), "err\nout");
        assert_eq!(ToolOutcome::new(1, "out", "").diagnostic(), "out");
        assert_eq!(ToolOutcome::new(1, "", "err").diagnostic(), "err");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let invocation = ToolInvocation::new("infragate-definitely-missing-binary", ".");
        let err = ProcessToolRunner.run(invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_mock_runner() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.program == "tflint")
            .returning(|_| Ok(ToolOutcome::ok("{}")));

        let outcome = runner
            .run(ToolInvocation::new("tflint", "."))
            .await
            .unwrap();
        assert!(outcome.success());
    }
}
