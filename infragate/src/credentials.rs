//! Short-lived cloud credentials for tool invocations.
//!
//! Secret values are wrapped in [`SecretString`], which never prints its
//! contents. They only leave the wrapper when injected into a child
//! process environment.

use crate::errors::{PipelineError, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// A string whose value is hidden from `Debug` and `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Environment variables to inject into tool processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    vars: BTreeMap<String, SecretString>,
    /// When the credentials stop being valid.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Creates an empty credential set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), SecretString::new(value));
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the variable names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }

    /// Returns true if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns true if the credentials have expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Returns `(name, value)` pairs with the secrets exposed.
    pub fn exposed_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.expose()))
    }
}

/// Yields credentials for an environment.
///
/// The production implementation exchanges a workload identity token for
/// short-lived cloud credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns credentials scoped to `environment`.
    async fn credentials(&self, environment: &str) -> Result<Credentials, PipelineError>;

    /// Returns credentials for `environment`, refusing expired ones.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or a validation error naming the
    /// expiry time.
    async fn fresh_credentials(&self, environment: &str) -> Result<Credentials, PipelineError> {
        let credentials = self.credentials(environment).await?;
        match credentials.expires_at {
            Some(at) if credentials.is_expired() => Err(ValidationError::new(
                "credentials",
                format!("credentials for '{environment}' expired at {}", at.to_rfc3339()),
            )
            .into()),
            _ => Ok(credentials),
        }
    }
}

/// Returns the same credentials for every environment.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    /// Creates a provider returning `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Creates a provider returning no credentials.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self, _environment: &str) -> Result<Credentials, PipelineError> {
        Ok(self.credentials.clone())
    }
}

/// Passes named variables through from the current process environment.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    names: Vec<String>,
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new([
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_SESSION_TOKEN",
            "AWS_ROLE_ARN",
            "AWS_WEB_IDENTITY_TOKEN_FILE",
        ])
    }
}

impl EnvCredentialProvider {
    /// Creates a provider for the given variable names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credentials(&self, environment: &str) -> Result<Credentials, PipelineError> {
        let mut credentials = Credentials::new();
        for name in &self.names {
            if let Ok(value) = std::env::var(name) {
                credentials = credentials.with_var(name.clone(), value);
            }
        }
        tracing::debug!(
            environment = %environment,
            vars = ?credentials.names(),
            "Loaded credentials from process environment"
        );
        Ok(credentials)
    }
}
