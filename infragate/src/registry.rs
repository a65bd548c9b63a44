//! Versioned registry of pipeline definitions.
//!
//! Definitions are registered under a name and a semantic version. Callers
//! resolve references such as `deploy@v1`, `deploy@1.2.0` or
//! `deploy@>=1.1, <2` to the highest compatible registration.

use crate::errors::RegistryError;
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A registered pipeline definition.
#[derive(Clone)]
pub struct RegisteredPipeline {
    /// Registration name.
    pub name: String,
    /// Registration version.
    pub version: Version,
    /// The pipeline.
    pub pipeline: Arc<dyn Pipeline>,
    /// Optional description.
    pub description: Option<String>,
    /// When it was registered.
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for RegisteredPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPipeline")
            .field("name", &self.name)
            .field("version", &self.version.to_string())
            .field("pipeline", &self.pipeline.name())
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A parsed `name[@version]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRef {
    /// Pipeline name.
    pub name: String,
    /// Version requirement; `None` means the latest.
    pub requirement: Option<VersionReq>,
}

impl PipelineRef {
    /// Parses a reference.
    ///
    /// `name@vMAJOR` (or `vMAJOR.MINOR`) means any compatible version with
    /// that prefix, `name@1.2.3` means exactly that version, anything else
    /// after `@` is read as a semver requirement.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidReference`] for an empty name or an
    /// unparseable version.
    pub fn parse(reference: &str) -> Result<Self, RegistryError> {
        let (name, version) = match reference.split_once('@') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (reference.trim(), None),
        };
        if name.is_empty() {
            return Err(RegistryError::invalid(reference, "missing pipeline name"));
        }

        let requirement = match version {
            None => None,
            Some("") => return Err(RegistryError::invalid(reference, "empty version")),
            Some(v) => Some(parse_requirement(v).map_err(|e| RegistryError::invalid(reference, e))?),
        };

        Ok(Self {
            name: name.to_string(),
            requirement,
        })
    }
}

fn parse_requirement(raw: &str) -> Result<VersionReq, String> {
    if let Some(prefix) = raw.strip_prefix('v') {
        // `v1` / `v1.2`: a caret requirement on the given prefix.
        return VersionReq::parse(&format!("^{prefix}")).map_err(|e| e.to_string());
    }
    if let Ok(exact) = Version::parse(raw) {
        return VersionReq::parse(&format!("={exact}")).map_err(|e| e.to_string());
    }
    VersionReq::parse(raw).map_err(|e| e.to_string())
}

/// In-memory registry of pipeline definitions.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    entries: RwLock<HashMap<String, BTreeMap<Version, RegisteredPipeline>>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline under `name@version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the version does not parse or the pair is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        version: &str,
        pipeline: Arc<dyn Pipeline>,
        description: Option<String>,
    ) -> Result<RegisteredPipeline, RegistryError> {
        let name = name.into();
        let version = Version::parse(version.trim_start_matches('v'))
            .map_err(|e| RegistryError::invalid(format!("{name}@{version}"), e.to_string()))?;

        let mut entries = self.entries.write();
        let versions = entries.entry(name.clone()).or_default();
        if versions.contains_key(&version) {
            return Err(RegistryError::Duplicate {
                name,
                version: version.to_string(),
            });
        }

        let registered = RegisteredPipeline {
            name: name.clone(),
            version: version.clone(),
            pipeline,
            description,
            registered_at: Utc::now(),
        };
        versions.insert(version.clone(), registered.clone());
        tracing::debug!(pipeline = %name, version = %version, "Pipeline registered");
        Ok(registered)
    }

    /// Resolves a reference to the highest matching registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed, the name is unknown,
    /// or no registered version satisfies it.
    pub fn resolve(&self, reference: &str) -> Result<RegisteredPipeline, RegistryError> {
        let parsed = PipelineRef::parse(reference)?;
        let entries = self.entries.read();
        let versions = entries
            .get(&parsed.name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RegistryError::UnknownPipeline {
                name: parsed.name.clone(),
            })?;

        let found = match &parsed.requirement {
            None => versions.values().next_back(),
            Some(req) => versions
                .iter()
                .rev()
                .find(|(version, _)| req.matches(version))
                .map(|(_, registered)| registered),
        };

        found.cloned().ok_or_else(|| RegistryError::NoMatchingVersion {
            name: parsed.name.clone(),
            requirement: parsed
                .requirement
                .as_ref()
                .map_or_else(|| "*".to_string(), ToString::to_string),
            available: versions
                .keys()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Returns the registered versions of `name`, lowest first.
    #[must_use]
    pub fn versions(&self, name: &str) -> Vec<Version> {
        self.entries
            .read()
            .get(name)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every registration, sorted by name then version.
    #[must_use]
    pub fn list(&self) -> Vec<RegisteredPipeline> {
        let entries = self.entries.read();
        let mut result: Vec<_> = entries
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect();
        result.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        result
    }

    /// Removes all registrations.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
