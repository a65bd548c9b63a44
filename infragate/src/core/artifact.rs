//! Plan artifacts: the reviewed change set that apply/destroy consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Whether a plan creates/updates resources or tears them down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// A normal apply plan.
    Apply,
    /// A destroy plan.
    Destroy,
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// An immutable plan produced by the plan stage.
///
/// The digest is computed once at construction; [`PlanArtifact::verify`]
/// rejects an artifact whose bytes no longer match it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanArtifact {
    /// Artifact ID.
    pub id: Uuid,
    /// Plan mode.
    pub mode: PlanMode,
    /// Working directory the plan was computed in.
    pub working_directory: PathBuf,
    /// Target environment.
    pub environment: String,
    /// Raw plan bytes.
    #[serde(with = "base64_bytes")]
    bytes: Vec<u8>,
    /// Hex-encoded SHA-256 of `bytes`.
    digest: String,
    /// When the plan was produced.
    pub created_at: DateTime<Utc>,
}

impl PlanArtifact {
    /// Creates a new artifact from raw plan bytes.
    #[must_use]
    pub fn new(
        mode: PlanMode,
        working_directory: impl Into<PathBuf>,
        environment: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let digest = sha256_hex(&bytes);
        Self {
            id: Uuid::new_v4(),
            mode,
            working_directory: working_directory.into(),
            environment: environment.into(),
            bytes,
            digest,
            created_at: Utc::now(),
        }
    }

    /// Returns the plan bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the hex-encoded SHA-256 digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns the plan size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if the bytes still hash to the recorded digest.
    #[must_use]
    pub fn verify(&self) -> bool {
        sha256_hex(&self.bytes) == self.digest
    }
}

impl fmt::Debug for PlanArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanArtifact")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("working_directory", &self.working_directory)
            .field("environment", &self.environment)
            .field("len", &self.bytes.len())
            .field("digest", &self.digest)
            .finish()
    }
}

/// Result of applying a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// The artifact that was applied.
    pub artifact_id: Uuid,
    /// Digest of the applied artifact.
    pub digest: String,
    /// Tool output.
    pub detail: String,
    /// When the apply finished.
    pub finished_at: DateTime<Utc>,
}

impl ApplyResult {
    /// Creates an apply result for an artifact.
    #[must_use]
    pub fn for_artifact(artifact: &PlanArtifact, detail: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact.id,
            digest: artifact.digest.clone(),
            detail: detail.into(),
            finished_at: Utc::now(),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
