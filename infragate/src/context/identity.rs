//! Run identity for tracking pipeline invocations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies a pipeline run and what triggered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: Uuid,

    /// Who or what triggered the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// The branch the run was triggered on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// The triggering event (`push`, `pull_request`, `manual`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Commit being built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            actor: None,
            branch: None,
            event: None,
            commit: None,
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the triggering event.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Sets the commit.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Converts to a dictionary with string values (or null).
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let opt = |v: &Option<String>| {
            v.as_ref()
                .map_or(serde_json::Value::Null, |s| serde_json::json!(s))
        };

        let mut map = HashMap::new();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("actor".to_string(), opt(&self.actor));
        map.insert("branch".to_string(), opt(&self.branch));
        map.insert("event".to_string(), opt(&self.event));
        map.insert("commit".to_string(), opt(&self.commit));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_identity_new() {
        let a = RunIdentity::new();
        let b = RunIdentity::new();
        assert_ne!(a.run_id, b.run_id);
        assert!(a.branch.is_none());
    }

    #[test]
    fn test_run_identity_builder() {
        let identity = RunIdentity::new()
            .with_actor("ci-bot")
            .with_branch("main")
            .with_event("push");

        assert_eq!(identity.actor.as_deref(), Some("ci-bot"));
        assert_eq!(identity.branch.as_deref(), Some("main"));
        assert_eq!(identity.event.as_deref(), Some("push"));
    }

    #[test]
    fn test_run_identity_to_dict() {
        let dict = RunIdentity::new().with_branch("main").to_dict();

        assert!(!dict["run_id"].is_null());
        assert_eq!(dict["branch"], serde_json::json!("main"));
        assert!(dict["commit"].is_null());
    }
}
