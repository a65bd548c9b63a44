//! The approval gate state machine.
//!
//! A gate is pure state: it never waits or sleeps. The broker feeds it
//! batches of events and tells it when the deadline passed or the run was
//! cancelled.

use super::{ApprovalEvent, ApprovalPolicy, Decision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The state of an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Waiting for decisions.
    Pending,
    /// Enough distinct approvals arrived.
    Approved,
    /// An eligible reviewer rejected.
    Rejected,
    /// The deadline passed first.
    TimedOut,
    /// The pipeline was cancelled while waiting.
    Cancelled,
}

impl GateState {
    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for every state except `Pending`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event did not count toward a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredReason {
    /// The reviewer is excluded from this gate.
    Excluded,
    /// The policy does not allow the reviewer for this environment.
    Ineligible,
    /// The reviewer already approved.
    Duplicate,
}

impl IgnoredReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Excluded => "excluded",
            Self::Ineligible => "ineligible",
            Self::Duplicate => "duplicate",
        }
    }
}

/// A human approval checkpoint for one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    /// Gate ID.
    pub id: Uuid,
    /// The environment being approved.
    pub environment: String,
    /// Distinct approvals needed.
    pub required_approvals: usize,
    /// Reviewers whose decisions do not count.
    pub excluded_reviewers: BTreeSet<String>,
    state: GateState,
    approvers: Vec<String>,
    rejected_by: Option<String>,
    /// When the gate opened.
    pub opened_at: DateTime<Utc>,
    /// How long the gate waits.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ApprovalGate {
    /// Opens a pending gate. The timeout clock starts now.
    #[must_use]
    pub fn new(environment: impl Into<String>, required_approvals: usize, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            required_approvals: required_approvals.max(1),
            excluded_reviewers: BTreeSet::new(),
            state: GateState::Pending,
            approvers: Vec::new(),
            rejected_by: None,
            opened_at: Utc::now(),
            timeout,
        }
    }

    /// Excludes reviewers from this gate.
    #[must_use]
    pub fn with_excluded_reviewers<I, S>(mut self, reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_reviewers
            .extend(reviewers.into_iter().map(Into::into));
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Returns the counted approvers, in arrival order.
    #[must_use]
    pub fn approvers(&self) -> &[String] {
        &self.approvers
    }

    /// Returns the reviewer who rejected, if any.
    #[must_use]
    pub fn rejected_by(&self) -> Option<&str> {
        self.rejected_by.as_deref()
    }

    /// Returns the wall-clock deadline.
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| self.opened_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn check_reviewer(&self, reviewer: &str, policy: &dyn ApprovalPolicy) -> Option<IgnoredReason> {
        if self.excluded_reviewers.contains(reviewer) {
            Some(IgnoredReason::Excluded)
        } else if !policy.is_eligible(&self.environment, reviewer) {
            Some(IgnoredReason::Ineligible)
        } else {
            None
        }
    }

    /// Records a single event.
    pub fn record(&mut self, event: ApprovalEvent, policy: &dyn ApprovalPolicy) -> GateState {
        self.record_batch(vec![event], policy);
        self.state
    }

    /// Records a batch of events that arrived together.
    ///
    /// Any counting rejection in the batch wins over approvals in the same
    /// batch. Approvals are counted in order until the gate approves; the
    /// events after that point are returned unconsumed.
    pub fn record_batch(
        &mut self,
        events: Vec<ApprovalEvent>,
        policy: &dyn ApprovalPolicy,
    ) -> Vec<ApprovalEvent> {
        if self.state.is_terminal() {
            return events;
        }

        let rejection = events.iter().find(|e| {
            e.decision == Decision::Reject && self.counts(e, policy)
        });
        if let Some(event) = rejection {
            tracing::info!(
                gate_id = %self.id,
                environment = %self.environment,
                reviewer = %event.reviewer,
                "Gate rejected"
            );
            self.rejected_by = Some(event.reviewer.clone());
            self.state = GateState::Rejected;
            return Vec::new();
        }

        let mut events = events.into_iter();
        for event in events.by_ref() {
            if !event.is_approval() || !self.counts(&event, policy) {
                continue;
            }
            self.approvers.push(event.reviewer);
            if self.approvers.len() >= self.required_approvals {
                tracing::info!(
                    gate_id = %self.id,
                    environment = %self.environment,
                    approvers = ?self.approvers,
                    "Gate approved"
                );
                self.state = GateState::Approved;
                break;
            }
        }
        events.collect()
    }

    fn counts(&self, event: &ApprovalEvent, policy: &dyn ApprovalPolicy) -> bool {
        let reason = self.check_reviewer(&event.reviewer, policy).or_else(|| {
            (event.is_approval() && self.approvers.contains(&event.reviewer))
                .then_some(IgnoredReason::Duplicate)
        });
        match reason {
            Some(reason) => {
                tracing::warn!(
                    gate_id = %self.id,
                    reviewer = %event.reviewer,
                    decision = %event.decision,
                    reason = reason.as_str(),
                    "Ignoring approval event"
                );
                false
            }
            None => true,
        }
    }

    /// Marks a pending gate as timed out.
    pub fn expire(&mut self) -> GateState {
        if self.state == GateState::Pending {
            tracing::warn!(gate_id = %self.id, environment = %self.environment, "Gate timed out");
            self.state = GateState::TimedOut;
        }
        self.state
    }

    /// Marks a pending gate as cancelled.
    pub fn cancel(&mut self) -> GateState {
        if self.state == GateState::Pending {
            self.state = GateState::Cancelled;
        }
        self.state
    }

    /// Converts to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("gate_id".to_string(), serde_json::json!(self.id.to_string()));
        map.insert("environment".to_string(), serde_json::json!(&self.environment));
        map.insert("state".to_string(), serde_json::json!(self.state.as_str()));
        map.insert("required_approvals".to_string(), serde_json::json!(self.required_approvals));
        map.insert("approvers".to_string(), serde_json::json!(&self.approvers));
        map.insert(
            "excluded_reviewers".to_string(),
            serde_json::json!(&self.excluded_reviewers),
        );
        map.insert(
            "rejected_by".to_string(),
            serde_json::json!(self.rejected_by),
        );
        map.insert("opened_at".to_string(), serde_json::json!(self.opened_at.to_rfc3339()));
        map.insert("deadline".to_string(), serde_json::json!(self.deadline().to_rfc3339()));
        map
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{AllowAnyReviewer, StaticApprovalPolicy};
    use pretty_assertions::assert_eq;

    fn gate(required: usize) -> ApprovalGate {
        ApprovalGate::new("prod", required, Duration::from_secs(60))
    }

    #[test]
    fn test_single_approval() {
        let mut gate = gate(1);
        assert_eq!(gate.state(), GateState::Pending);

        let state = gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);

        assert_eq!(state, GateState::Approved);
        assert_eq!(gate.approvers(), ["alice".to_string()]);
    }

    #[test]
    fn test_duplicate_approvals_do_not_count() {
        let mut gate = gate(2);
        gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);
        gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);
        assert_eq!(gate.state(), GateState::Pending);
        assert_eq!(gate.approvers().len(), 1);

        gate.record(ApprovalEvent::approve("bob"), &AllowAnyReviewer);
        assert_eq!(gate.state(), GateState::Approved);
    }

    #[test]
    fn test_rejection_wins_in_same_batch() {
        let mut gate = gate(1);
        let leftover = gate.record_batch(
            vec![ApprovalEvent::approve("alice"), ApprovalEvent::reject("bob")],
            &AllowAnyReviewer,
        );

        assert_eq!(gate.state(), GateState::Rejected);
        assert_eq!(gate.rejected_by(), Some("bob"));
        assert!(gate.approvers().is_empty());
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_leftover_events_after_approval() {
        let mut gate = gate(1);
        let leftover = gate.record_batch(
            vec![ApprovalEvent::approve("alice"), ApprovalEvent::approve("bob")],
            &AllowAnyReviewer,
        );

        assert_eq!(gate.state(), GateState::Approved);
        assert_eq!(leftover.len(), 1);
        assert_eq!(leftover[0].reviewer, "bob");
    }

    #[test]
    fn test_excluded_reviewer_ignored() {
        let mut gate = gate(1).with_excluded_reviewers(["alice"]);

        gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);
        assert_eq!(gate.state(), GateState::Pending);

        gate.record(ApprovalEvent::reject("alice"), &AllowAnyReviewer);
        assert_eq!(gate.state(), GateState::Pending);
    }

    #[test]
    fn test_ineligible_reviewer_ignored() {
        let policy = StaticApprovalPolicy::new().with_reviewers("prod", ["alice"]);
        let mut gate = gate(1);

        gate.record(ApprovalEvent::approve("mallory"), &policy);
        assert_eq!(gate.state(), GateState::Pending);

        gate.record(ApprovalEvent::approve("alice"), &policy);
        assert_eq!(gate.state(), GateState::Approved);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut gate = gate(1);
        gate.expire();
        assert_eq!(gate.state(), GateState::TimedOut);

        gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);
        gate.cancel();
        assert_eq!(gate.state(), GateState::TimedOut);
        assert!(gate.approvers().is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut gate = gate(1);
        assert_eq!(gate.cancel(), GateState::Cancelled);
        assert_eq!(gate.expire(), GateState::Cancelled);
    }

    #[test]
    fn test_to_dict() {
        let mut gate = gate(1);
        gate.record(ApprovalEvent::approve("alice"), &AllowAnyReviewer);
        let dict = gate.to_dict();

        assert_eq!(dict["state"], "approved");
        assert_eq!(dict["approvers"], serde_json::json!(["alice"]));
        assert!(dict["rejected_by"].is_null());
    }

    #[test]
    fn test_deadline() {
        let gate = gate(1);
        assert_eq!(gate.deadline() - gate.opened_at, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_deadline_saturates_for_huge_timeouts() {
        for secs in [u64::MAX, 100_000_000_000_000] {
            let gate = ApprovalGate::new("prod", 1, Duration::from_secs(secs));
            assert_eq!(gate.deadline(), DateTime::<Utc>::MAX_UTC);
        }
    }
}
