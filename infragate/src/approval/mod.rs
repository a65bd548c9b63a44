//! Human approval gates.
//!
//! An [`ApprovalGate`] is a pure state machine over reviewer decisions. The
//! [`ApprovalBroker`] registers open gates so external actors can address
//! them by gate ID or by environment, and drives the event-driven wait.

mod broker;
mod event;
mod gate;
mod policy;

pub use broker::{ApprovalBroker, GateSubscription};
pub use event::{ApprovalEvent, Decision};
pub use gate::{ApprovalGate, GateState, IgnoredReason};
pub use policy::{AllowAnyReviewer, ApprovalPolicy, StaticApprovalPolicy};
