//! Routes approval events from external actors to open gates.

use super::{ApprovalEvent, ApprovalGate, ApprovalPolicy, GateState};
use crate::cancellation::CancellationToken;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct GateEntry {
    environment: String,
    sender: mpsc::UnboundedSender<ApprovalEvent>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    gates: DashMap<Uuid, GateEntry>,
    /// Events for environments with no open gate. `None` disables buffering.
    backlog: Mutex<Option<HashMap<String, VecDeque<ApprovalEvent>>>>,
}

/// Roughly 30 years; used when a timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Registry of open gates.
///
/// Cheap to clone; clones share the same gate table.
#[derive(Debug, Clone, Default)]
pub struct ApprovalBroker {
    inner: Arc<BrokerInner>,
}

impl ApprovalBroker {
    /// Creates a broker that drops events with no matching gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker that holds environment-addressed events until a gate
    /// for that environment opens.
    ///
    /// Events left over after a gate decides are returned to the backlog, so
    /// a single stream of decisions can feed consecutive gates. Use one
    /// buffering broker per run.
    #[must_use]
    pub fn buffering() -> Self {
        let broker = Self::default();
        *broker.inner.backlog.lock() = Some(HashMap::new());
        broker
    }

    /// Registers a gate and returns the subscription it waits on.
    #[must_use]
    pub fn open(&self, gate: &ApprovalGate) -> GateSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let deadline = deadline_after(gate.timeout);

        let mut backlog = self.inner.backlog.lock();
        if let Some(queue) = backlog
            .as_mut()
            .and_then(|b| b.get_mut(&gate.environment))
        {
            for event in queue.drain(..) {
                let _ = sender.send(event);
            }
        }
        self.inner.gates.insert(
            gate.id,
            GateEntry {
                environment: gate.environment.clone(),
                sender,
            },
        );
        drop(backlog);

        tracing::debug!(gate_id = %gate.id, environment = %gate.environment, "Gate registered");

        GateSubscription {
            gate_id: gate.id,
            environment: gate.environment.clone(),
            receiver,
            deadline,
            broker: Arc::clone(&self.inner),
            leftover: Vec::new(),
        }
    }

    /// Delivers an event to a gate by ID.
    ///
    /// Returns false if no such gate is open.
    pub fn submit_to_gate(&self, gate_id: Uuid, event: ApprovalEvent) -> bool {
        self.inner
            .gates
            .get(&gate_id)
            .is_some_and(|entry| entry.sender.send(event).is_ok())
    }

    /// Delivers an event to every open gate for an environment.
    ///
    /// Returns the number of gates reached. On a buffering broker an event
    /// that reaches no gate is queued instead.
    pub fn submit_for_environment(&self, environment: &str, event: ApprovalEvent) -> usize {
        let mut backlog = self.inner.backlog.lock();
        let delivered = self
            .inner
            .gates
            .iter()
            .filter(|entry| entry.environment == environment)
            .filter(|entry| entry.sender.send(event.clone()).is_ok())
            .count();

        if delivered == 0 {
            if let Some(backlog) = backlog.as_mut() {
                backlog
                    .entry(environment.to_string())
                    .or_default()
                    .push_back(event);
            }
        }
        delivered
    }

    /// Routes an event by its own `gate_id` or `environment`.
    ///
    /// Returns the number of gates reached.
    pub fn submit(&self, event: ApprovalEvent) -> usize {
        if let Some(gate_id) = event.gate_id {
            usize::from(self.submit_to_gate(gate_id, event))
        } else if let Some(environment) = event.environment.clone() {
            self.submit_for_environment(&environment, event)
        } else {
            tracing::warn!(reviewer = %event.reviewer, "Approval event has no gate or environment");
            0
        }
    }

    /// Returns the open gates as `(id, environment)` pairs.
    #[must_use]
    pub fn open_gates(&self) -> Vec<(Uuid, String)> {
        self.inner
            .gates
            .iter()
            .map(|entry| (*entry.key(), entry.environment.clone()))
            .collect()
    }

    /// Returns the number of open gates.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.gates.len()
    }

    /// Returns the number of buffered events for an environment.
    #[must_use]
    pub fn backlog_len(&self, environment: &str) -> usize {
        self.inner
            .backlog
            .lock()
            .as_ref()
            .and_then(|b| b.get(environment))
            .map_or(0, VecDeque::len)
    }
}

/// A gate's event stream. Deregisters the gate when dropped.
#[derive(Debug)]
pub struct GateSubscription {
    gate_id: Uuid,
    environment: String,
    receiver: mpsc::UnboundedReceiver<ApprovalEvent>,
    deadline: Instant,
    broker: Arc<BrokerInner>,
    leftover: Vec<ApprovalEvent>,
}

impl GateSubscription {
    /// Returns the gate ID.
    #[must_use]
    pub fn gate_id(&self) -> Uuid {
        self.gate_id
    }

    /// Suspends until the gate reaches a terminal state.
    ///
    /// Wakes on incoming events, the gate deadline or cancellation. Every
    /// event already queued when the task wakes is recorded as one batch.
    pub async fn wait(
        &mut self,
        gate: &mut ApprovalGate,
        policy: &dyn ApprovalPolicy,
        cancel: &CancellationToken,
    ) -> GateState {
        while !gate.state().is_terminal() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    gate.cancel();
                }
                received = self.receiver.recv() => match received {
                    Some(first) => {
                        let mut batch = vec![first];
                        while let Ok(event) = self.receiver.try_recv() {
                            batch.push(event);
                        }
                        let leftover = gate.record_batch(batch, policy);
                        self.leftover.extend(leftover);
                    }
                    None => {
                        gate.cancel();
                    }
                },
                () = tokio::time::sleep_until(self.deadline) => {
                    gate.expire();
                }
            }
        }
        gate.state()
    }
}

impl Drop for GateSubscription {
    fn drop(&mut self) {
        let mut backlog = self.broker.backlog.lock();
        self.broker.gates.remove(&self.gate_id);
        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            self.leftover.push(event);
        }
        if let Some(backlog) = backlog.as_mut() {
            if !self.leftover.is_empty() {
                let queue = backlog.entry(self.environment.clone()).or_default();
                for event in self.leftover.drain(..).rev() {
                    queue.push_front(event);
                }
            }
        }
        tracing::debug!(gate_id = %self.gate_id, "Gate deregistered");
    }
}
