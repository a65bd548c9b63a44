//! Workflow execution.
//!
//! Jobs run one at a time in dependency order. A job runs only when every
//! dependency succeeded and its condition holds; otherwise it is skipped.

use super::{JobSpec, TriggerContext};
use crate::cancellation::CancellationToken;
use crate::context::{PipelineContext, RunIdentity};
use crate::core::PipelineOutputs;
use crate::events::{EventSink, NoOpEventSink};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The pipeline ran and succeeded.
    Succeeded,
    /// The pipeline ran and failed.
    Failed,
    /// The job did not run.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// The outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job name.
    pub name: String,
    /// How it ended.
    pub status: JobStatus,
    /// Why it was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The pipeline's outputs when it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<PipelineOutputs>,
}

/// Result of running a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Workflow name.
    pub workflow: String,
    /// Job outcomes in execution order.
    pub jobs: Vec<JobOutcome>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl WorkflowRun {
    /// Gets a job's outcome.
    #[must_use]
    pub fn get(&self, job: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.name == job)
    }

    /// Gets a job's status.
    #[must_use]
    pub fn status_of(&self, job: &str) -> Option<JobStatus> {
        self.get(job).map(|j| j.status)
    }

    /// Returns true if no job failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|j| j.status != JobStatus::Failed)
    }
}

/// A validated workflow, built by [`super::WorkflowBuilder`].
pub struct Workflow {
    name: String,
    jobs: HashMap<String, JobSpec>,
    execution_order: Vec<String>,
    event_sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl Workflow {
    pub(crate) fn new(name: String, jobs: HashMap<String, JobSpec>, job_order: &[String]) -> Self {
        let execution_order = topological_sort(&jobs, job_order);
        Self {
            name,
            jobs,
            execution_order,
            event_sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the sink every job's events go to.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares a cancellation token with every job.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Runs every job in order for one trigger.
    ///
    /// Each job gets its own run ID; actor, branch, event and commit are
    /// taken from `identity`.
    pub async fn run(&self, identity: &RunIdentity) -> WorkflowRun {
        let start = Instant::now();
        let trigger = TriggerContext::from(identity);
        let mut succeeded: HashSet<&str> = HashSet::new();
        let mut outcomes = Vec::with_capacity(self.execution_order.len());

        tracing::info!(workflow = %self.name, jobs = self.jobs.len(), "Workflow started");

        for name in &self.execution_order {
            let Some(job) = self.jobs.get(name) else {
                continue;
            };

            if let Some(reason) = self.skip_reason(job, &trigger, &succeeded) {
                tracing::info!(workflow = %self.name, job = %name, reason = %reason, "Job skipped");
                self.event_sink.try_emit(
                    "job.skipped",
                    Some(serde_json::json!({"job": name, "reason": reason})),
                );
                outcomes.push(JobOutcome {
                    name: name.clone(),
                    status: JobStatus::Skipped,
                    reason: Some(reason),
                    outputs: None,
                });
                continue;
            }

            let job_identity = RunIdentity {
                run_id: uuid::Uuid::new_v4(),
                ..identity.clone()
            };
            let ctx = Arc::new(
                PipelineContext::new(job.pipeline.name(), job.invocation.clone())
                    .with_identity(job_identity)
                    .with_event_sink(Arc::clone(&self.event_sink))
                    .with_cancellation(Arc::clone(&self.cancel)),
            );
            let outputs = job.pipeline.run(ctx).await;
            let status = if outputs.success() {
                succeeded.insert(name.as_str());
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            tracing::info!(workflow = %self.name, job = %name, status = %status, "Job finished");
            outcomes.push(JobOutcome {
                name: name.clone(),
                status,
                reason: None,
                outputs: Some(outputs),
            });
        }

        WorkflowRun {
            workflow: self.name.clone(),
            jobs: outcomes,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn skip_reason(
        &self,
        job: &JobSpec,
        trigger: &TriggerContext,
        succeeded: &HashSet<&str>,
    ) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("workflow cancelled".to_string());
        }
        let unmet: Vec<&str> = job
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|dep| !succeeded.contains(dep))
            .collect();
        if !unmet.is_empty() {
            return Some(format!("dependencies did not succeed: {}", unmet.join(", ")));
        }
        if !job.condition.evaluate(trigger, true) {
            return Some("condition is false".to_string());
        }
        None
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("execution_order", &self.execution_order)
            .finish_non_exhaustive()
    }
}

/// Orders jobs so every job follows its dependencies.
fn topological_sort(jobs: &HashMap<String, JobSpec>, job_order: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    fn visit(
        node: &str,
        jobs: &HashMap<String, JobSpec>,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }

        temp_visited.insert(node.to_string());

        if let Some(spec) = jobs.get(node) {
            for dep in &spec.dependencies {
                visit(dep, jobs, visited, temp_visited, result);
            }
        }

        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());
    }

    // Insertion order keeps independent jobs deterministic.
    for name in job_order {
        visit(name, jobs, &mut visited, &mut temp_visited, &mut result);
    }

    result
}
