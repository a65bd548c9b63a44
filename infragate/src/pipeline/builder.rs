//! Workflow builder with validation.

use super::{JobSpec, Workflow};
use crate::errors::WorkflowValidationError;
use std::collections::{HashMap, HashSet};

/// Builder for creating validated workflows.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    /// The workflow name.
    name: String,
    /// The job specifications.
    jobs: HashMap<String, JobSpec>,
    /// Insertion order for jobs.
    job_order: Vec<String>,
}

impl WorkflowBuilder {
    /// Creates a new workflow builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: HashMap::new(),
            job_order: Vec::new(),
        }
    }

    /// Adds a job.
    ///
    /// Dependencies may name jobs added later; they are resolved by
    /// [`WorkflowBuilder::build`].
    ///
    /// # Errors
    ///
    /// Returns an error if the job is invalid on its own or its name is
    /// already taken.
    pub fn job(mut self, spec: JobSpec) -> Result<Self, WorkflowValidationError> {
        self.add_job(spec)?;
        Ok(self)
    }

    /// Adds a job in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is invalid on its own or its name is
    /// already taken.
    pub fn add_job(&mut self, spec: JobSpec) -> Result<(), WorkflowValidationError> {
        spec.validate()?;
        if self.jobs.contains_key(&spec.name) {
            return Err(WorkflowValidationError::new(format!(
                "Job '{}' is defined twice",
                spec.name
            ))
            .with_jobs(vec![spec.name]));
        }
        self.job_order.push(spec.name.clone());
        self.jobs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builds the workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is empty, a dependency names an
    /// unknown job, or the dependencies form a cycle.
    pub fn build(self) -> Result<Workflow, WorkflowValidationError> {
        if self.jobs.is_empty() {
            return Err(WorkflowValidationError::new(format!(
                "Workflow '{}' has no jobs",
                self.name
            )));
        }

        for name in &self.job_order {
            let Some(spec) = self.jobs.get(name) else {
                continue;
            };
            if let Some(dep) = spec.dependencies.iter().find(|d| !self.jobs.contains_key(*d)) {
                return Err(WorkflowValidationError::new(format!(
                    "Job '{name}' depends on unknown job '{dep}'"
                ))
                .with_jobs(vec![name.clone(), dep.clone()]));
            }
        }

        self.detect_cycles()?;

        Ok(Workflow::new(self.name, self.jobs, &self.job_order))
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

    fn detect_cycles(&self) -> Result<(), WorkflowValidationError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.job_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(WorkflowValidationError::cycle(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = self.jobs.get(node) {
            for dep in &spec.dependencies {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}
