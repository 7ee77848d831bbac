use std::collections::HashMap;

use crate::error::{MeanflowError, Result};
use crate::scheduler::job::Job;

/// Active jobs keyed by id, iterated in arrival order.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<String, Job>,
    order: Vec<String>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job. The first job added is considered first on every
    /// dispatch pass.
    pub fn add(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(&job.job_id) {
            return Err(MeanflowError::DuplicateJob(job.job_id));
        }
        self.order.push(job.job_id.clone());
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    /// Get a job by ID
    pub fn get(&self, job_id: &str) -> Result<&Job> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| MeanflowError::UnknownJob(job_id.to_string()))
    }

    /// Get a mutable reference to a job by ID
    pub fn get_mut(&mut self, job_id: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| MeanflowError::UnknownJob(job_id.to_string()))
    }

    pub fn remove(&mut self, job_id: &str) -> Option<Job> {
        let job = self.jobs.remove(job_id)?;
        self.order.retain(|id| id != job_id);
        Some(job)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Job ids in insertion order.
    pub fn job_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter_in_order(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    /// Returns the current number of jobs in the table
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the table is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
