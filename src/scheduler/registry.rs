use serde::Serialize;
use uuid::Uuid;

use crate::error::{MeanflowError, Result};
use crate::protocol::FileIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
        }
    }
}

/// Worker state tracking
#[derive(Debug, Clone, Serialize)]
pub struct Worker {
    pub hostname: String,
    /// Operations per second measured on the last completed task.
    pub throughput: f64,
    pub status: WorkerStatus,
    pub current_job_id: Option<String>,
    /// Identity of the chunk the worker holds; completions must echo it.
    pub current_task_id: Option<String>,
    pub current_file_indices: Vec<FileIndex>,
}

impl Worker {
    pub fn new(hostname: String) -> Self {
        Self {
            hostname,
            throughput: 0.0,
            status: WorkerStatus::Idle,
            current_job_id: None,
            current_task_id: None,
            current_file_indices: Vec::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    fn reset_assignment(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current_job_id = None;
        self.current_task_id = None;
        self.current_file_indices.clear();
    }
}

/// Work a worker was holding when it left the fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub job_id: String,
    pub file_indices: Vec<FileIndex>,
}

/// All known workers, kept in ascending throughput order.
///
/// A worker whose throughput changes is moved behind every other worker with
/// the same throughput, so ties are ordered by last update. The fleet is tens
/// to low hundreds of nodes, so lookups are linear.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new idle worker with zero throughput.
    pub fn add(&mut self, hostname: &str) -> Result<()> {
        if self.position(hostname).is_some() {
            return Err(MeanflowError::DuplicateWorker(hostname.to_string()));
        }
        self.insert_ordered(Worker::new(hostname.to_string()));
        tracing::info!(hostname, "Worker registered");
        Ok(())
    }

    /// Remove a worker, handing back whatever it was working on.
    pub fn remove(&mut self, hostname: &str) -> Result<Option<Assignment>> {
        let idx = self
            .position(hostname)
            .ok_or_else(|| MeanflowError::UnknownWorker(hostname.to_string()))?;
        let worker = self.workers.remove(idx);
        tracing::info!(hostname, "Worker deregistered");

        Ok(match worker.current_job_id {
            Some(job_id) if !worker.current_file_indices.is_empty() => Some(Assignment {
                job_id,
                file_indices: worker.current_file_indices,
            }),
            _ => None,
        })
    }

    /// Record a finished task: recompute throughput, return the worker to
    /// idle and restore the ordering.
    pub fn record_completion(
        &mut self,
        hostname: &str,
        ops_completed: u64,
        execution_time: f64,
    ) -> Result<()> {
        let idx = self
            .position(hostname)
            .ok_or_else(|| MeanflowError::UnknownWorker(hostname.to_string()))?;
        if !execution_time.is_finite() || execution_time <= 0.0 {
            return Err(MeanflowError::InvalidMeasurement {
                hostname: hostname.to_string(),
                execution_time,
            });
        }

        let mut worker = self.workers.remove(idx);
        worker.throughput = ops_completed as f64 / execution_time;
        worker.reset_assignment();
        tracing::debug!(hostname, throughput = worker.throughput, "Worker throughput updated");
        self.insert_ordered(worker);
        Ok(())
    }

    /// Idle workers in ascending throughput order; the fastest is last.
    pub fn list_idle(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| w.is_idle())
            .map(|w| w.hostname.clone())
            .collect()
    }

    /// Mark a worker busy with an assignment. Returns the task id minted for
    /// it.
    pub fn assign(
        &mut self,
        hostname: &str,
        job_id: &str,
        file_indices: Vec<FileIndex>,
    ) -> Result<String> {
        let worker = self
            .workers
            .iter_mut()
            .find(|w| w.hostname == hostname)
            .ok_or_else(|| MeanflowError::UnknownWorker(hostname.to_string()))?;
        if !worker.is_idle() {
            return Err(MeanflowError::invariant(
                job_id,
                format!("worker {} is already busy", hostname),
            ));
        }
        let task_id = Uuid::new_v4().to_string();
        worker.status = WorkerStatus::Busy;
        worker.current_job_id = Some(job_id.to_string());
        worker.current_task_id = Some(task_id.clone());
        worker.current_file_indices = file_indices;
        Ok(task_id)
    }

    pub fn get(&self, hostname: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.hostname == hostname)
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.position(hostname).is_some()
    }

    /// All workers in ascending throughput order.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn position(&self, hostname: &str) -> Option<usize> {
        self.workers.iter().position(|w| w.hostname == hostname)
    }

    fn insert_ordered(&mut self, worker: Worker) {
        let at = self
            .workers
            .partition_point(|w| w.throughput <= worker.throughput);
        self.workers.insert(at, worker);
    }
}
