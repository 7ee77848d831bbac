use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::error::{MeanflowError, Result};
use crate::protocol::FileIndex;

/// Where a job stands, as seen by one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Nothing left to hand out; all remaining work is with workers.
    InFlight,
    /// The averaged result is ready.
    Finished,
    /// One reduced file left and nobody working: ready for the average task.
    AwaitingAverage,
    /// One file left but other chunks are still being reduced.
    AwaitingPeers,
    /// More than one file left to aggregate.
    Reducible,
}

/// A reduction job and the work currently handed out for it.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    /// Divisor for the final average.
    pub num_original_files: u64,
    pub num_values: u64,
    pub unprocessed_file_indices: VecDeque<FileIndex>,
    /// Worker hostname -> file indices it is currently reducing.
    pub wip_distribution: BTreeMap<String, Vec<FileIndex>>,
}

impl Job {
    pub fn new(
        job_id: String,
        num_original_files: u64,
        num_values: u64,
        file_indices: Vec<FileIndex>,
    ) -> Result<Self> {
        if file_indices.is_empty() {
            return Err(MeanflowError::InvalidJob {
                job_id,
                reason: "job has no input files".to_string(),
            });
        }
        if file_indices.iter().any(FileIndex::is_final) {
            return Err(MeanflowError::InvalidJob {
                job_id,
                reason: "input files must not contain the final-result sentinel".to_string(),
            });
        }
        if num_original_files == 0 {
            return Err(MeanflowError::InvalidJob {
                job_id,
                reason: "num_original_files must be positive".to_string(),
            });
        }

        Ok(Self {
            job_id,
            num_original_files,
            num_values,
            unprocessed_file_indices: file_indices.into(),
            wip_distribution: BTreeMap::new(),
        })
    }

    /// Classify the job, failing if its bookkeeping is inconsistent.
    pub fn phase(&self) -> Result<JobPhase> {
        let unprocessed = &self.unprocessed_file_indices;
        let has_wip = !self.wip_distribution.is_empty();

        if unprocessed.is_empty() {
            if !has_wip {
                return Err(self.violation("no unprocessed files and no work in flight"));
            }
            return Ok(JobPhase::InFlight);
        }

        if unprocessed.iter().any(FileIndex::is_final) {
            if unprocessed.len() != 1 {
                return Err(self.violation("final-result sentinel mixed with other files"));
            }
            if has_wip {
                return Err(self.violation("final result reported while work is in flight"));
            }
            return Ok(JobPhase::Finished);
        }

        Ok(match (unprocessed.len(), has_wip) {
            (1, false) => JobPhase::AwaitingAverage,
            (1, true) => JobPhase::AwaitingPeers,
            _ => JobPhase::Reducible,
        })
    }

    /// Move up to `max` indices from the front of the queue to `hostname`.
    pub fn take_chunk(&mut self, hostname: &str, max: usize) -> Result<Vec<FileIndex>> {
        if self.wip_distribution.contains_key(hostname) {
            return Err(self.violation(format!("worker {} already holds a chunk", hostname)));
        }
        let count = max.min(self.unprocessed_file_indices.len());
        let chunk: Vec<FileIndex> = self.unprocessed_file_indices.drain(..count).collect();
        self.wip_distribution
            .insert(hostname.to_string(), chunk.clone());
        Ok(chunk)
    }

    /// Put a departed worker's chunk back at the end of the queue. Returns
    /// the number of indices restored.
    pub fn requeue(&mut self, hostname: &str) -> Result<usize> {
        let chunk = self
            .wip_distribution
            .remove(hostname)
            .ok_or_else(|| self.violation(format!("worker {} holds no chunk", hostname)))?;
        let restored = chunk.len();
        self.unprocessed_file_indices.extend(chunk);
        Ok(restored)
    }

    /// Replace a worker's chunk with the file it produced.
    pub fn complete_chunk(&mut self, hostname: &str, output: FileIndex) -> Result<()> {
        if !self.wip_distribution.contains_key(hostname) {
            return Err(self.violation(format!("worker {} holds no chunk", hostname)));
        }
        if output.is_final()
            && (!self.unprocessed_file_indices.is_empty() || self.wip_distribution.len() > 1)
        {
            return Err(self.violation("final result reported while other work remains"));
        }
        self.wip_distribution.remove(hostname);
        self.unprocessed_file_indices.push_back(output);
        Ok(())
    }

    pub fn is_assigned_to(&self, hostname: &str) -> bool {
        self.wip_distribution.contains_key(hostname)
    }

    /// Unprocessed indices plus everything in flight.
    pub fn outstanding(&self) -> usize {
        self.unprocessed_file_indices.len()
            + self.wip_distribution.values().map(Vec::len).sum::<usize>()
    }

    fn violation(&self, reason: impl Into<String>) -> MeanflowError {
        MeanflowError::invariant(self.job_id.clone(), reason)
    }
}
