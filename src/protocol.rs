//! Messages exchanged between the scheduler and workers.
//!
//! Inbound events are tagged by `message_type`, outbound tasks by
//! `task_type`. Both are closed enums so every handler site is exhaustively
//! matched.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MeanflowError, Result};

/// Queue the scheduler consumes events from.
pub const SCHEDULER_QUEUE: &str = "scheduler_queue";

/// Wire value of [`FileIndex::Final`].
pub const FINAL_RESULT_SENTINEL: i64 = -1;

/// Name of the per-worker task queue.
pub fn worker_queue(hostname: &str) -> String {
    format!("worker_{}_queue", hostname)
}

/// Opaque token naming one input or intermediate file of a job, or the
/// sentinel meaning the averaged result is ready.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileIndex {
    File(String),
    Final,
}

impl FileIndex {
    pub fn file(token: impl Into<String>) -> Self {
        FileIndex::File(token.into())
    }

    pub fn is_final(&self) -> bool {
        matches!(self, FileIndex::Final)
    }
}

impl From<&str> for FileIndex {
    fn from(token: &str) -> Self {
        FileIndex::File(token.to_string())
    }
}

impl fmt::Display for FileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIndex::File(token) => write!(f, "{}", token),
            FileIndex::Final => write!(f, "{}", FINAL_RESULT_SENTINEL),
        }
    }
}

impl Serialize for FileIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FileIndex::File(token) => serializer.serialize_str(token),
            FileIndex::Final => serializer.serialize_i64(FINAL_RESULT_SENTINEL),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFileIndex {
    Text(String),
    Number(i64),
}

impl<'de> Deserialize<'de> for FileIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match RawFileIndex::deserialize(deserializer)? {
            RawFileIndex::Number(FINAL_RESULT_SENTINEL) => FileIndex::Final,
            RawFileIndex::Number(n) => FileIndex::File(n.to_string()),
            RawFileIndex::Text(token) => FileIndex::File(token),
        })
    }
}

/// Scheduler-bound events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    WorkerAdded {
        hostname: String,
    },
    WorkerRemoved {
        hostname: String,
    },
    WorkerCompleted {
        hostname: String,
        job_id: String,
        /// Echo of the task's `task_id`; ties the report to one assignment.
        task_id: String,
        num_ops: u64,
        execution_time: f64,
        output_file_index: FileIndex,
    },
    JobAdded {
        job_id: String,
        num_original_files: u64,
        num_values: u64,
        unprocessed_file_indices: Vec<FileIndex>,
    },
}

impl SchedulerEvent {
    pub const MESSAGE_TYPES: [&'static str; 4] =
        ["worker_added", "worker_removed", "worker_completed", "job_added"];

    /// Decode an event, reporting an unrecognised `message_type` separately
    /// from a malformed body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let message_type = value
            .get("message_type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                MeanflowError::MalformedMessage(serde::de::Error::missing_field("message_type"))
            })?;
        if !Self::MESSAGE_TYPES.contains(&message_type) {
            return Err(MeanflowError::UnknownMessageType(message_type.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            SchedulerEvent::WorkerAdded { .. } => "worker_added",
            SchedulerEvent::WorkerRemoved { .. } => "worker_removed",
            SchedulerEvent::WorkerCompleted { .. } => "worker_completed",
            SchedulerEvent::JobAdded { .. } => "job_added",
        }
    }
}

/// Worker-bound task messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum WorkerTask {
    /// Elementwise sum of up to `max_indices_per_task` files into one new file.
    Aggregate {
        task_id: String,
        job_id: String,
        num_original_files: u64,
        file_indices: Vec<FileIndex>,
    },
    /// Elementwise division of a single file by `num_original_files`.
    Average {
        task_id: String,
        job_id: String,
        num_original_files: u64,
        file_indices: Vec<FileIndex>,
    },
}

impl WorkerTask {
    /// Identity of this assignment, minted by the scheduler when the chunk is
    /// handed out.
    pub fn task_id(&self) -> &str {
        match self {
            WorkerTask::Aggregate { task_id, .. } | WorkerTask::Average { task_id, .. } => task_id,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            WorkerTask::Aggregate { job_id, .. } | WorkerTask::Average { job_id, .. } => job_id,
        }
    }

    pub fn file_indices(&self) -> &[FileIndex] {
        match self {
            WorkerTask::Aggregate { file_indices, .. }
            | WorkerTask::Average { file_indices, .. } => file_indices,
        }
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            WorkerTask::Aggregate { .. } => "aggregate",
            WorkerTask::Average { .. } => "average",
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
