use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{MeanflowError, Result};
use crate::notifier::CompletionNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingFilesCreation,
    InputFilesCreated,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::PendingFilesCreation => write!(f, "pending_files_creation"),
            JobStatus::InputFilesCreated => write!(f, "input_files_created"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub num_values: u64,
    pub num_files: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: String, num_values: u64, num_files: u64) -> Self {
        Self {
            job_id,
            num_values,
            num_files,
            status: JobStatus::PendingFilesCreation,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Submitted jobs as seen by API clients.
#[derive(Debug, Default)]
pub struct JobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.records.read().await.get(job_id).cloned()
    }

    /// Get all jobs sorted chronologically by creation time
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        records
    }

    pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| MeanflowError::UnknownJob(job_id.to_string()))?;
        record.status = status;
        if status == JobStatus::Completed {
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Lets a single-process deployment record completions without an HTTP
/// round trip.
#[async_trait]
impl CompletionNotifier for JobStore {
    async fn notify_job_completed(&self, job_id: &str) -> Result<()> {
        self.set_status(job_id, JobStatus::Completed)
            .await
            .map_err(|e| MeanflowError::NotificationDelivery {
                job_id: job_id.to_string(),
                reason: e.to_string(),
            })
    }
}
