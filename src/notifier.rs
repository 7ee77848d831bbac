use async_trait::async_trait;
use serde::Serialize;

use crate::error::{MeanflowError, Result};

/// Receives a signal once a job's averaged result is ready.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify_job_completed(&self, job_id: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobCompletedRequest<'a> {
    job_id: &'a str,
}

/// POSTs `{"jobId": ...}` to the job API.
#[derive(Debug, Clone)]
pub struct HttpCompletionNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpCompletionNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionNotifier for HttpCompletionNotifier {
    async fn notify_job_completed(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&JobCompletedRequest { job_id })
            .send()
            .await
            .map_err(|e| MeanflowError::NotificationDelivery {
                job_id: job_id.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeanflowError::NotificationDelivery {
                job_id: job_id.to_string(),
                reason: format!("endpoint returned {}", status),
            });
        }
        Ok(())
    }
}
