use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::gateway::{publish_event, Delivery, MessageGateway};
use crate::protocol::{worker_queue, SchedulerEvent, WorkerTask, SCHEDULER_QUEUE};
use crate::worker::executor::TaskExecutor;

/// Reported when a task finishes faster than the clock can measure; the
/// scheduler rejects non-positive execution times.
pub const MIN_EXECUTION_TIME_SECS: f64 = 1e-6;

/// A worker that consumes tasks from its own queue and reports back to the
/// scheduler.
#[derive(Debug, Clone)]
pub struct WorkerNode {
    config: WorkerConfig,
    executor: TaskExecutor,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig) -> Self {
        let executor = TaskExecutor::new(config.data_dir.clone());
        Self { config, executor }
    }

    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    /// Announce this worker, then process tasks until cancelled.
    ///
    /// On cancellation the worker announces its departure so the scheduler
    /// can hand any unfinished chunk to someone else.
    pub async fn run(
        &self,
        gateway: Arc<dyn MessageGateway>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let hostname = self.hostname().to_string();
        let queue = worker_queue(&hostname);
        gateway.declare_queue(&queue).await?;
        gateway.declare_queue(SCHEDULER_QUEUE).await?;
        publish_event(
            gateway.as_ref(),
            &SchedulerEvent::WorkerAdded {
                hostname: hostname.clone(),
            },
        )
        .await?;
        tracing::info!(hostname = %hostname, "Listening for tasks...");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = gateway.consume(&queue) => delivery?,
            };
            let Some(delivery) = delivery else {
                break;
            };

            if let Err(e) = self.process(gateway.as_ref(), &delivery).await {
                tracing::error!(hostname = %hostname, error = %e, "Task failed");
            }
            gateway.ack(&delivery).await?;
        }

        if let Err(e) = publish_event(
            gateway.as_ref(),
            &SchedulerEvent::WorkerRemoved {
                hostname: hostname.clone(),
            },
        )
        .await
        {
            tracing::warn!(hostname = %hostname, error = %e, "Failed to announce worker removal");
        }
        tracing::info!(hostname = %hostname, "Worker stopped");
        Ok(())
    }

    async fn process(&self, gateway: &dyn MessageGateway, delivery: &Delivery) -> Result<()> {
        let task = match WorkerTask::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(
                    hostname = %self.hostname(),
                    error = %e,
                    "Unknown task type, dropping"
                );
                return Ok(());
            }
        };

        let started = Instant::now();
        let result = self.executor.execute(&task).await?;
        let execution_time = started
            .elapsed()
            .as_secs_f64()
            .max(MIN_EXECUTION_TIME_SECS);

        publish_event(
            gateway,
            &SchedulerEvent::WorkerCompleted {
                hostname: self.hostname().to_string(),
                job_id: result.job_id,
                task_id: task.task_id().to_string(),
                num_ops: result.num_ops,
                execution_time,
                output_file_index: result.output_file_index,
            },
        )
        .await
    }
}
