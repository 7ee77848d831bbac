use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{MeanflowError, Result};
use crate::gateway::{publish_task, MessageGateway};
use crate::notifier::CompletionNotifier;
use crate::protocol::{worker_queue, FileIndex, SchedulerEvent, SCHEDULER_QUEUE};
use crate::scheduler::dispatcher::{Dispatch, Dispatcher};
use crate::scheduler::job::Job;
use crate::scheduler::queue::JobTable;
use crate::scheduler::registry::{Worker, WorkerRegistry};

/// Point-in-time copy of the scheduler state for observers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerSnapshot {
    pub workers: Vec<Worker>,
    pub jobs: Vec<Job>,
}

/// Sole owner of the worker registry and job table.
///
/// Events are handled one at a time, each to completion, including the
/// dispatch pass it triggers. A handler that fails leaves the state as it was,
/// except for invariant violations, which are fatal.
pub struct SchedulerService {
    registry: WorkerRegistry,
    jobs: JobTable,
    dispatcher: Dispatcher,
    gateway: Arc<dyn MessageGateway>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl SchedulerService {
    pub fn new(
        config: &SchedulerConfig,
        gateway: Arc<dyn MessageGateway>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: WorkerRegistry::new(),
            jobs: JobTable::new(),
            dispatcher: Dispatcher::new(config.max_indices_per_task),
            gateway,
            notifier,
        })
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            workers: self.registry.workers().to_vec(),
            jobs: self.jobs.iter_in_order().cloned().collect(),
        }
    }

    /// Decode and handle a raw event. Unknown message types are logged and
    /// dropped.
    pub async fn handle_delivery(&mut self, body: &[u8]) -> Result<()> {
        match SchedulerEvent::from_slice(body) {
            Ok(event) => self.handle(event).await,
            Err(MeanflowError::UnknownMessageType(message_type)) => {
                tracing::error!(message_type = %message_type, "Unknown message type, dropping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn handle(&mut self, event: SchedulerEvent) -> Result<()> {
        match event {
            SchedulerEvent::WorkerAdded { hostname } => self.handle_worker_added(&hostname).await,
            SchedulerEvent::WorkerRemoved { hostname } => {
                self.handle_worker_removed(&hostname).await
            }
            SchedulerEvent::WorkerCompleted {
                hostname,
                job_id,
                task_id,
                num_ops,
                execution_time,
                output_file_index,
            } => {
                self.handle_worker_completed(
                    &hostname,
                    &job_id,
                    &task_id,
                    num_ops,
                    execution_time,
                    output_file_index,
                )
                .await
            }
            SchedulerEvent::JobAdded {
                job_id,
                num_original_files,
                num_values,
                unprocessed_file_indices,
            } => {
                let job = Job::new(job_id, num_original_files, num_values, unprocessed_file_indices)?;
                self.handle_job_added(job).await
            }
        }
    }

    pub async fn handle_worker_added(&mut self, hostname: &str) -> Result<()> {
        self.registry.add(hostname)?;
        tracing::info!(hostname, "Worker added");

        if let Err(e) = self.gateway.declare_queue(&worker_queue(hostname)).await {
            tracing::warn!(hostname, error = %e, "Failed to declare worker queue");
        }

        self.delegate_tasks().await
    }

    /// Forget a worker and put whatever it held back on its job's queue.
    pub async fn handle_worker_removed(&mut self, hostname: &str) -> Result<()> {
        let worker = self
            .registry
            .get(hostname)
            .ok_or_else(|| MeanflowError::UnknownWorker(hostname.to_string()))?;
        if let Some(job_id) = &worker.current_job_id {
            if !self.jobs.contains(job_id) {
                return Err(MeanflowError::invariant(
                    job_id.clone(),
                    format!("worker {} holds work for a job that no longer exists", hostname),
                ));
            }
        }

        if let Some(assignment) = self.registry.remove(hostname)? {
            let job = self.jobs.get_mut(&assignment.job_id)?;
            let restored = job.requeue(hostname)?;
            tracing::info!(
                hostname,
                job_id = %assignment.job_id,
                restored,
                "Worker removed, in-flight files requeued"
            );
        } else {
            tracing::info!(hostname, "Worker removed");
        }

        self.delegate_tasks().await
    }

    pub async fn handle_worker_completed(
        &mut self,
        hostname: &str,
        job_id: &str,
        task_id: &str,
        num_ops: u64,
        execution_time: f64,
        output_file_index: FileIndex,
    ) -> Result<()> {
        let worker = self
            .registry
            .get(hostname)
            .ok_or_else(|| MeanflowError::UnknownWorker(hostname.to_string()))?;
        let job = self.jobs.get(job_id)?;

        // A redelivered completion names a chunk the worker no longer holds,
        // even when it has since been handed another chunk of the same job.
        if worker.current_task_id.as_deref() != Some(task_id)
            || worker.current_job_id.as_deref() != Some(job_id)
            || !job.is_assigned_to(hostname)
        {
            tracing::warn!(
                hostname,
                job_id,
                task_id,
                output_file_index = %output_file_index,
                "Completion does not match an outstanding assignment, ignoring"
            );
            return Ok(());
        }

        self.registry
            .record_completion(hostname, num_ops, execution_time)?;
        self.jobs
            .get_mut(job_id)?
            .complete_chunk(hostname, output_file_index.clone())?;
        tracing::info!(
            hostname,
            job_id,
            task_id,
            num_ops,
            execution_time,
            output_file_index = %output_file_index,
            "Worker completed task"
        );

        self.delegate_tasks().await
    }

    pub async fn handle_job_added(&mut self, job: Job) -> Result<()> {
        let job_id = job.job_id.clone();
        let files = job.unprocessed_file_indices.len();
        self.jobs.add(job)?;
        tracing::info!(job_id = %job_id, files, "Job added");

        self.delegate_tasks().await
    }

    /// Notify the completion endpoint. Failures are logged; the job is gone
    /// from the table either way.
    pub async fn handle_job_completed(&self, job_id: &str) {
        match self.notifier.notify_job_completed(job_id).await {
            Ok(()) => tracing::info!(job_id, "Job completion notification sent"),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to send job completion notification")
            }
        }
    }

    /// Run a dispatch pass and carry out its decisions.
    pub async fn delegate_tasks(&mut self) -> Result<()> {
        let Dispatch {
            assignments,
            completed_jobs,
        } = self
            .dispatcher
            .delegate_tasks(&mut self.registry, &mut self.jobs)?;

        for assignment in &assignments {
            if let Err(e) =
                publish_task(self.gateway.as_ref(), &assignment.hostname, &assignment.task).await
            {
                tracing::error!(
                    hostname = %assignment.hostname,
                    job_id = %assignment.task.job_id(),
                    error = %e,
                    "Failed to publish task"
                );
            }
        }

        for job_id in &completed_jobs {
            self.handle_job_completed(job_id).await;
        }
        Ok(())
    }

    /// Consume the scheduler queue until cancelled or the gateway closes.
    ///
    /// Each delivery is acknowledged once its handler has finished. Rejected
    /// events are logged and acknowledged; an invariant violation stops the
    /// loop with the delivery left unacknowledged.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        snapshots: watch::Sender<SchedulerSnapshot>,
    ) -> Result<()> {
        let gateway = self.gateway.clone();
        gateway.declare_queue(SCHEDULER_QUEUE).await?;
        tracing::info!(
            max_indices_per_task = self.dispatcher.max_indices_per_task(),
            "Listening for messages..."
        );

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = gateway.consume(SCHEDULER_QUEUE) => delivery?,
            };
            let Some(delivery) = delivery else {
                break;
            };

            match self.handle_delivery(&delivery.body).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        error = %e,
                        delivery_tag = delivery.delivery_tag,
                        "Scheduler bookkeeping is inconsistent, stopping"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delivery_tag = delivery.delivery_tag,
                        "Event rejected"
                    );
                }
            }

            gateway.ack(&delivery).await?;
            snapshots.send_replace(self.snapshot());
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}
