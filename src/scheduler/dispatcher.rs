use crate::error::Result;
use crate::protocol::WorkerTask;
use crate::scheduler::job::JobPhase;
use crate::scheduler::queue::JobTable;
use crate::scheduler::registry::WorkerRegistry;

/// A task bound for one worker's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignment {
    pub hostname: String,
    pub task: WorkerTask,
}

/// Everything one dispatch pass decided.
#[derive(Debug, Default, PartialEq)]
pub struct Dispatch {
    pub assignments: Vec<TaskAssignment>,
    /// Jobs found finished and removed from the table.
    pub completed_jobs: Vec<String>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.completed_jobs.is_empty()
    }
}

/// Hands out work to idle workers, fastest first.
///
/// Each pass is recomputed from the registry and job table alone. Every
/// aggregate chunk is capped at `max_indices_per_task` regardless of the
/// worker's throughput; faster workers are only preferred in pick order.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_indices_per_task: usize,
}

impl Dispatcher {
    pub fn new(max_indices_per_task: usize) -> Self {
        Self {
            max_indices_per_task,
        }
    }

    pub fn max_indices_per_task(&self) -> usize {
        self.max_indices_per_task
    }

    /// Run one dispatch pass.
    ///
    /// Jobs are visited in arrival order until idle workers run out. A job
    /// holding only the final-result sentinel is reported in
    /// [`Dispatch::completed_jobs`] and removed once the pass is over; it does
    /// not consume a worker. A single leftover index next to in-flight chunks
    /// is left for a later pass, when it can be merged or averaged.
    pub fn delegate_tasks(
        &self,
        registry: &mut WorkerRegistry,
        jobs: &mut JobTable,
    ) -> Result<Dispatch> {
        let mut idle = registry.list_idle();
        let mut dispatch = Dispatch::default();

        tracing::debug!(idle_workers = idle.len(), jobs = jobs.len(), "Dispatch pass");

        if jobs.is_empty() {
            return Ok(dispatch);
        }

        for job_id in jobs.job_ids() {
            if idle.is_empty() {
                break;
            }
            let job = jobs.get_mut(&job_id)?;

            match job.phase()? {
                JobPhase::InFlight | JobPhase::AwaitingPeers => {}
                JobPhase::Finished => {
                    tracing::info!(job_id = %job_id, "Job finished");
                    dispatch.completed_jobs.push(job_id.clone());
                }
                JobPhase::AwaitingAverage => {
                    if let Some(hostname) = idle.pop() {
                        let file_indices = job.take_chunk(&hostname, 1)?;
                        let task_id = registry.assign(&hostname, &job_id, file_indices.clone())?;
                        dispatch.assignments.push(TaskAssignment {
                            hostname,
                            task: WorkerTask::Average {
                                task_id,
                                job_id: job_id.clone(),
                                num_original_files: job.num_original_files,
                                file_indices,
                            },
                        });
                    }
                }
                JobPhase::Reducible => {
                    while job.unprocessed_file_indices.len() > 1 {
                        let Some(hostname) = idle.pop() else {
                            break;
                        };
                        let file_indices = job.take_chunk(&hostname, self.max_indices_per_task)?;
                        let task_id = registry.assign(&hostname, &job_id, file_indices.clone())?;
                        dispatch.assignments.push(TaskAssignment {
                            hostname,
                            task: WorkerTask::Aggregate {
                                task_id,
                                job_id: job_id.clone(),
                                num_original_files: job.num_original_files,
                                file_indices,
                            },
                        });
                    }
                }
            }
        }

        for job_id in &dispatch.completed_jobs {
            jobs.remove(job_id);
        }

        for assignment in &dispatch.assignments {
            tracing::info!(
                job_id = %assignment.task.job_id(),
                hostname = %assignment.hostname,
                task_id = %assignment.task.task_id(),
                task_type = assignment.task.task_type(),
                files = assignment.task.file_indices().len(),
                "Task scheduled"
            );
        }

        Ok(dispatch)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_INDICES_PER_TASK)
    }
}
