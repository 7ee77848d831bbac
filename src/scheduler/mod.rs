//! Scheduling core: who holds which files of which job.
//!
//! - [`WorkerRegistry`]: known workers in ascending throughput order
//! - [`JobTable`]: active jobs in arrival order
//! - [`Dispatcher`]: assigns chunks of work to idle workers, fastest first
//! - [`SchedulerService`]: one handler per inbound event, each followed by a
//!   dispatch pass

pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod registry;
pub mod service;

pub use dispatcher::{Dispatch, Dispatcher, TaskAssignment};
pub use job::{Job, JobPhase};
pub use queue::JobTable;
pub use registry::{Assignment, Worker, WorkerRegistry, WorkerStatus};
pub use service::{SchedulerService, SchedulerSnapshot};
