//! Worker side of the reduction.
//!
//! - **Execution**: [`TaskExecutor`] sums or divides CSV data files
//! - **Runner**: [`WorkerNode`] announces itself, consumes its task queue and
//!   reports each completion with the measured execution time
//! - **Pool**: [`WorkerPool`] runs several workers inside one process
//!
//! # Execution Flow
//!
//! 1. Worker declares `worker_<hostname>_queue` and sends `worker_added`
//! 2. Each task is executed by [`TaskExecutor::execute`]
//! 3. Worker sends `worker_completed` with `num_ops` and wall-clock time
//! 4. On shutdown the worker sends `worker_removed`

pub mod executor;
pub mod pool;
pub mod runner;

pub use executor::{ExecutionResult, TaskExecutor};
pub use pool::WorkerPool;
pub use runner::WorkerNode;
