use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{MeanflowError, Result};

/// Upper bound on file indices handed to a single aggregate task.
pub const DEFAULT_MAX_INDICES_PER_TASK: usize = 5;

pub const DEFAULT_DATA_DIR: &str = "/data/jobs";

pub const DEFAULT_NOTIFY_URL: &str = "http://127.0.0.1:8000/api/notify_job_completed";

pub const DEFAULT_MAX_FILES_PER_JOB: u64 = 10_000;

pub const DEFAULT_MAX_VALUES_PER_FILE: u64 = 100_000;

/// Dispatch policy knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of file indices per aggregate task. Every worker gets a
    /// chunk of at most this size, independent of its throughput.
    pub max_indices_per_task: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_indices_per_task: DEFAULT_MAX_INDICES_PER_TASK,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_indices_per_task(mut self, max: usize) -> Self {
        self.max_indices_per_task = max;
        self
    }

    /// A chunk of one index produces one new index, so the job would never
    /// shrink.
    pub fn validate(&self) -> Result<()> {
        if self.max_indices_per_task < 2 {
            return Err(MeanflowError::InvalidConfig(format!(
                "max_indices_per_task must be at least 2, got {}",
                self.max_indices_per_task
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity announced to the scheduler; also names the worker's queue.
    pub hostname: String,
    /// Root directory holding `<job_id>/<file_index>.csv` files.
    pub data_dir: PathBuf,
}

impl WorkerConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

/// Largest job `create_job` will generate input files for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    pub max_files_per_job: u64,
    pub max_values_per_file: u64,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_files_per_job: DEFAULT_MAX_FILES_PER_JOB,
            max_values_per_file: DEFAULT_MAX_VALUES_PER_FILE,
        }
    }
}

impl JobLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_files_per_job == 0 || self.max_values_per_file == 0 {
            return Err(MeanflowError::InvalidConfig(format!(
                "job limits must be positive, got {} files of {} values",
                self.max_files_per_job, self.max_values_per_file
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// When set, completions are POSTed here instead of being recorded in the
    /// in-process job store directly.
    pub notify_url: Option<String>,
    pub limits: JobLimits,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            notify_url: None,
            limits: JobLimits::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    /// Number of in-process workers started with the node.
    pub local_workers: usize,
    pub worker_hostname_prefix: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            api: ApiConfig::default(),
            local_workers: 2,
            worker_hostname_prefix: "worker".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.api.listen_addr = addr;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.api.data_dir = data_dir.into();
        self
    }

    pub fn with_local_workers(mut self, count: usize) -> Self {
        self.local_workers = count;
        self
    }

    pub fn with_notify_url(mut self, url: impl Into<String>) -> Self {
        self.api.notify_url = Some(url.into());
        self
    }

    pub fn with_job_limits(mut self, limits: JobLimits) -> Self {
        self.api.limits = limits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.api.limits.validate()?;
        if self.worker_hostname_prefix.is_empty() {
            return Err(MeanflowError::InvalidConfig(
                "worker hostname prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
