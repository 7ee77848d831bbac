use std::path::PathBuf;

use uuid::Uuid;

use crate::error::{MeanflowError, Result};
use crate::protocol::{FileIndex, WorkerTask};

/// Name of the file holding a job's averaged result.
pub const OUTPUT_FILE_NAME: &str = "output_file";

/// Result of task execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub job_id: String,
    pub num_ops: u64,
    pub output_file_index: FileIndex,
}

/// Executes aggregate and average tasks against `<data_dir>/<job_id>/*.csv`.
///
/// Every data file holds a single line of comma-separated decimal numbers.
/// Values are held as `f64`: integer inputs are summed exactly up to 2^53,
/// but fractional inputs pick up binary rounding error in intermediate files
/// before the final two-decimal rounding.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    data_dir: PathBuf,
}

impl TaskExecutor {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join(job_id)
    }

    pub fn file_path(&self, job_id: &str, token: &str) -> PathBuf {
        self.job_dir(job_id).join(format!("{}.csv", token))
    }

    pub fn output_path(&self, job_id: &str) -> PathBuf {
        self.file_path(job_id, OUTPUT_FILE_NAME)
    }

    pub async fn execute(&self, task: &WorkerTask) -> Result<ExecutionResult> {
        tracing::info!(
            job_id = %task.job_id(),
            task_id = %task.task_id(),
            task_type = task.task_type(),
            files = task.file_indices().len(),
            "Executing task"
        );

        let result = match task {
            WorkerTask::Aggregate {
                job_id,
                file_indices,
                ..
            } => self.aggregate(job_id, file_indices).await,
            WorkerTask::Average {
                job_id,
                num_original_files,
                file_indices,
                ..
            } => self.average(job_id, *num_original_files, file_indices).await,
        };

        match &result {
            Ok(done) => tracing::info!(
                job_id = %done.job_id,
                num_ops = done.num_ops,
                output_file_index = %done.output_file_index,
                "Task completed"
            ),
            Err(e) => tracing::error!(job_id = %task.job_id(), error = %e, "Task execution failed"),
        }
        result
    }

    /// Sum the files elementwise into a freshly named file.
    async fn aggregate(&self, job_id: &str, file_indices: &[FileIndex]) -> Result<ExecutionResult> {
        if file_indices.is_empty() {
            return Err(self.bad_task(job_id, "aggregate task without files"));
        }

        let mut sums: Vec<f64> = Vec::new();
        for (i, index) in file_indices.iter().enumerate() {
            let row = self.read_row(job_id, index).await?;
            if i == 0 {
                sums = row;
                continue;
            }
            if row.len() != sums.len() {
                return Err(MeanflowError::MalformedInput {
                    path: self.file_path(job_id, &index.to_string()).display().to_string(),
                    reason: format!("expected {} values, found {}", sums.len(), row.len()),
                });
            }
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += value;
            }
        }

        let output = Uuid::new_v4().to_string();
        tokio::fs::write(self.file_path(job_id, &output), format_row(&sums, None)).await?;

        Ok(ExecutionResult {
            job_id: job_id.to_string(),
            num_ops: (sums.len() * file_indices.len()) as u64,
            output_file_index: FileIndex::File(output),
        })
    }

    /// Divide the single reduced file by the original file count.
    async fn average(
        &self,
        job_id: &str,
        num_original_files: u64,
        file_indices: &[FileIndex],
    ) -> Result<ExecutionResult> {
        let [index] = file_indices else {
            return Err(self.bad_task(
                job_id,
                format!("average task expects one file, got {}", file_indices.len()),
            ));
        };
        if num_original_files == 0 {
            return Err(self.bad_task(job_id, "num_original_files must be positive"));
        }

        let row = self.read_row(job_id, index).await?;
        let divisor = num_original_files as f64;
        let averaged: Vec<f64> = row.iter().map(|v| v / divisor).collect();
        tokio::fs::write(self.output_path(job_id), format_row(&averaged, Some(2))).await?;

        Ok(ExecutionResult {
            job_id: job_id.to_string(),
            num_ops: averaged.len() as u64,
            output_file_index: FileIndex::Final,
        })
    }

    async fn read_row(&self, job_id: &str, index: &FileIndex) -> Result<Vec<f64>> {
        let FileIndex::File(token) = index else {
            return Err(self.bad_task(job_id, "task references the final-result sentinel"));
        };
        let path = self.file_path(job_id, token);
        let contents = tokio::fs::read_to_string(&path).await?;
        let line = contents.lines().next().unwrap_or_default();
        parse_row(line).map_err(|reason| MeanflowError::MalformedInput {
            path: path.display().to_string(),
            reason,
        })
    }

    fn bad_task(&self, job_id: &str, reason: impl Into<String>) -> MeanflowError {
        MeanflowError::MalformedInput {
            path: self.job_dir(job_id).display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse one line of comma-separated numbers.
pub fn parse_row(line: &str) -> std::result::Result<Vec<f64>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("file is empty".to_string());
    }
    line.split(',')
        .map(|field| {
            let field = field.trim();
            field
                .parse::<f64>()
                .map_err(|e| format!("invalid number {:?}: {}", field, e))
        })
        .collect()
}

/// Render numbers as one comma-separated line, optionally with a fixed
/// number of decimals.
pub fn format_row(values: &[f64], decimals: Option<usize>) -> String {
    values
        .iter()
        .map(|v| match decimals {
            Some(places) => format!("{:.*}", places, v),
            None => v.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}
