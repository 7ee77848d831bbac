use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{MeanflowError, Result};
use crate::gateway::MessageGateway;
use crate::worker::runner::WorkerNode;

struct PooledWorker {
    hostname: String,
    handle: JoinHandle<()>,
}

/// In-process workers sharing one gateway. The pool only grows; workers
/// leave when the pool's token is cancelled.
pub struct WorkerPool {
    gateway: Arc<dyn MessageGateway>,
    data_dir: PathBuf,
    hostname_prefix: String,
    cancel: CancellationToken,
    workers: Mutex<Vec<PooledWorker>>,
}

impl WorkerPool {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        data_dir: impl Into<PathBuf>,
        hostname_prefix: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            data_dir: data_dir.into(),
            hostname_prefix: hostname_prefix.into(),
            cancel,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    pub async fn hostnames(&self) -> Vec<String> {
        self.workers
            .lock()
            .await
            .iter()
            .map(|w| w.hostname.clone())
            .collect()
    }

    /// Start workers until the pool holds `target`. Returns how many were
    /// started.
    pub async fn scale_to(&self, target: usize) -> Result<usize> {
        let mut workers = self.workers.lock().await;
        if target < workers.len() {
            return Err(MeanflowError::InvalidConfig(format!(
                "cannot scale down from {} to {} workers",
                workers.len(),
                target
            )));
        }

        let mut started = 0;
        while workers.len() < target {
            let hostname = format!("{}-{}", self.hostname_prefix, workers.len() + 1);
            let node = WorkerNode::new(
                WorkerConfig::new(hostname.clone()).with_data_dir(self.data_dir.clone()),
            );
            let gateway = self.gateway.clone();
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(async move {
                if let Err(e) = node.run(gateway, cancel).await {
                    tracing::error!(hostname = %node.hostname(), error = %e, "Worker exited");
                }
            });
            tracing::info!(hostname = %hostname, "Worker started");
            workers.push(PooledWorker { hostname, handle });
            started += 1;
        }
        Ok(started)
    }

    /// Cancel every worker and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.handle.await {
                tracing::warn!(hostname = %worker.hostname, error = %e, "Worker task panicked");
            }
        }
    }
}
