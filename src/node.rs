use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState, JobStore};
use crate::config::NodeConfig;
use crate::error::{MeanflowError, Result};
use crate::gateway::{InMemoryBroker, MessageGateway};
use crate::notifier::{CompletionNotifier, HttpCompletionNotifier};
use crate::protocol::SCHEDULER_QUEUE;
use crate::scheduler::{SchedulerService, SchedulerSnapshot};
use crate::worker::WorkerPool;

/// Main node that orchestrates all components
pub struct Node {
    pub config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run the node until `cancel` fires or a component fails.
    ///
    /// Starts, in order:
    /// 1. The in-process broker with the scheduler queue declared
    /// 2. The scheduler loop, sole owner of the registry and job table
    /// 3. The local worker pool
    /// 4. The HTTP API
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error if its bookkeeping became inconsistent,
    /// or the API's error if it failed to serve.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let broker = Arc::new(InMemoryBroker::new());
        let gateway: Arc<dyn MessageGateway> = broker;
        gateway.declare_queue(SCHEDULER_QUEUE).await?;

        let store = Arc::new(JobStore::new());
        let notifier: Arc<dyn CompletionNotifier> = match &self.config.api.notify_url {
            Some(url) => {
                let http = HttpCompletionNotifier::new(url.clone());
                tracing::info!(url = %http.url(), "Sending completion notifications over HTTP");
                Arc::new(http)
            }
            None => store.clone(),
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(SchedulerSnapshot::default());
        let service = SchedulerService::new(&self.config.scheduler, gateway.clone(), notifier)?;
        let mut scheduler = tokio::spawn(service.run(cancel.child_token(), snapshot_tx));

        let pool = Arc::new(WorkerPool::new(
            gateway.clone(),
            self.config.api.data_dir.clone(),
            self.config.worker_hostname_prefix.clone(),
            cancel.child_token(),
        ));
        pool.scale_to(self.config.local_workers).await?;

        let api_state = ApiState {
            store,
            gateway: gateway.clone(),
            data_dir: self.config.api.data_dir.clone(),
            limits: self.config.api.limits,
            snapshots: snapshot_rx,
            pool: pool.clone(),
        };
        let mut api = tokio::spawn(run_api(
            self.config.api.listen_addr,
            api_state,
            cancel.child_token(),
        ));

        let (result, scheduler_done, api_done) = tokio::select! {
            _ = cancel.cancelled() => (Ok(()), false, false),
            joined = &mut scheduler => (joined.map_err(MeanflowError::from).and_then(|r| r), true, false),
            joined = &mut api => (joined.map_err(MeanflowError::from).and_then(|r| r), false, true),
        };
        if let Err(e) = &result {
            tracing::error!(error = %e, "Node component failed, shutting down");
        }

        // Workers announce their departure before the broker goes away.
        pool.shutdown().await;
        cancel.cancel();
        gateway.close().await;

        if !scheduler_done {
            match scheduler.await {
                Ok(Err(e)) => tracing::error!(error = %e, "Scheduler stopped with error"),
                Err(e) => tracing::error!(error = %e, "Scheduler task panicked"),
                Ok(Ok(())) => {}
            }
        }
        if !api_done {
            match api.await {
                Ok(Err(e)) => tracing::error!(error = %e, "API stopped with error"),
                Err(e) => tracing::error!(error = %e, "API task panicked"),
                Ok(Ok(())) => {}
            }
        }

        tracing::info!("Node stopped");
        result
    }
}
