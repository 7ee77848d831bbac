//! Message transport between the scheduler and workers.
//!
//! The scheduler consumes one well-known queue ([`SCHEDULER_QUEUE`]); every
//! worker consumes its own queue named after its hostname, declared by the
//! worker before it announces itself. Delivery is at-least-once: a consumer
//! acknowledges a [`Delivery`] only after handling it, and a negative
//! acknowledgement puts it back at the head of its queue.
//!
//! [`SCHEDULER_QUEUE`]: crate::protocol::SCHEDULER_QUEUE

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{worker_queue, SchedulerEvent, WorkerTask, SCHEDULER_QUEUE};

pub use memory::InMemoryBroker;

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub queue: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Create a queue if it does not exist yet.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Append a message to a declared queue.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Wait for the next message on a queue. Returns `None` once the gateway
    /// is closed.
    async fn consume(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a delivery to the head of its queue.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Stop the gateway, waking every pending consumer.
    async fn close(&self);
}

/// Publish an event to the scheduler queue.
pub async fn publish_event(gateway: &dyn MessageGateway, event: &SchedulerEvent) -> Result<()> {
    gateway.publish(SCHEDULER_QUEUE, event.to_vec()?).await
}

/// Publish a task to a worker's queue.
pub async fn publish_task(
    gateway: &dyn MessageGateway,
    hostname: &str,
    task: &WorkerTask,
) -> Result<()> {
    gateway.publish(&worker_queue(hostname), task.to_vec()?).await
}
