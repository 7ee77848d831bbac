//! In-process message broker.
//!
//! [`InMemoryBroker`] implements [`MessageGateway`] with one FIFO per queue
//! and a table of unacknowledged deliveries. It backs the single-process
//! deployment and the tests; nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Delivery, MessageGateway};
use crate::error::{MeanflowError, Result};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, (String, Vec<u8>)>,
    next_tag: u64,
    closed: bool,
}

fn poison_err<T>(_: PoisonError<T>) -> MeanflowError {
    MeanflowError::Transport("broker lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>> {
        self.state.lock().map_err(poison_err)
    }

    /// Number of messages waiting on a queue.
    pub fn queue_depth(&self, queue: &str) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.queues.get(queue).map_or(0, |q| q.ready.len()))
    }

    /// Deliveries handed out but not yet acknowledged.
    pub fn unacked_count(&self) -> Result<usize> {
        Ok(self.lock()?.unacked.len())
    }

    pub fn has_queue(&self, queue: &str) -> Result<bool> {
        Ok(self.lock()?.queues.contains_key(queue))
    }

    /// Remove and return every message waiting on a queue.
    pub fn drain(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
        let mut state = self.lock()?;
        Ok(state
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl MessageGateway for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(MeanflowError::Transport("broker closed".to_string()));
        }
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(MeanflowError::Transport("broker closed".to_string()));
        }
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MeanflowError::Transport(format!("queue {} not declared", queue)))?;
        q.ready.push_back(body);
        q.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Option<Delivery>> {
        loop {
            let notify = {
                let mut guard = self.lock()?;
                let state = &mut *guard;
                if state.closed {
                    return Ok(None);
                }
                let q = state.queues.get_mut(queue).ok_or_else(|| {
                    MeanflowError::Transport(format!("queue {} not declared", queue))
                })?;
                if let Some(body) = q.ready.pop_front() {
                    state.next_tag += 1;
                    let delivery_tag = state.next_tag;
                    state
                        .unacked
                        .insert(delivery_tag, (queue.to_string(), body.clone()));
                    return Ok(Some(Delivery {
                        delivery_tag,
                        queue: queue.to_string(),
                        body,
                    }));
                }
                q.notify.clone()
            };
            notify.notified().await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.lock()?;
        state
            .unacked
            .remove(&delivery.delivery_tag)
            .map(|_| ())
            .ok_or_else(|| {
                MeanflowError::Transport(format!("unknown delivery tag {}", delivery.delivery_tag))
            })
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let (queue, body) = state.unacked.remove(&delivery.delivery_tag).ok_or_else(|| {
            MeanflowError::Transport(format!("unknown delivery tag {}", delivery.delivery_tag))
        })?;
        if let Some(q) = state.queues.get_mut(&queue) {
            q.ready.push_front(body);
            q.notify.notify_one();
        }
        Ok(())
    }

    async fn close(&self) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        state.closed = true;
        for q in state.queues.values() {
            q.notify.notify_one();
            q.notify.notify_waiters();
        }
    }
}
