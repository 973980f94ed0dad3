use crate::amqp::traits::{DeliverySource, QueueConnector, QueuePublisher};
use crate::amqp::ConsumeRequest;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// In-memory work queue implementing the connector and publisher seams.
///
/// Mirrors the broker behaviour the consumer loop relies on: prefetch of one,
/// ack removes, reject without requeue drops, and deliveries left unsettled
/// when a session breaks go back to the head of the queue marked redelivered.
/// Only one consuming session is live at a time: connecting again ends the
/// previous one.
#[derive(Clone)]
pub struct InMemoryQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(Bytes, bool)>,
    unacked: HashMap<u64, Bytes>,
    acked: Vec<Bytes>,
    rejected: Vec<Bytes>,
    next_tag: u64,
    session: u64,
    failing_connects: u32,
    connect_attempts: u32,
    closed_sessions: u32,
}

impl QueueState {
    fn requeue_unacked(&mut self) {
        let mut tags: Vec<u64> = self.unacked.keys().copied().collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(payload) = self.unacked.remove(&tag) {
                self.ready.push_front((payload, true));
            }
        }
    }
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message body directly
    pub fn push(&self, payload: impl Into<Bytes>) {
        self.lock().ready.push_back((payload.into(), false));
        self.notify.notify_one();
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Drop the current session as if the transport had failed
    pub fn break_session(&self) {
        let mut state = self.lock();
        state.session += 1;
        state.requeue_unacked();
        drop(state);
        self.notify.notify_one();
    }

    pub fn acked(&self) -> Vec<Bytes> {
        self.lock().acked.clone()
    }

    pub fn rejected(&self) -> Vec<Bytes> {
        self.lock().rejected.clone()
    }

    /// Messages still in the queue, delivered or not
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.unacked.len()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn closed_sessions(&self) -> u32 {
        self.lock().closed_sessions
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueConnector for InMemoryQueue {
    async fn connect(&self) -> Result<Box<dyn DeliverySource>> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            bail!("connection refused");
        }

        state.session += 1;
        Ok(Box::new(InMemoryDeliverySource {
            queue: self.clone(),
            session: state.session,
            closed: false,
        }))
    }
}

#[async_trait]
impl QueuePublisher for InMemoryQueue {
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        if queue != self.name {
            bail!("no queue named '{}'", queue);
        }
        self.push(payload);
        Ok(())
    }
}

struct InMemoryDeliverySource {
    queue: InMemoryQueue,
    session: u64,
    closed: bool,
}

impl InMemoryDeliverySource {
    fn settle(&self, delivery_tag: u64, accept: bool) -> Result<()> {
        let mut state = self.queue.lock();
        if state.session != self.session {
            bail!("channel closed");
        }

        let payload = state
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| anyhow!("unknown delivery tag {}", delivery_tag))?;

        if accept {
            state.acked.push(payload);
        } else {
            state.rejected.push(payload);
        }
        drop(state);
        self.queue.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl DeliverySource for InMemoryDeliverySource {
    async fn next_delivery(&mut self) -> Option<Result<ConsumeRequest>> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.lock();
                if self.closed {
                    return None;
                }
                if state.session != self.session {
                    return Some(Err(anyhow!("connection to broker lost")));
                }
                if state.unacked.is_empty() {
                    if let Some((payload, redelivered)) = state.ready.pop_front() {
                        state.next_tag += 1;
                        let delivery_tag = state.next_tag;
                        state.unacked.insert(delivery_tag, payload.clone());
                        return Some(Ok(ConsumeRequest::new(
                            self.queue.name.clone(),
                            delivery_tag,
                            redelivered,
                            payload,
                        )));
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.settle(delivery_tag, true)
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.settle(delivery_tag, false)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.queue.lock();
        state.closed_sessions += 1;
        if state.session == self.session {
            state.requeue_unacked();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_and_reject_settle_deliveries() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("first");
        queue.push("second");

        let mut source = queue.connect().await.unwrap();

        let first = source.next_delivery().await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from("first"));
        source.ack(first.delivery_tag).await.unwrap();

        let second = source.next_delivery().await.unwrap().unwrap();
        source.reject(second.delivery_tag).await.unwrap();

        assert_eq!(queue.acked(), vec![Bytes::from("first")]);
        assert_eq!(queue.rejected(), vec![Bytes::from("second")]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_broken_session_requeues_unsettled_delivery() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("body");

        let mut source = queue.connect().await.unwrap();
        let delivery = source.next_delivery().await.unwrap().unwrap();
        assert!(!delivery.redelivered);

        queue.break_session();
        assert!(source.next_delivery().await.unwrap().is_err());
        assert!(source.ack(delivery.delivery_tag).await.is_err());

        let mut source = queue.connect().await.unwrap();
        let redelivery = source.next_delivery().await.unwrap().unwrap();
        assert!(redelivery.redelivered);
        assert_eq!(redelivery.payload, Bytes::from("body"));
    }

    #[tokio::test]
    async fn test_failing_connects() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.fail_next_connects(2);

        assert!(queue.connect().await.is_err());
        assert!(queue.connect().await.is_err());
        assert!(queue.connect().await.is_ok());
        assert_eq!(queue.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_publish_requires_matching_queue_name() {
        let queue = InMemoryQueue::new("receipt_queue");

        assert!(queue
            .publish("other_queue", Bytes::from("{}"))
            .await
            .is_err());
        queue
            .publish("receipt_queue", Bytes::from("{}"))
            .await
            .unwrap();
        assert_eq!(queue.pending(), 1);
    }
}
