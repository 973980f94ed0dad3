use crate::amqp::ConsumeRequest;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for establishing a consuming session on the work queue
/// One call is one connection attempt: connect, open a channel, declare the
/// durable queue, set prefetch and start consuming
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DeliverySource>>;
}

/// Trait for a live consuming session
/// Abstracts receiving deliveries and settling them by delivery tag
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Wait for the next delivery
    /// Returns None when the broker closed the stream and an error when the
    /// transport failed; both mean the session is no longer usable
    async fn next_delivery(&mut self) -> Option<Result<ConsumeRequest>>;

    /// Acknowledge a delivery, removing it from the queue
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledge a delivery without requeue
    async fn reject(&self, delivery_tag: u64) -> Result<()>;

    /// Stop consuming and release the channel and the connection
    /// Best effort: every step is attempted even if an earlier one fails
    async fn close(&mut self);
}

/// Trait for publishing to a named queue
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish a persistent message routed directly to `queue` and wait for
    /// the broker to confirm it
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()>;
}
