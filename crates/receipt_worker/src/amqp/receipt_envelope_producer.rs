use bytes::Bytes;
use common::amqp::QueuePublisher;
use common::domain::{
    DomainError, DomainResult, ReceiptEnvelope,
    ReceiptEnvelopeProducer as ReceiptEnvelopeProducerTrait,
};
use std::sync::Arc;
use tracing::debug;

/// Publishes receipt envelopes to the durable work queue
pub struct ReceiptEnvelopeProducer {
    publisher: Arc<dyn QueuePublisher>,
    queue: String,
}

impl ReceiptEnvelopeProducer {
    pub fn new(publisher: Arc<dyn QueuePublisher>, queue: String) -> Self {
        debug!(queue = %queue, "initialized ReceiptEnvelopeProducer");
        Self { publisher, queue }
    }
}

#[async_trait::async_trait]
impl ReceiptEnvelopeProducerTrait for ReceiptEnvelopeProducer {
    async fn publish(&self, envelope: &ReceiptEnvelope) -> DomainResult<()> {
        let payload = envelope.to_payload()?;

        self.publisher
            .publish(&self.queue, Bytes::from(payload))
            .await
            .map_err(DomainError::PublishError)?;

        debug!(queue = %self.queue, user_id = envelope.user.id, "published receipt envelope");
        Ok(())
    }
}
