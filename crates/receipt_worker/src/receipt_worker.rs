use crate::amqp::EnvelopeConsumerService;
use crate::domain::{EnvelopeDispatcher, ReceiptService};
use common::amqp::{
    ConsumeLoggingLayer, ConsumeLoggingService, QueueConnector, QueueConsumer, ReconnectPolicy,
};
use common::domain::ReceiptRepository;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub struct ReceiptWorkerConfig {
    pub queue_name: String,
    pub reconnect_policy: ReconnectPolicy,
}

/// Consumes the receipt queue and stores every `receipt_extraction` message
pub struct ReceiptWorker {
    consumer: QueueConsumer<ConsumeLoggingService<EnvelopeConsumerService>>,
}

impl ReceiptWorker {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        repository: Arc<dyn ReceiptRepository>,
        config: ReceiptWorkerConfig,
    ) -> Self {
        info!(queue = %config.queue_name, "Initializing receipt worker");

        let receipt_service = Arc::new(ReceiptService::new(repository));
        let dispatcher = Arc::new(EnvelopeDispatcher::new(receipt_service));

        let service = ServiceBuilder::new()
            .layer(ConsumeLoggingLayer::new())
            .service(EnvelopeConsumerService::new(dispatcher));

        let consumer = QueueConsumer::new(
            connector,
            &config.queue_name,
            config.reconnect_policy,
            service,
        );

        Self { consumer }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.consumer.run(ctx).await
    }

    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| Box::pin(async move { self.run(ctx).await }))
    }
}
