use crate::amqp::traits::{DeliverySource, QueueConnector, QueuePublisher};
use crate::amqp::ConsumeRequest;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, instrument, warn};

/// AMQP delivery mode marking a message as persistent
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// A connection and channel with the durable work queue declared.
///
/// The handle is never repaired: once the transport fails it is closed and a
/// new one is built from scratch.
pub struct AmqpClient {
    connection: Connection,
    channel: Channel,
    queue: String,
}

impl AmqpClient {
    /// Open a connection, open a channel and declare `queue` as durable.
    ///
    /// Declaring is idempotent when the queue already exists with the same
    /// properties. If any step fails the connection is closed and an error
    /// is returned.
    pub async fn connect(url: &str, queue: &str) -> Result<Self> {
        info!(queue = %queue, "Connecting to AMQP broker");

        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(url, properties)
            .await
            .context("failed to connect to AMQP broker")?;

        let channel = match Self::open_channel(&connection, queue).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "setup failed").await {
                    debug!(error = %close_err, "failed to close connection after setup error");
                }
                return Err(e);
            }
        };

        info!(queue = %queue, "AMQP connection ready and queue declared");

        Ok(Self {
            connection,
            channel,
            queue: queue.to_string(),
        })
    }

    async fn open_channel(connection: &Connection, queue: &str) -> Result<Channel> {
        let channel = connection
            .create_channel()
            .await
            .context("failed to open channel")?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to declare queue '{}'", queue))?;

        Ok(channel)
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Limit unacknowledged deliveries and start consuming the queue
    pub async fn into_delivery_source(
        self,
        prefetch: u16,
        consumer_tag: &str,
    ) -> Result<AmqpDeliverySource> {
        let consumer = match self.start_consuming(prefetch, consumer_tag).await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.shutdown().await;
                return Err(e);
            }
        };

        debug!(
            queue = %self.queue,
            consumer_tag = %consumer_tag,
            prefetch,
            "consumer registered"
        );

        Ok(AmqpDeliverySource {
            client: self,
            consumer,
            consumer_tag: consumer_tag.to_string(),
            closed: false,
        })
    }

    async fn start_consuming(&self, prefetch: u16, consumer_tag: &str) -> Result<Consumer> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .context("failed to set prefetch")?;

        self.channel
            .basic_consume(
                &self.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to consume queue '{}'", self.queue))
    }

    /// Enable publisher confirms and turn this handle into a publisher
    pub async fn into_publisher(self) -> Result<AmqpPublisher> {
        if let Err(e) = self
            .channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            self.shutdown().await;
            return Err(e).context("failed to enable publisher confirms");
        }

        Ok(AmqpPublisher { client: self })
    }

    /// Close the channel, then the connection. Both steps are attempted.
    pub async fn shutdown(&self) {
        match self.channel.close(REPLY_SUCCESS, "shutdown").await {
            Ok(()) => debug!(queue = %self.queue, "channel closed"),
            Err(e) => warn!(queue = %self.queue, error = %e, "failed to close channel"),
        }

        match self.connection.close(REPLY_SUCCESS, "shutdown").await {
            Ok(()) => info!(queue = %self.queue, "AMQP connection closed"),
            Err(e) => warn!(queue = %self.queue, error = %e, "failed to close connection"),
        }
    }
}

/// Builds a consuming session per connection attempt
pub struct AmqpConnector {
    url: String,
    queue: String,
    consumer_tag: String,
    prefetch: u16,
}

impl AmqpConnector {
    pub fn new(url: String, queue: String, consumer_tag: String, prefetch: u16) -> Self {
        Self {
            url,
            queue,
            consumer_tag,
            prefetch,
        }
    }
}

#[async_trait]
impl QueueConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn DeliverySource>> {
        let client = AmqpClient::connect(&self.url, &self.queue).await?;
        let source = client
            .into_delivery_source(self.prefetch, &self.consumer_tag)
            .await?;
        Ok(Box::new(source))
    }
}

/// Concrete implementation of DeliverySource using lapin
pub struct AmqpDeliverySource {
    client: AmqpClient,
    consumer: Consumer,
    consumer_tag: String,
    closed: bool,
}

#[async_trait]
impl DeliverySource for AmqpDeliverySource {
    async fn next_delivery(&mut self) -> Option<Result<ConsumeRequest>> {
        let delivery = self.consumer.next().await?;

        Some(
            delivery
                .map(|delivery| {
                    ConsumeRequest::new(
                        self.client.queue.clone(),
                        delivery.delivery_tag,
                        delivery.redelivered,
                        Bytes::from(delivery.data),
                    )
                })
                .context("failed to receive delivery"),
        )
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.client
            .channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .context("failed to acknowledge delivery")
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.client
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: false,
                },
            )
            .await
            .context("failed to reject delivery")
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self
            .client
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(
                consumer_tag = %self.consumer_tag,
                error = %e,
                "failed to cancel consumer"
            );
        }

        self.client.shutdown().await;
    }
}

/// Concrete implementation of QueuePublisher using lapin with publisher confirms
pub struct AmqpPublisher {
    client: AmqpClient,
}

impl AmqpPublisher {
    pub async fn close(&self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl QueuePublisher for AmqpPublisher {
    #[instrument(skip_all, fields(queue = %queue, payload_size = payload.len()))]
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        ensure_declared_queue(&self.client.queue, queue)?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type("application/json".into());

        // Default exchange: the routing key is the queue name. Mandatory makes
        // the broker return the message instead of dropping it when unroutable.
        let options = BasicPublishOptions {
            mandatory: true,
            ..BasicPublishOptions::default()
        };
        let confirmation = self
            .client
            .channel
            .basic_publish("", queue, options, &payload, properties)
            .await
            .context("failed to publish message")?
            .await
            .context("failed to receive publisher confirmation")?;

        match confirmation {
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
            Confirmation::Ack(Some(_)) => {
                bail!("broker returned message as unroutable for queue '{}'", queue)
            }
            Confirmation::Nack(_) => bail!("broker did not accept message for queue '{}'", queue),
        }
    }
}

/// Publishing is only allowed to the queue the client declared
fn ensure_declared_queue(declared: &str, requested: &str) -> Result<()> {
    if declared != requested {
        bail!(
            "queue '{}' is not the declared queue '{}'",
            requested,
            declared
        );
    }
    Ok(())
}
