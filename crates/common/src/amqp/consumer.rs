use crate::amqp::{
    connect_with_retry, ConsumeRequest, ConsumeResponse, DeliverySource, QueueConnector,
    ReconnectPolicy,
};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Why a consuming session ended
enum SessionEnd {
    Shutdown,
    TransportLost(String),
}

/// A queue consumer that hands each delivery to a Tower service stack.
///
/// Deliveries are processed strictly one at a time and settled from the
/// service's `ConsumeResponse`: `Ack` acknowledges, `Reject` (or a service
/// error) negatively acknowledges without requeue. When the transport fails
/// the session is closed and a new one is established through the connector,
/// retrying per the reconnect policy until it succeeds or shutdown is
/// requested.
pub struct QueueConsumer<S> {
    connector: Arc<dyn QueueConnector>,
    queue: String,
    policy: ReconnectPolicy,
    service: S,
}

impl<S> QueueConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        queue: &str,
        policy: ReconnectPolicy,
        service: S,
    ) -> Self {
        Self {
            connector,
            queue: queue.to_string(),
            policy,
            service,
        }
    }

    /// Run the consumer loop until cancellation.
    ///
    /// A delivery already handed to the service is always processed and
    /// settled before shutdown is observed.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        debug!(queue = %self.queue, "starting queue consumer");

        loop {
            let connector = Arc::clone(&self.connector);
            let source = connect_with_retry(&self.queue, &self.policy, &ctx, || {
                let connector = Arc::clone(&connector);
                async move { connector.connect().await }
            })
            .await;

            let Some(mut source) = source else {
                info!(queue = %self.queue, "shutdown requested before a session was established");
                break;
            };

            info!(queue = %self.queue, "waiting for messages");
            let end = self.consume(source.as_mut(), &ctx).await;
            source.close().await;

            match end {
                SessionEnd::Shutdown => {
                    info!(
                        queue = %self.queue,
                        "received shutdown signal, stopped consuming"
                    );
                    break;
                }
                SessionEnd::TransportLost(reason) => {
                    warn!(
                        queue = %self.queue,
                        reason = %reason,
                        "connection to broker lost, reconnecting"
                    );
                }
            }
        }

        debug!(queue = %self.queue, "consumer stopped gracefully");
        Ok(())
    }

    async fn consume(
        &mut self,
        source: &mut dyn DeliverySource,
        ctx: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = ctx.cancelled() => return SessionEnd::Shutdown,
                delivery = source.next_delivery() => delivery,
            };

            let request = match delivery {
                Some(Ok(request)) => request,
                Some(Err(e)) => return SessionEnd::TransportLost(format!("{:#}", e)),
                None => return SessionEnd::TransportLost("delivery stream closed".to_string()),
            };

            let delivery_tag = request.delivery_tag;
            match self.handle(request).await {
                ConsumeResponse::Ack => {
                    if let Err(e) = source.ack(delivery_tag).await {
                        error!(
                            queue = %self.queue,
                            delivery_tag,
                            error = %e,
                            "failed to acknowledge delivery"
                        );
                    }
                }
                ConsumeResponse::Reject(reason) => {
                    if let Some(ref r) = reason {
                        warn!(queue = %self.queue, delivery_tag, reason = %r, "rejecting delivery");
                    } else {
                        warn!(queue = %self.queue, delivery_tag, "rejecting delivery");
                    }

                    if let Err(e) = source.reject(delivery_tag).await {
                        error!(
                            queue = %self.queue,
                            delivery_tag,
                            error = %e,
                            "failed to reject delivery"
                        );
                    }
                }
            }
        }
    }

    async fn handle(&mut self, request: ConsumeRequest) -> ConsumeResponse {
        let delivery_tag = request.delivery_tag;
        let result = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            error!(
                queue = %self.queue,
                delivery_tag,
                error = %e,
                "service error processing delivery"
            );
            ConsumeResponse::reject(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::{InMemoryQueue, MockQueueConnector};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tower::service_fn;

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(120), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn spawn_consumer<S>(
        queue: &InMemoryQueue,
        service: S,
    ) -> (CancellationToken, JoinHandle<Result<()>>)
    where
        S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let ctx = CancellationToken::new();
        let consumer = QueueConsumer::new(
            Arc::new(queue.clone()),
            queue.name(),
            ReconnectPolicy::default(),
            service,
        );
        let handle = tokio::spawn(consumer.run(ctx.clone()));
        (ctx, handle)
    }

    #[tokio::test]
    async fn test_settles_each_delivery_from_service_response() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("good");
        queue.push("bad");
        queue.push("boom");

        let service = service_fn(|req: ConsumeRequest| async move {
            match req.payload.as_ref() {
                b"good" => Ok(ConsumeResponse::ack()),
                b"bad" => Ok(ConsumeResponse::reject("bad body")),
                _ => Err(anyhow::anyhow!("handler failed")),
            }
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.acked().len() + queue.rejected().len() == 3).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.acked(), vec![Bytes::from("good")]);
        assert_eq!(queue.rejected(), vec![Bytes::from("bad"), Bytes::from("boom")]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_processes_deliveries_one_at_a_time_in_order() {
        let queue = InMemoryQueue::new("receipt_queue");
        for body in ["1", "2", "3", "4"] {
            queue.push(body);
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let service = service_fn(move |req: ConsumeRequest| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(req.payload);
                Ok::<_, anyhow::Error>(ConsumeResponse::ack())
            }
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.acked().len() == 4).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        let expected: Vec<Bytes> = ["1", "2", "3", "4"].into_iter().map(Bytes::from).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(queue.acked(), expected);
    }

    #[tokio::test]
    async fn test_shutdown_during_processing_settles_current_and_pulls_nothing_more() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("first");
        queue.push("second");

        let ctx = CancellationToken::new();
        let interrupt = ctx.clone();
        let service = service_fn(move |_req: ConsumeRequest| {
            let interrupt = interrupt.clone();
            async move {
                interrupt.cancel();
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>(ConsumeResponse::ack())
            }
        });

        let consumer = QueueConsumer::new(
            Arc::new(queue.clone()),
            queue.name(),
            ReconnectPolicy::default(),
            service,
        );
        tokio::time::timeout(Duration::from_secs(10), consumer.run(ctx))
            .await
            .expect("consumer did not stop")
            .unwrap();

        assert_eq!(queue.acked(), vec![Bytes::from("first")]);
        assert!(queue.rejected().is_empty());
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_loss() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("before");

        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::ack())
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.acked().len() == 1).await;

        queue.break_session();
        queue.push("after");
        wait_until(|| queue.acked().len() == 2).await;

        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.connect_attempts(), 2);
        assert_eq!(queue.closed_sessions(), 2);
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_redelivered_after_transport_loss() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.push("body");

        let flags = Arc::new(Mutex::new(Vec::new()));
        let recorded = flags.clone();
        let broker = queue.clone();
        let service = service_fn(move |req: ConsumeRequest| {
            let recorded = recorded.clone();
            let broker = broker.clone();
            async move {
                recorded.lock().unwrap().push(req.redelivered);
                if !req.redelivered {
                    // Transport fails before the ack reaches the broker
                    broker.break_session();
                }
                Ok::<_, anyhow::Error>(ConsumeResponse::ack())
            }
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.acked().len() == 1).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*flags.lock().unwrap(), vec![false, true]);
        assert_eq!(queue.acked(), vec![Bytes::from("body")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_startup_connection_until_broker_is_available() {
        let queue = InMemoryQueue::new("receipt_queue");
        queue.fail_next_connects(2);
        queue.push("body");

        let started = tokio::time::Instant::now();
        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::ack())
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.acked().len() == 1).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.connect_attempts(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_session() {
        let queue = InMemoryQueue::new("receipt_queue");
        let service = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::ack())
        });

        let (ctx, handle) = spawn_consumer(&queue, service);
        wait_until(|| queue.connect_attempts() == 1).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.closed_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_broker_unreachable() {
        let mut connector = MockQueueConnector::new();
        connector
            .expect_connect()
            .returning(|| Err(anyhow::anyhow!("connection refused")));

        let ctx = CancellationToken::new();
        let consumer = QueueConsumer::new(
            Arc::new(connector),
            "receipt_queue",
            ReconnectPolicy::default(),
            service_fn(|_req: ConsumeRequest| async {
                Ok::<_, anyhow::Error>(ConsumeResponse::ack())
            }),
        );

        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cancel.cancel();
        });

        consumer.run(ctx).await.unwrap();
    }
}
