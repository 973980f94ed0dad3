use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::amqp::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{error, info, Instrument, Span};

/// Tower layer for logging single delivery consumption
#[derive(Clone, Default)]
pub struct ConsumeLoggingLayer;

impl ConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ConsumeLoggingLayer {
    type Service = ConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ConsumeLoggingService { inner: service }
    }
}

/// Service that logs single delivery consumption
#[derive(Clone)]
pub struct ConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for ConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let queue = req.queue.clone();
        let delivery_tag = req.delivery_tag;
        let redelivered = req.redelivered;
        let payload_size = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();
        // poll_ready was driven on self.inner; keep that ready instance for the call
        std::mem::swap(&mut self.inner, &mut inner);

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(response) => {
                        let outcome = if response.is_ack() { "ack" } else { "reject" };

                        info!(
                            queue = %queue,
                            delivery_tag,
                            redelivered,
                            payload_bytes = payload_size,
                            outcome = %outcome,
                            duration_ms = %duration_ms,
                            "consumed from {queue} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => {
                        error!(
                            queue = %queue,
                            delivery_tag,
                            redelivered,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {queue} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
