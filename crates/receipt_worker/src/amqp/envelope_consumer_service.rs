use crate::domain::{DispatchOutcome, EnvelopeDispatcher};
use common::amqp::{ConsumeRequest, ConsumeResponse};
use common::domain::DecodedEnvelope;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service for processing individual receipt queue deliveries.
///
/// This service:
/// 1. Decodes the JSON body
/// 2. Dispatches on the envelope's action
/// 3. Returns Ack when the message was handled or skipped, Reject otherwise
#[derive(Clone)]
pub struct EnvelopeConsumerService {
    dispatcher: Arc<EnvelopeDispatcher>,
}

impl EnvelopeConsumerService {
    pub fn new(dispatcher: Arc<EnvelopeDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<ConsumeRequest> for EnvelopeConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);

        Box::pin(async move {
            let envelope = match DecodedEnvelope::decode(&req.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(
                        error = %e,
                        delivery_tag = req.delivery_tag,
                        "failed to decode receipt envelope"
                    );
                    return Ok(ConsumeResponse::reject(format!("Decode error: {}", e)));
                }
            };

            match dispatcher.dispatch(&envelope).await {
                Ok(DispatchOutcome::Stored) => {
                    debug!(delivery_tag = req.delivery_tag, "receipt stored");
                    Ok(ConsumeResponse::ack())
                }
                Ok(DispatchOutcome::Skipped(_)) => Ok(ConsumeResponse::ack()),
                Err(e) => {
                    warn!(
                        error = %e,
                        delivery_tag = req.delivery_tag,
                        action = %envelope.action(),
                        "failed to handle receipt envelope"
                    );
                    Ok(ConsumeResponse::reject(e.to_string()))
                }
            }
        })
    }
}
