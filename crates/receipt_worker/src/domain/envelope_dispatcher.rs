use crate::domain::ReceiptService;
use common::domain::{Action, DecodedEnvelope, DomainResult};
use std::sync::Arc;
use tracing::info;

/// What the dispatcher did with an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A receipt row was inserted
    Stored,
    /// No handler is registered for the action; nothing was written
    Skipped(Action),
}

/// Routes a decoded envelope to the handler registered for its `action`
pub struct EnvelopeDispatcher {
    receipt_service: Arc<ReceiptService>,
}

impl EnvelopeDispatcher {
    pub fn new(receipt_service: Arc<ReceiptService>) -> Self {
        Self { receipt_service }
    }

    pub async fn dispatch(&self, envelope: &DecodedEnvelope) -> DomainResult<DispatchOutcome> {
        match envelope.action() {
            Action::ReceiptExtraction => {
                self.receipt_service.store_receipt(envelope).await?;
                Ok(DispatchOutcome::Stored)
            }
            other => {
                info!(action = %other, "no handler for action, skipping message");
                Ok(DispatchOutcome::Skipped(other))
            }
        }
    }
}
