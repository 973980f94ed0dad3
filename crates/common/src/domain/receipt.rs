use crate::domain::envelope::{DecodedEnvelope, ReceiptEnvelope};
use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Row written for every successfully handled `receipt_extraction` message
#[derive(Debug, Clone, PartialEq)]
pub struct NewReceipt {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub total_amount: Option<f64>,
    pub date: Option<String>,
    /// The full envelope, kept for audit and replay
    pub raw: serde_json::Value,
}

impl From<&DecodedEnvelope> for NewReceipt {
    fn from(envelope: &DecodedEnvelope) -> Self {
        Self {
            user_id: envelope.user_id(),
            username: envelope.username().map(str::to_string),
            total_amount: envelope.total_amount(),
            date: envelope.date(),
            raw: envelope.to_value(),
        }
    }
}

/// Repository trait for receipt storage operations
/// Infrastructure layer (e.g., postgres) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReceiptRepository: Send + Sync {
    /// Insert one receipt row
    /// Every call creates a new row; there is no upsert and no dedup key
    async fn insert_receipt(&self, receipt: NewReceipt) -> DomainResult<()>;
}

/// Trait for publishing receipt envelopes to the work queue
///
/// Implementations should:
/// - Serialize the envelope to its JSON wire format
/// - Publish it as a persistent message to the named queue
/// - Return error if the broker does not accept the message
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReceiptEnvelopeProducer: Send + Sync {
    async fn publish(&self, envelope: &ReceiptEnvelope) -> DomainResult<()>;
}

/// Vision/completion collaborator that turns a receipt photo into text that
/// is expected, but not guaranteed, to be a JSON object
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> DomainResult<String>;
}
