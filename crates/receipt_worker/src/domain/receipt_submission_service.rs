use common::domain::{
    DomainResult, ReceiptEnvelope, ReceiptEnvelopeProducer, ReceiptExtractor, Submitter,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Producer-side flow for a submitted receipt photo.
///
/// Extracts text from the image, wraps it into a `receipt_extraction`
/// envelope and publishes it. The completion text is returned so the caller
/// can echo it back to the user.
pub struct ReceiptSubmissionService {
    extractor: Arc<dyn ReceiptExtractor>,
    producer: Arc<dyn ReceiptEnvelopeProducer>,
}

impl ReceiptSubmissionService {
    pub fn new(
        extractor: Arc<dyn ReceiptExtractor>,
        producer: Arc<dyn ReceiptEnvelopeProducer>,
    ) -> Self {
        Self {
            extractor,
            producer,
        }
    }

    #[instrument(skip_all, fields(user_id = user.id, image_bytes = image.len()))]
    pub async fn submit(&self, user: Submitter, image: &[u8]) -> DomainResult<String> {
        let completion_text = self.extractor.extract(image).await?;
        debug!(text_length = completion_text.len(), "receipt text extracted");

        let envelope = ReceiptEnvelope::receipt_extraction(user, &completion_text);
        self.producer.publish(&envelope).await?;

        info!(
            total_amount = ?envelope.total_amount,
            date = ?envelope.date,
            "receipt submitted for processing"
        );
        Ok(completion_text)
    }
}
