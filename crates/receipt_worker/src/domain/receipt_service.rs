use common::domain::{DecodedEnvelope, DomainResult, NewReceipt, ReceiptRepository};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Domain service for receipt storage
pub struct ReceiptService {
    repository: Arc<dyn ReceiptRepository>,
}

impl ReceiptService {
    pub fn new(repository: Arc<dyn ReceiptRepository>) -> Self {
        Self { repository }
    }

    /// Project a `receipt_extraction` envelope onto a receipt row and insert it.
    ///
    /// `total_amount` and `date` come from the top level when present and
    /// from the nested `receipt` object otherwise. Every call inserts a new
    /// row, so a redelivered message is stored twice.
    #[instrument(skip_all, fields(user_id = ?envelope.user_id()))]
    pub async fn store_receipt(&self, envelope: &DecodedEnvelope) -> DomainResult<()> {
        let receipt = NewReceipt::from(envelope);

        debug!(
            total_amount = ?receipt.total_amount,
            date = ?receipt.date,
            "storing receipt"
        );

        self.repository.insert_receipt(receipt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MockReceiptRepository};
    use serde_json::json;

    fn decode(body: serde_json::Value) -> DecodedEnvelope {
        DecodedEnvelope::decode(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_top_level_fields_win_over_receipt() {
        let mut mock_repo = MockReceiptRepository::new();
        mock_repo
            .expect_insert_receipt()
            .withf(|receipt: &NewReceipt| {
                receipt.total_amount == Some(20.0) && receipt.date.as_deref() == Some("2024-02-02")
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service = ReceiptService::new(Arc::new(mock_repo));
        let envelope = decode(json!({
            "action": "receipt_extraction",
            "user": { "id": 1, "username": "carol" },
            "total_amount": 20.0,
            "date": "2024-02-02",
            "receipt": { "total_amount": 5.0, "date": "2023-01-01" }
        }));

        assert!(service.store_receipt(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_falls_back_to_receipt_fields() {
        let mut mock_repo = MockReceiptRepository::new();
        mock_repo
            .expect_insert_receipt()
            .withf(|receipt: &NewReceipt| {
                receipt.user_id == Some(42)
                    && receipt.username.as_deref() == Some("alice")
                    && receipt.total_amount == Some(9.99)
                    && receipt.date.as_deref() == Some("2024-01-01")
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service = ReceiptService::new(Arc::new(mock_repo));
        let envelope = decode(json!({
            "action": "receipt_extraction",
            "user": { "id": 42, "username": "alice" },
            "total_amount": null,
            "date": null,
            "receipt": { "total_amount": 9.99, "date": "2024-01-01", "raw": null }
        }));

        assert!(service.store_receipt(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_raw_keeps_unknown_fields() {
        let body = json!({
            "action": "receipt_extraction",
            "user": { "id": 3 },
            "receipt": { "merchant": "Corner Shop", "items": [{ "name": "tea" }] },
            "extra": { "source": "bot" }
        });
        let expected = body.clone();

        let mut mock_repo = MockReceiptRepository::new();
        mock_repo
            .expect_insert_receipt()
            .withf(move |receipt: &NewReceipt| receipt.raw == expected)
            .times(1)
            .return_once(|_| Ok(()));

        let service = ReceiptService::new(Arc::new(mock_repo));
        assert!(service.store_receipt(&decode(body)).await.is_ok());
    }

    #[tokio::test]
    async fn test_repository_error_propagates() {
        let mut mock_repo = MockReceiptRepository::new();
        mock_repo.expect_insert_receipt().times(1).return_once(|_| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "Database connection failed"
            )))
        });

        let service = ReceiptService::new(Arc::new(mock_repo));
        let envelope = decode(json!({ "action": "receipt_extraction", "receipt": {} }));

        let result = service.store_receipt(&envelope).await;
        assert!(matches!(
            result.unwrap_err(),
            DomainError::RepositoryError(_)
        ));
    }
}
