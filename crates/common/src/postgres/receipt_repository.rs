use crate::domain::{DomainError, DomainResult, NewReceipt, ReceiptRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, info};

/// Amounts are bound as FLOAT8 and widened to NUMERIC by the column; dates
/// travel as text and are parsed by Postgres, so an unparsable date fails
/// the insert.
const INSERT_RECEIPT_SQL: &str = "INSERT INTO receipts (user_id, username, total_amount, date, raw)
     VALUES ($1, $2, $3::FLOAT8, $4::TEXT::DATE, $5)";

#[derive(Clone)]
pub struct PostgresReceiptRepository {
    client: PostgresClient,
}

impl PostgresReceiptRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReceiptRepository for PostgresReceiptRepository {
    async fn insert_receipt(&self, receipt: NewReceipt) -> DomainResult<()> {
        debug!(
            user_id = ?receipt.user_id,
            total_amount = ?receipt.total_amount,
            date = ?receipt.date,
            "Inserting receipt into database"
        );

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            INSERT_RECEIPT_SQL,
            &[
                &receipt.user_id,
                &receipt.username,
                &receipt.total_amount,
                &receipt.date,
                &receipt.raw,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        info!(user_id = ?receipt.user_id, "Receipt stored");
        Ok(())
    }
}
