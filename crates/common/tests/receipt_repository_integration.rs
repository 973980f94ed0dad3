#![cfg(feature = "integration-tests")]

use common::domain::{DecodedEnvelope, DomainError, NewReceipt, ReceiptRepository};
use common::postgres::{PostgresClient, PostgresReceiptRepository};
use serde_json::json;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

const CREATE_RECEIPTS_TABLE: &str = "CREATE TABLE receipts (
    user_id BIGINT,
    username TEXT,
    total_amount NUMERIC,
    date DATE,
    raw JSONB
)";

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let client = PostgresClient::from_url(&url, 2).expect("Failed to create client");
    client.ping().await.expect("Postgres not reachable");

    let conn = client.get_connection().await.unwrap();
    conn.batch_execute(CREATE_RECEIPTS_TABLE).await.unwrap();

    (postgres, client)
}

async fn count_rows(client: &PostgresClient) -> i64 {
    let conn = client.get_connection().await.unwrap();
    conn.query_one("SELECT COUNT(*) FROM receipts", &[])
        .await
        .unwrap()
        .get(0)
}

fn receipt_from(body: &serde_json::Value) -> NewReceipt {
    let envelope = DecodedEnvelope::decode(body.to_string().as_bytes()).unwrap();
    NewReceipt::from(&envelope)
}

#[tokio::test]
async fn test_insert_receipt_stores_projection_and_raw_envelope() {
    let (_container, client) = setup_test_db().await;
    let repository = PostgresReceiptRepository::new(client.clone());

    let body = json!({
        "action": "receipt_extraction",
        "user": { "id": 42, "username": "alice" },
        "total_amount": null,
        "date": null,
        "receipt": { "total_amount": 9.99, "date": "2024-01-01", "raw": null }
    });

    repository.insert_receipt(receipt_from(&body)).await.unwrap();

    let conn = client.get_connection().await.unwrap();
    let row = conn
        .query_one(
            "SELECT user_id, username, total_amount::FLOAT8, date::TEXT, raw FROM receipts",
            &[],
        )
        .await
        .unwrap();

    assert_eq!(row.get::<_, i64>(0), 42);
    assert_eq!(row.get::<_, String>(1), "alice");
    assert_eq!(row.get::<_, f64>(2), 9.99);
    assert_eq!(row.get::<_, String>(3), "2024-01-01");
    assert_eq!(row.get::<_, serde_json::Value>(4), body);
}

#[tokio::test]
async fn test_missing_fields_are_stored_as_null() {
    let (_container, client) = setup_test_db().await;
    let repository = PostgresReceiptRepository::new(client.clone());

    let body = json!({ "action": "receipt_extraction", "receipt": {} });
    repository.insert_receipt(receipt_from(&body)).await.unwrap();

    let conn = client.get_connection().await.unwrap();
    let row = conn
        .query_one(
            "SELECT user_id IS NULL, username IS NULL, total_amount IS NULL, date IS NULL FROM receipts",
            &[],
        )
        .await
        .unwrap();

    for column in 0..4 {
        assert!(row.get::<_, bool>(column));
    }
}

#[tokio::test]
async fn test_duplicate_inserts_create_two_rows() {
    let (_container, client) = setup_test_db().await;
    let repository = PostgresReceiptRepository::new(client.clone());

    let body = json!({
        "action": "receipt_extraction",
        "user": { "id": 7, "username": "bob" },
        "total_amount": 12.5,
        "date": "2024-03-05",
        "receipt": {}
    });

    repository.insert_receipt(receipt_from(&body)).await.unwrap();
    repository.insert_receipt(receipt_from(&body)).await.unwrap();

    assert_eq!(count_rows(&client).await, 2);
}

#[tokio::test]
async fn test_unparsable_date_is_a_repository_error() {
    let (_container, client) = setup_test_db().await;
    let repository = PostgresReceiptRepository::new(client.clone());

    let body = json!({
        "action": "receipt_extraction",
        "user": { "id": 7 },
        "date": "last tuesday",
        "receipt": {}
    });

    let result = repository.insert_receipt(receipt_from(&body)).await;

    assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    assert_eq!(count_rows(&client).await, 0);
}
