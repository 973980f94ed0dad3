mod config;

use common::amqp::{AmqpConnector, ReconnectPolicy};
use common::postgres::{PostgresClient, PostgresReceiptRepository};
use common::telemetry::{init_telemetry, TelemetryConfig};
use crate::config::ServiceConfig;
use receipt_runner::Runner;
use receipt_worker::{ReceiptWorker, ReceiptWorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "receipt-processor";

/// Unacknowledged deliveries a worker may hold
const PREFETCH_COUNT: u16 = 1;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: SERVICE_NAME.to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    }) {
        eprintln!("Failed to initialize telemetry: {:#}", e);
        std::process::exit(1);
    }

    info!(
        queue = %config.queue_name,
        consumer_tag = %config.consumer_tag,
        "Starting receipt-processor service"
    );
    debug!(
        database_pool_size = config.database_pool_size,
        reconnect_backoff_secs = config.reconnect_backoff_secs,
        reconnect_max_backoff_secs = config.reconnect_max_backoff_secs,
        shutdown_timeout_secs = config.shutdown_timeout_secs,
        "Configuration loaded"
    );

    let postgres = match initialize_postgres(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize PostgreSQL: {:#}", e);
            std::process::exit(1);
        }
    };

    let connector = AmqpConnector::new(
        config.rabbitmq_url.clone(),
        config.queue_name.clone(),
        config.consumer_tag.clone(),
        PREFETCH_COUNT,
    );
    let repository = PostgresReceiptRepository::new(postgres.clone());

    let worker = ReceiptWorker::new(
        Arc::new(connector),
        Arc::new(repository),
        ReceiptWorkerConfig {
            queue_name: config.queue_name.clone(),
            reconnect_policy: ReconnectPolicy::from_bounds(
                Duration::from_secs(config.reconnect_backoff_secs),
                Duration::from_secs(config.reconnect_max_backoff_secs),
            ),
        },
    );

    Runner::new()
        .with_named_process("receipt_worker", worker.into_runner_process())
        .with_closer(move || async move {
            postgres.close();
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn initialize_postgres(config: &ServiceConfig) -> anyhow::Result<PostgresClient> {
    let client = PostgresClient::from_url(&config.database_url, config.database_pool_size)?;

    tokio::time::timeout(
        Duration::from_secs(config.startup_timeout_secs),
        client.ping(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for PostgreSQL"))??;

    info!("Connected to PostgreSQL");
    Ok(client)
}
