pub mod amqp;
pub mod domain;
pub mod postgres;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use amqp::InMemoryQueue;
#[cfg(any(test, feature = "testing"))]
pub use amqp::MockDeliverySource;
#[cfg(any(test, feature = "testing"))]
pub use amqp::MockQueueConnector;
#[cfg(any(test, feature = "testing"))]
pub use amqp::MockQueuePublisher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockReceiptEnvelopeProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockReceiptExtractor;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockReceiptRepository;
