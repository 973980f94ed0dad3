mod envelope_consumer_service;
mod receipt_envelope_producer;

pub use envelope_consumer_service::*;
pub use receipt_envelope_producer::*;
