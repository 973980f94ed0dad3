mod envelope_dispatcher;
mod receipt_service;
mod receipt_submission_service;

pub use envelope_dispatcher::*;
pub use receipt_service::*;
pub use receipt_submission_service::*;
