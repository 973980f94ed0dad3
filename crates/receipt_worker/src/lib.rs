pub mod amqp;
pub mod domain;
pub mod receipt_worker;

pub use amqp::*;
pub use domain::*;
pub use receipt_worker::*;
