mod client;
mod connector;
mod consumer;
#[cfg(any(test, feature = "testing"))]
mod in_memory;
mod middleware;
mod traits;

pub use client::*;
pub use connector::*;
pub use consumer::*;
#[cfg(any(test, feature = "testing"))]
pub use in_memory::*;
pub use middleware::*;
pub use traits::*;
