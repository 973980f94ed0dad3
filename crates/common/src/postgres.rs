mod client;
mod receipt_repository;

pub use client::*;
pub use receipt_repository::*;
