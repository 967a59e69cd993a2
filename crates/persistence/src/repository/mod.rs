//! Repository implementations for database operations

pub mod revenue;
pub mod sales;

pub use revenue::*;
pub use sales::*;
