//! Persistence layer for payment records
//!
//! This module provides:
//! - [`PaymentStore`] trait for reading pending records and writing push outcomes
//! - [`PostgresPaymentStore`] for production
//! - [`InMemoryPaymentStore`] for testing

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;
pub use store::{PaymentStore, PendingQuery, StoreError};
