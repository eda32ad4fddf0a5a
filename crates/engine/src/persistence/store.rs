//! PaymentStore trait definition

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{PaymentRecord, PaymentUpdate};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database unreachable or connection pool exhausted
    #[error("connection error: {0}")]
    Connection(String),

    /// Query failed
    #[error("database error: {0}")]
    Database(String),

    /// A row could not be decoded into a record
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                Self::Decode(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Arguments of the "select pending records" operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub client_code: String,
    pub unprocessed_status: i32,
    /// Overall statuses eligible for a push
    pub statuses_to_push: Vec<i32>,
    pub retention_window: Duration,
    pub bucket_size: u32,
}

/// Store for payment records
///
/// Implementations must be thread-safe: every push job calls `update_payment` concurrently
/// and each call acquires its own connection.
#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    /// Trivial round trip proving the database answers
    async fn ping(&self) -> Result<(), StoreError>;

    /// Records due for a push, ascending by correlation key, at most `bucket_size`
    ///
    /// The result is fully materialized so no cursor outlives the call.
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<PaymentRecord>, StoreError>;

    /// Apply a push outcome to a record, returning the number of rows touched
    async fn update_payment(&self, update: &PaymentUpdate) -> Result<u64, StoreError>;

    /// Execute a materialized statement read back from the retry log
    async fn execute_statement(&self, statement: &str) -> Result<u64, StoreError>;
}
