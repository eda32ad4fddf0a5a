//! PostgreSQL implementation of PaymentStore
//!
//! Reads pending rows from `s_payments` joined with `s_request_logs` and `clients`, and
//! writes push outcomes back to `s_payments`.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::model::{PaymentRecord, PaymentUpdate};

const PENDING_QUERY: &str = r#"
    SELECT p.payer_transaction_id, p.request_log_id, p.status_first_send,
           p.status_last_send, p.status_next_send, p.receipt_number,
           p.receiver_narration, rl.service_id, rl.overall_status
    FROM s_payments p
    INNER JOIN s_request_logs rl ON p.request_log_id = rl.request_log_id
    LEFT JOIN clients cl ON p.payer_client_id = cl.client_id
    WHERE (p.status_pushed = $1 OR p.status_pushed IS NULL)
      AND rl.overall_status = ANY($2)
      AND cl.client_code = $3
      AND (p.status_next_send <= NOW() OR p.status_next_send IS NULL)
      AND (p.status_first_send >= NOW() - ($4::bigint * INTERVAL '1 second')
           OR p.status_first_send IS NULL)
    ORDER BY p.request_log_id ASC
    LIMIT $5
"#;

/// PostgreSQL implementation of PaymentStore
///
/// # Example
///
/// ```ignore
/// use status_pusher_engine::PostgresPaymentStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/payments").await?;
/// let store = PostgresPaymentStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT 1 AS test")
            .fetch_one(&self.pool)
            .await?;
        let value: i32 = row.try_get("test")?;
        if value == 1 {
            Ok(())
        } else {
            Err(StoreError::Database(format!("ping returned {value}")))
        }
    }

    #[instrument(skip(self), fields(client_code = %query.client_code))]
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<PaymentRecord>, StoreError> {
        let rows = sqlx::query(PENDING_QUERY)
            .bind(query.unprocessed_status)
            .bind(&query.statuses_to_push)
            .bind(&query.client_code)
            .bind(query.retention_window.as_secs() as i64)
            .bind(i64::from(query.bucket_size))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to fetch pending records: {}", e);
                StoreError::from(e)
            })?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = records.len(), "fetched pending records");
        Ok(records)
    }

    #[instrument(skip(self, update), fields(request_log_id = update.correlation_id))]
    async fn update_payment(&self, update: &PaymentUpdate) -> Result<u64, StoreError> {
        let sql = update.parameterized_sql();
        let result = sqlx::query(&sql)
            .bind(update.status_code)
            .bind(&update.description)
            .bind(update.next_send_interval_secs)
            .bind(update.correlation_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn execute_statement(&self, statement: &str) -> Result<u64, StoreError> {
        let result = sqlx::raw_sql(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &PgRow) -> Result<PaymentRecord, StoreError> {
    Ok(PaymentRecord {
        transaction_id: row
            .try_get::<Option<String>, _>("payer_transaction_id")?
            .unwrap_or_default(),
        request_log_id: row.try_get("request_log_id")?,
        overall_status: row.try_get("overall_status")?,
        service_id: row.try_get("service_id")?,
        receipt_number: row.try_get("receipt_number")?,
        receiver_narration: row.try_get("receiver_narration")?,
        first_send_time: row.try_get("status_first_send")?,
        last_send_time: row.try_get("status_last_send")?,
        next_send_time: row.try_get("status_next_send")?,
    })
}
