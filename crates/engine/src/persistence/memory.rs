//! In-memory implementation of PaymentStore for testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

use super::store::*;
use crate::model::{PaymentRecord, PaymentUpdate};

/// Internal row state
#[derive(Debug, Clone)]
struct StoredPayment {
    record: PaymentRecord,
    client_code: String,
    status_pushed: Option<i32>,
    status_description: Option<String>,
}

/// In-memory implementation of PaymentStore
///
/// This is primarily for testing. It applies the same selection rules as the PostgreSQL
/// query and lets tests switch individual operations into failure.
///
/// # Example
///
/// ```
/// use status_pusher_engine::InMemoryPaymentStore;
///
/// let store = InMemoryPaymentStore::new();
/// store.set_ping_failing(true);
/// ```
pub struct InMemoryPaymentStore {
    payments: RwLock<BTreeMap<i64, StoredPayment>>,
    updates: RwLock<Vec<PaymentUpdate>>,
    executed: RwLock<Vec<String>>,
    ping_failing: AtomicBool,
    updates_failing: AtomicBool,
    statements_failing: AtomicBool,
    failing_clients: RwLock<Vec<String>>,
    fetch_calls: AtomicUsize,
    ping_calls: AtomicUsize,
}

impl InMemoryPaymentStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            payments: RwLock::new(BTreeMap::new()),
            updates: RwLock::new(Vec::new()),
            executed: RwLock::new(Vec::new()),
            ping_failing: AtomicBool::new(false),
            updates_failing: AtomicBool::new(false),
            statements_failing: AtomicBool::new(false),
            failing_clients: RwLock::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            ping_calls: AtomicUsize::new(0),
        }
    }

    /// Insert a record owned by `client_code`
    pub fn insert(&self, client_code: &str, record: PaymentRecord) {
        self.payments.write().insert(
            record.request_log_id,
            StoredPayment {
                record,
                client_code: client_code.to_string(),
                status_pushed: None,
                status_description: None,
            },
        );
    }

    /// Push status currently stored for a record
    pub fn status_of(&self, request_log_id: i64) -> Option<i32> {
        self.payments
            .read()
            .get(&request_log_id)
            .and_then(|p| p.status_pushed)
    }

    /// Status description currently stored for a record
    pub fn description_of(&self, request_log_id: i64) -> Option<String> {
        self.payments
            .read()
            .get(&request_log_id)
            .and_then(|p| p.status_description.clone())
    }

    /// Current copy of a record
    pub fn record(&self, request_log_id: i64) -> Option<PaymentRecord> {
        self.payments
            .read()
            .get(&request_log_id)
            .map(|p| p.record.clone())
    }

    /// Every successful update, in application order
    pub fn updates(&self) -> Vec<PaymentUpdate> {
        self.updates.read().clone()
    }

    /// Every successfully executed retry-log statement
    pub fn executed_statements(&self) -> Vec<String> {
        self.executed.read().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn set_ping_failing(&self, failing: bool) {
        self.ping_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_updates_failing(&self, failing: bool) {
        self.updates_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_statements_failing(&self, failing: bool) {
        self.statements_failing.store(failing, Ordering::SeqCst);
    }

    /// Make `fetch_pending` fail for one client
    pub fn fail_fetch_for(&self, client_code: &str) {
        self.failing_clients.write().push(client_code.to_string());
    }
}

impl Default for InMemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.ping_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("database unreachable".to_string()));
        }
        Ok(())
    }

    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<PaymentRecord>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_clients.read().contains(&query.client_code) {
            return Err(StoreError::Database(format!(
                "fetch failed for {}",
                query.client_code
            )));
        }

        let now = Utc::now();
        let retention = ChronoDuration::from_std(query.retention_window)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let oldest_first_send = now - retention;

        // BTreeMap iteration is ascending by request_log_id
        let records = self
            .payments
            .read()
            .values()
            .filter(|p| p.client_code == query.client_code)
            .filter(|p| p.status_pushed.map_or(true, |s| s == query.unprocessed_status))
            .filter(|p| query.statuses_to_push.contains(&p.record.overall_status))
            .filter(|p| p.record.next_send_time.map_or(true, |t| t <= now))
            .filter(|p| {
                p.record
                    .first_send_time
                    .map_or(true, |t| t >= oldest_first_send)
            })
            .take(query.bucket_size as usize)
            .map(|p| p.record.clone())
            .collect();

        Ok(records)
    }

    async fn update_payment(&self, update: &PaymentUpdate) -> Result<u64, StoreError> {
        if self.updates_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("update rejected".to_string()));
        }

        let now = Utc::now();
        let mut payments = self.payments.write();
        let rows = match payments.get_mut(&update.correlation_id) {
            Some(payment) => {
                payment.status_pushed = Some(update.status_code);
                payment.status_description = Some(update.description.clone());
                payment.record.last_send_time = Some(now);
                payment.record.next_send_time =
                    Some(now + ChronoDuration::seconds(update.next_send_interval_secs));
                if update.is_first_send && payment.record.first_send_time.is_none() {
                    payment.record.first_send_time = Some(now);
                }
                1
            }
            None => 0,
        };
        drop(payments);

        self.updates.write().push(update.clone());
        Ok(rows)
    }

    async fn execute_statement(&self, statement: &str) -> Result<u64, StoreError> {
        if self.statements_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("statement rejected".to_string()));
        }
        self.executed.write().push(statement.to_string());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(id: i64, overall_status: i32) -> PaymentRecord {
        PaymentRecord {
            transaction_id: format!("TX-{id}"),
            request_log_id: id,
            overall_status,
            service_id: 12,
            receipt_number: None,
            receiver_narration: None,
            first_send_time: None,
            last_send_time: None,
            next_send_time: None,
        }
    }

    fn query(client_code: &str, bucket_size: u32) -> PendingQuery {
        PendingQuery {
            client_code: client_code.to_string(),
            unprocessed_status: 0,
            statuses_to_push: vec![140, 141],
            retention_window: Duration::from_secs(3600),
            bucket_size,
        }
    }

    #[tokio::test]
    async fn test_fetch_orders_and_caps() {
        let store = InMemoryPaymentStore::new();
        for id in [5, 3, 9, 1] {
            store.insert("ACME", record(id, 140));
        }
        store.insert("OTHER", record(2, 140));

        let records = store.fetch_pending(&query("ACME", 3)).await.unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.request_log_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_fetch_filters_status_schedule_and_retention() {
        let store = InMemoryPaymentStore::new();
        store.insert("ACME", record(1, 999));

        let mut not_due = record(2, 140);
        not_due.next_send_time = Some(Utc::now() + ChronoDuration::hours(1));
        store.insert("ACME", not_due);

        let mut abandoned = record(3, 140);
        abandoned.first_send_time = Some(Utc::now() - ChronoDuration::hours(2));
        store.insert("ACME", abandoned);

        let mut due = record(4, 141);
        due.first_send_time = Some(Utc::now() - ChronoDuration::minutes(5));
        due.next_send_time = Some(Utc::now() - ChronoDuration::seconds(1));
        store.insert("ACME", due);

        let records = store.fetch_pending(&query("ACME", 50)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_log_id, 4);
    }

    #[tokio::test]
    async fn test_update_is_idempotent_for_first_send() {
        let store = InMemoryPaymentStore::new();
        store.insert("ACME", record(7, 140));

        let update = PaymentUpdate::new(7, 1, "delivered", 300, true);
        assert_eq!(store.update_payment(&update).await.unwrap(), 1);
        let first = store.record(7).unwrap().first_send_time;
        assert!(first.is_some());

        store.update_payment(&update).await.unwrap();
        assert_eq!(store.record(7).unwrap().first_send_time, first);
        assert_eq!(store.status_of(7), Some(1));
        assert_eq!(store.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_processed_records_are_not_fetched_again() {
        let store = InMemoryPaymentStore::new();
        store.insert("ACME", record(7, 140));
        store
            .update_payment(&PaymentUpdate::new(7, 1, "delivered", 0, true))
            .await
            .unwrap();

        assert!(store.fetch_pending(&query("ACME", 50)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryPaymentStore::new();
        store.set_ping_failing(true);
        assert!(matches!(store.ping().await, Err(StoreError::Connection(_))));

        store.fail_fetch_for("ACME");
        assert!(store.fetch_pending(&query("ACME", 1)).await.is_err());

        store.set_updates_failing(true);
        let update = PaymentUpdate::new(1, 0, "x", 1, false);
        assert!(store.update_payment(&update).await.is_err());
        assert!(store.updates().is_empty());
    }
}
