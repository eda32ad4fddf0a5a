//! End-to-end push cycles against the in-memory store and a mock wrapper
//!
//! Run with: cargo test -p status-pusher-engine --test push_cycle_test

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use async_trait::async_trait;
use parking_lot::Mutex;
use status_pusher_engine::{
    ClientRoute, CycleOutcome, CycleReport, DispatchStatus, DrainOutcome, EngineConfig,
    EngineError, EngineShared, EngineState, InMemoryPaymentStore, PaymentRecord, PaymentStore,
    PaymentUpdate, PendingQuery, RetryLog, RouteTable, StatusPusher, StoreError,
};

/// Wrapper double that echoes the request's correlation ID
struct EchoWrapper {
    status_code: i64,
}

impl Respond for EchoWrapper {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&request.body);
        let echoed = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("beepTransactionID="))
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"statusCode":{},"statusDescription":"wrapper says ok","beepTransactionID":"{}"}}"#,
            self.status_code, echoed
        ))
    }
}

/// Echo wrapper that holds every reply back for `delay`
struct SlowEchoWrapper {
    delay: Duration,
}

impl Respond for SlowEchoWrapper {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        EchoWrapper { status_code: 1 }
            .respond(request)
            .set_delay(self.delay)
    }
}

fn route(url: &str) -> ClientRoute {
    ClientRoute {
        url: url.to_string(),
        username: "merchant".to_string(),
        password: "s3cret".to_string(),
        protocol: "REST".to_string(),
        method: "POST".to_string(),
        tls_enabled: false,
        tls_cert_path: None,
    }
}

fn routes(codes: &[&str]) -> RouteTable {
    codes
        .iter()
        .map(|code| {
            (
                code.to_string(),
                route(&format!("https://{}.example/cb", code.to_lowercase())),
            )
        })
        .collect()
}

fn record(id: i64, overall_status: i32) -> PaymentRecord {
    PaymentRecord {
        transaction_id: format!("TX-{id}"),
        request_log_id: id,
        overall_status,
        service_id: 7,
        receipt_number: Some(format!("R{id}")),
        receiver_narration: Some("school fees".to_string()),
        first_send_time: None,
        last_send_time: None,
        next_send_time: None,
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryPaymentStore>,
    shared: Arc<EngineShared>,
    pusher: StatusPusher,
    stop: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Harness {
    fn new(wrapper_url: &str, routes: RouteTable, tune: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryPaymentStore::new());
        let shared = Arc::new(EngineShared::new(routes));
        let config = tune(
            EngineConfig::new(wrapper_url)
                .with_sleep_time(Duration::from_millis(10))
                .with_timeouts(Duration::from_secs(1), Duration::from_secs(5))
                .with_pool_grace_period(Duration::from_secs(10))
                .with_retry_log_path(dir.path().join("FAILED_QUERIES.TXT")),
        );
        let pusher = StatusPusher::new(store.clone(), config, shared.clone()).unwrap();
        let (stop, shutdown) = watch::channel(false);
        Self {
            dir,
            store,
            shared,
            pusher,
            stop,
            shutdown,
        }
    }

    fn retry_log(&self) -> RetryLog {
        RetryLog::new(self.dir.path().join("FAILED_QUERIES.TXT"))
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, EngineError> {
        self.pusher.run_cycle(&mut self.shutdown).await
    }

    async fn completed_cycle(&mut self) -> CycleReport {
        match self.cycle().await.unwrap() {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }
}

async fn echo_wrapper(status_code: i64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(EchoWrapper { status_code })
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_batch_is_pushed_through_a_capped_pool() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| {
        c.with_max_workers(10).with_bucket_size(50)
    });
    for id in 1..=30 {
        h.store.insert("ACME", record(id, 140));
    }

    let report = h.completed_cycle().await;

    assert_eq!(report.dispatches.len(), 1);
    let acme = &report.dispatches[0];
    assert_eq!(acme.client_code, "ACME");
    assert_eq!(acme.fetched, 30);
    assert_eq!(acme.workers, 10);
    assert_eq!(acme.submitted, 30);
    assert_eq!(acme.tally.updated, 30);
    assert_eq!(acme.status, DispatchStatus::Drained(DrainOutcome::Completed));

    assert_eq!(server.received_requests().await.unwrap().len(), 30);
    for id in 1..=30 {
        assert_eq!(h.store.status_of(id), Some(1), "record {id}");
    }
    assert!(h.shared.is_drained());

    // Processed records are not fetched again
    let report = h.completed_cycle().await;
    assert_eq!(report.dispatches[0].status, DispatchStatus::Empty);
}

#[tokio::test]
async fn test_small_batch_sizes_pool_to_batch() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| c.with_max_workers(10));
    for id in 1..=3 {
        h.store.insert("ACME", record(id, 141));
    }

    let report = h.completed_cycle().await;
    assert_eq!(report.dispatches[0].workers, 3);
}

#[tokio::test]
async fn test_bucket_size_caps_each_cycle() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| c.with_bucket_size(4));
    for id in 1..=6 {
        h.store.insert("ACME", record(id, 140));
    }

    let report = h.completed_cycle().await;
    assert_eq!(report.dispatches[0].fetched, 4);
    assert_eq!(h.store.status_of(5), None);

    let report = h.completed_cycle().await;
    assert_eq!(report.dispatches[0].fetched, 2);
    assert_eq!(h.store.status_of(6), Some(1));
}

#[tokio::test]
async fn test_database_outage_suspends_work_until_resumed() {
    let mut h = Harness::new("http://127.0.0.1:9/push", routes(&["ACME"]), |c| c);
    h.store.set_ping_failing(true);

    let store = h.store.clone();
    let recovery = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_ping_failing(false);
    });

    assert_eq!(h.cycle().await.unwrap(), CycleOutcome::Recovered);
    assert_eq!(h.pusher.state(), EngineState::Resuming);
    assert!(h.store.ping_calls() > 1);
    assert_eq!(h.store.fetch_calls(), 0);
    recovery.await.unwrap();

    assert_eq!(h.cycle().await.unwrap(), CycleOutcome::Resumed);
    assert_eq!(h.pusher.state(), EngineState::Running);
    assert_eq!(h.store.fetch_calls(), 0);

    h.completed_cycle().await;
    assert_eq!(h.store.fetch_calls(), 1);
}

#[tokio::test]
async fn test_refused_update_is_logged_then_replayed() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| c);
    h.store.insert("ACME", record(9001, 140));
    h.store.set_updates_failing(true);

    let report = h.completed_cycle().await;
    assert_eq!(report.dispatches[0].tally.deferred, 1);

    let pending = h.retry_log().read_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].contains("WHERE request_log_id = 9001"));

    h.store.set_updates_failing(false);
    let report = h.completed_cycle().await;
    assert_eq!(report.reconciled.applied, 1);
    assert_eq!(h.store.executed_statements(), pending);
    assert!(h.retry_log().read_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_reconciliation_stops_before_dispatch() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| {
        c.with_max_failed_query_retries(3)
    });
    h.store.insert("ACME", record(1, 140));
    let line = "UPDATE s_payments SET status_pushed = 1 WHERE request_log_id = 9001";
    h.retry_log().append(line).await.unwrap();
    h.store.set_statements_failing(true);

    let err = h.cycle().await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::ReconciliationExhausted { attempts: 3, .. }
    ));
    assert_eq!(h.store.fetch_calls(), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(h.retry_log().read_pending().await.unwrap(), vec![line]);
}

#[tokio::test]
async fn test_undeliverable_status_never_reaches_wrapper() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |mut c| {
        c.statuses_to_push = vec![140, 999];
        c
    });
    h.store.insert("ACME", record(1, 999));
    h.store.insert("ACME", record(2, 140));

    let report = h.completed_cycle().await;

    assert_eq!(report.dispatches[0].tally.unmapped, 1);
    assert_eq!(h.store.status_of(1), Some(0));
    assert_eq!(
        h.store.description_of(1).as_deref(),
        Some("The overall status provided cannot be processed in this situation")
    );
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(String::from_utf8_lossy(&requests[0].body).contains("beepTransactionID=2"));
}

#[tokio::test]
async fn test_mismatched_echo_is_escalated_even_on_failed_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"statusCode":0,"statusDescription":"not delivered","beepTransactionID":77}"#,
        ))
        .mount(&server)
        .await;

    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| c);
    h.store.insert("ACME", record(2, 140));

    h.completed_cycle().await;
    assert_eq!(h.store.status_of(2), Some(2));
    assert_eq!(h.store.status_of(77), None);
}

#[tokio::test]
async fn test_stale_unacknowledged_record_is_failed() {
    let server = echo_wrapper(0).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| {
        c.with_ack_timeout(Duration::from_secs(86_400))
            .with_retention_window(Duration::from_secs(7 * 86_400))
    });
    let mut stale = record(3, 140);
    stale.first_send_time = Some(Utc::now() - ChronoDuration::days(2));
    stale.next_send_time = Some(Utc::now() - ChronoDuration::minutes(1));
    h.store.insert("ACME", stale);
    let mut fresh = record(4, 140);
    fresh.first_send_time = Some(Utc::now() - ChronoDuration::hours(1));
    h.store.insert("ACME", fresh);

    h.completed_cycle().await;

    assert_eq!(h.store.status_of(3), Some(3));
    assert_eq!(h.store.status_of(4), Some(0));
}

#[tokio::test]
async fn test_fetch_failure_is_isolated_to_its_client() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME", "BETA"]), |c| c);
    h.store.insert("ACME", record(1, 140));
    h.store.insert("BETA", record(2, 140));
    h.store.fail_fetch_for("ACME");

    let report = h.completed_cycle().await;

    assert!(matches!(
        report.dispatches[0].status,
        DispatchStatus::FetchFailed(_)
    ));
    assert_eq!(report.dispatches[1].client_code, "BETA");
    assert_eq!(h.store.status_of(1), None);
    assert_eq!(h.store.status_of(2), Some(1));
}

/// Store that records the order of fetches and updates
struct RecordingStore {
    inner: InMemoryPaymentStore,
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentStore for RecordingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<PaymentRecord>, StoreError> {
        self.events.lock().push(format!("fetch {}", query.client_code));
        self.inner.fetch_pending(query).await
    }

    async fn update_payment(&self, update: &PaymentUpdate) -> Result<u64, StoreError> {
        self.events
            .lock()
            .push(format!("update {}", update.correlation_id));
        self.inner.update_payment(update).await
    }

    async fn execute_statement(&self, statement: &str) -> Result<u64, StoreError> {
        self.inner.execute_statement(statement).await
    }
}

#[tokio::test]
async fn test_next_client_waits_for_previous_pool_to_drain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("acme.example"))
        .respond_with(SlowEchoWrapper {
            delay: Duration::from_millis(300),
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("beta.example"))
        .respond_with(EchoWrapper { status_code: 1 })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore {
        inner: InMemoryPaymentStore::new(),
        events: Mutex::new(Vec::new()),
    });
    for id in 1..=4 {
        store.inner.insert("ACME", record(id, 140));
    }
    store.inner.insert("BETA", record(10, 140));

    let shared = Arc::new(EngineShared::new(routes(&["ACME", "BETA"])));
    let config = EngineConfig::new(server.uri())
        .with_sleep_time(Duration::from_millis(10))
        .with_max_workers(4)
        .with_timeouts(Duration::from_secs(1), Duration::from_secs(5))
        .with_retry_log_path(dir.path().join("FAILED_QUERIES.TXT"));
    let mut pusher = StatusPusher::new(store.clone(), config, shared.clone()).unwrap();
    let (_stop, mut shutdown) = watch::channel(false);

    let outcome = pusher.run_cycle(&mut shutdown).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));

    let events = store.events.lock().clone();
    let beta_fetch = events.iter().position(|e| e == "fetch BETA").unwrap();
    let last_acme_update = events
        .iter()
        .rposition(|e| ["update 1", "update 2", "update 3", "update 4"].contains(&e.as_str()))
        .unwrap();
    assert!(
        last_acme_update < beta_fetch,
        "BETA fetched before ACME drained: {events:?}"
    );
    assert_eq!(events[0], "fetch ACME");
    assert_eq!(events.last().map(String::as_str), Some("update 10"));
    for id in [1, 2, 3, 4, 10] {
        assert_eq!(store.inner.status_of(id), Some(1), "record {id}");
    }
    assert!(shared.is_drained());
}

#[tokio::test]
async fn test_swapped_routes_apply_to_next_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("new.example"))
        .respond_with(EchoWrapper { status_code: 1 })
        .expect(1)
        .mount(&server)
        .await;

    let mut h = Harness::new(&server.uri(), RouteTable::new(), |c| c);
    h.store.insert("ACME", record(1, 140));

    let report = h.completed_cycle().await;
    assert!(report.dispatches.is_empty());

    let mut table = RouteTable::new();
    table.insert("ACME", route("https://new.example/cb"));
    h.shared.swap_routes(table);

    h.completed_cycle().await;
    assert_eq!(h.store.status_of(1), Some(1));
}

#[tokio::test]
async fn test_requested_shutdown_cancels_cycle() {
    let server = echo_wrapper(1).await;
    let mut h = Harness::new(&server.uri(), routes(&["ACME"]), |c| c);
    h.store.insert("ACME", record(1, 140));
    h.stop.send(true).unwrap();

    assert_eq!(h.cycle().await.unwrap(), CycleOutcome::Cancelled);
    assert_eq!(h.store.ping_calls(), 0);
}
