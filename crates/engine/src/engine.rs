//! Push cycle orchestration
//!
//! One call to [`StatusPusher::run_cycle`] is one pass of the daemon loop:
//!
//! 1. Health gate. Nothing else runs unless the database answers and the engine is RUNNING.
//! 2. Reconciliation. The retry log is replayed before any new outcome can be written.
//! 3. Dispatch. Each client's bucket is fetched and drained through its own pool.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::EngineError;
use crate::health::{EngineState, Gate, HealthMonitor};
use crate::job::JobContext;
use crate::model::RouteTable;
use crate::persistence::PaymentStore;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::reliability::RetryPolicy;
use crate::retry_log::RetryLog;
use crate::wrapper::WrapperClient;

/// State shared between the engine and its owner
///
/// The owner swaps the route table between cycles and watches the drained signal to know
/// when no pool is running.
pub struct EngineShared {
    routes: RwLock<Arc<RouteTable>>,
    drained: watch::Sender<bool>,
}

impl EngineShared {
    pub fn new(routes: RouteTable) -> Self {
        let (drained, _) = watch::channel(true);
        Self {
            routes: RwLock::new(Arc::new(routes)),
            drained,
        }
    }

    /// Snapshot of the current route table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    /// Replace the route table, returning the previous one
    ///
    /// Jobs already running keep the routes they were dispatched with.
    pub fn swap_routes(&self, routes: RouteTable) -> Arc<RouteTable> {
        std::mem::replace(&mut *self.routes.write(), Arc::new(routes))
    }

    /// Receiver that reads `true` whenever no dispatch pool is running
    pub fn drained(&self) -> watch::Receiver<bool> {
        self.drained.subscribe()
    }

    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    /// Wait until no dispatch pool is running
    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|drained| *drained).await;
    }

    pub(crate) fn mark_busy(&self) {
        self.drained.send_replace(false);
    }

    pub(crate) fn mark_drained(&self) {
        self.drained.send_replace(true);
    }
}

impl Default for EngineShared {
    fn default() -> Self {
        Self::new(RouteTable::new())
    }
}

/// Everything a completed cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub reconciled: ReconcileReport,
    pub dispatches: Vec<DispatchReport>,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Database healthy; retry log replayed and clients dispatched
    Completed(CycleReport),
    /// Engine moved from RESUMING back to RUNNING; no work this cycle
    Resumed,
    /// Database answered again after an outage; engine is RESUMING
    Recovered,
    /// Shutdown was requested before any work started
    Cancelled,
}

/// The push engine
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use status_pusher_engine::{EngineConfig, EngineShared, InMemoryPaymentStore, StatusPusher};
///
/// let shared = Arc::new(EngineShared::new(routes));
/// let mut pusher = StatusPusher::new(
///     Arc::new(InMemoryPaymentStore::new()),
///     EngineConfig::new("http://wrapper.local/push"),
///     shared,
/// )?;
///
/// let (_stop, mut shutdown) = tokio::sync::watch::channel(false);
/// let outcome = pusher.run_cycle(&mut shutdown).await?;
/// ```
pub struct StatusPusher {
    config: Arc<EngineConfig>,
    shared: Arc<EngineShared>,
    health: HealthMonitor,
    reconciler: Reconciler,
    dispatcher: Dispatcher,
}

impl StatusPusher {
    /// Validate the configuration and wire the engine together
    pub fn new(
        store: Arc<dyn PaymentStore>,
        config: EngineConfig,
        shared: Arc<EngineShared>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);

        let wrapper = WrapperClient::new(
            config.wrapper_url.clone(),
            config.connect_timeout,
            config.reply_timeout,
        )?;
        let retry_log = Arc::new(RetryLog::new(config.retry_log_path.clone()));

        let health = HealthMonitor::new(Arc::clone(&store), config.sleep_time);
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&retry_log),
            RetryPolicy::fixed(config.sleep_time, config.max_failed_query_retries),
        );
        let ctx = Arc::new(JobContext {
            store,
            wrapper,
            config: Arc::clone(&config),
            retry_log,
        });
        let dispatcher = Dispatcher::new(ctx, Arc::clone(&shared));

        Ok(Self {
            config,
            shared,
            health,
            reconciler,
            dispatcher,
        })
    }

    pub fn state(&self) -> EngineState {
        self.health.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Run one cycle
    ///
    /// Only [`EngineError::ReconciliationExhausted`] and retry log I/O failures are returned;
    /// per-client and per-job failures are logged and reported in the [`CycleReport`].
    pub async fn run_cycle(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, EngineError> {
        let cycle_id = Uuid::now_v7();
        let span = info_span!("push_cycle", %cycle_id);

        async move {
            if *shutdown.borrow() {
                return Ok(CycleOutcome::Cancelled);
            }

            match self.health.gate(shutdown).await {
                Gate::Proceed => {}
                Gate::Resumed => return Ok(CycleOutcome::Resumed),
                Gate::Recovered => return Ok(CycleOutcome::Recovered),
                Gate::Shutdown => return Ok(CycleOutcome::Cancelled),
            }

            let reconciled = self.reconciler.run().await?;
            let dispatches = self.dispatcher.run(shutdown).await;
            info!(
                clients = dispatches.len(),
                replayed = reconciled.applied,
                "cycle finished"
            );

            Ok(CycleOutcome::Completed(CycleReport {
                cycle_id,
                reconciled,
                dispatches,
            }))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClientRoute;

    fn route(url: &str) -> ClientRoute {
        ClientRoute {
            url: url.to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            protocol: "REST".to_string(),
            method: "POST".to_string(),
            tls_enabled: false,
            tls_cert_path: None,
        }
    }

    #[test]
    fn test_swap_routes_keeps_old_snapshots_alive() {
        let mut table = RouteTable::new();
        table.insert("ACME", route("https://old"));
        let shared = EngineShared::new(table);

        let snapshot = shared.routes();
        let mut next = RouteTable::new();
        next.insert("ACME", route("https://new"));
        let previous = shared.swap_routes(next);

        assert_eq!(snapshot.get("ACME").unwrap().url, "https://old");
        assert_eq!(previous.get("ACME").unwrap().url, "https://old");
        assert_eq!(shared.routes().get("ACME").unwrap().url, "https://new");
    }

    #[tokio::test]
    async fn test_drained_signal() {
        let shared = Arc::new(EngineShared::default());
        assert!(shared.is_drained());

        shared.mark_busy();
        let mut rx = shared.drained();
        assert!(!*rx.borrow_and_update());

        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.wait_drained().await })
        };
        shared.mark_drained();
        waiter.await.unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = StatusPusher::new(
            Arc::new(crate::persistence::InMemoryPaymentStore::new()),
            EngineConfig::new("").with_bucket_size(0),
            Arc::new(EngineShared::default()),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
