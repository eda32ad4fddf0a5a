//! Bucket fetch and dispatch, one client at a time

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::engine::EngineShared;
use crate::job::{JobContext, JobOutcome, PushJob};
use crate::model::ClientRoute;
use crate::persistence::PendingQuery;
use crate::pool::{DispatchPool, DrainOutcome};

/// Job outcome counts for one client batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTally {
    pub updated: usize,
    pub deferred: usize,
    pub unmapped: usize,
    pub skipped: usize,
    pub panicked: usize,
}

impl JobTally {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Updated(_) => self.updated += 1,
            JobOutcome::Deferred(_) => self.deferred += 1,
            JobOutcome::Unmapped => self.unmapped += 1,
            JobOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// How a client's dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Nothing was due
    Empty,
    /// A pool ran and drained
    Drained(DrainOutcome),
    /// The pending-records query failed; the client is retried next cycle
    FetchFailed(String),
}

/// What happened for one client in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub client_code: String,
    pub fetched: usize,
    /// Pool size used for the batch
    pub workers: usize,
    pub submitted: usize,
    pub tally: JobTally,
    pub status: DispatchStatus,
}

impl DispatchReport {
    fn new(client_code: &str, status: DispatchStatus) -> Self {
        Self {
            client_code: client_code.to_string(),
            fetched: 0,
            workers: 0,
            submitted: 0,
            tally: JobTally::default(),
            status,
        }
    }
}

/// Fetches each client's bucket and runs a pool over it
pub struct Dispatcher {
    ctx: Arc<JobContext>,
    shared: Arc<EngineShared>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<JobContext>, shared: Arc<EngineShared>) -> Self {
        Self { ctx, shared }
    }

    /// Dispatch every routed client in code order
    ///
    /// The route table is snapshotted once, so a swap mid-cycle takes effect next cycle.
    /// A shutdown request stops the loop between clients.
    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Vec<DispatchReport> {
        let routes = self.shared.routes();
        if routes.is_empty() {
            warn!("no client routes configured, nothing to dispatch");
        }

        let mut reports = Vec::with_capacity(routes.len());
        for (client_code, route) in routes.iter() {
            if *shutdown.borrow() {
                info!("shutdown requested, skipping remaining clients");
                break;
            }
            reports.push(self.dispatch_client(client_code, route).await);
        }
        reports
    }

    #[instrument(skip(self, route))]
    async fn dispatch_client(&self, client_code: &str, route: &Arc<ClientRoute>) -> DispatchReport {
        let config = &self.ctx.config;
        let query = PendingQuery {
            client_code: client_code.to_string(),
            unprocessed_status: config.status_codes.unprocessed,
            statuses_to_push: config.statuses_to_push.clone(),
            retention_window: config.retention_window,
            bucket_size: config.bucket_size,
        };

        // The store returns a materialized batch, so no connection is held through the drain
        let records = match self.ctx.store.fetch_pending(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to fetch pending records");
                return DispatchReport::new(client_code, DispatchStatus::FetchFailed(e.to_string()));
            }
        };

        if records.is_empty() {
            info!("no pending records");
            return DispatchReport::new(client_code, DispatchStatus::Empty);
        }

        let fetched = records.len();
        let workers = DispatchPool::<JobOutcome>::size_for(fetched, config.max_workers);
        info!(fetched, workers, "dispatching batch");

        self.shared.mark_busy();
        let mut pool = DispatchPool::new(workers);
        let mut submitted = 0;
        for record in records {
            let job = PushJob::new(client_code, Arc::clone(route), record);
            match pool.submit(job.run(Arc::clone(&self.ctx))) {
                Ok(()) => submitted += 1,
                Err(e) => error!(error = %e, "failed to submit push job"),
            }
        }

        let drain = pool.shutdown_and_await(config.pool_grace_period).await;
        self.shared.mark_drained();

        let mut tally = JobTally {
            panicked: drain.panicked,
            ..JobTally::default()
        };
        for outcome in &drain.results {
            tally.record(outcome);
        }
        info!(
            updated = tally.updated,
            deferred = tally.deferred,
            unmapped = tally.unmapped,
            skipped = tally.skipped,
            outcome = ?drain.outcome,
            "batch finished"
        );

        DispatchReport {
            client_code: client_code.to_string(),
            fetched,
            workers,
            submitted,
            tally,
            status: DispatchStatus::Drained(drain.outcome),
        }
    }
}
