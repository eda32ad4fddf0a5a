//! Reconciliation: replay stored update statements before any new dispatch

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::error::EngineError;
use crate::model::is_update_statement;
use crate::persistence::PaymentStore;
use crate::reliability::RetryPolicy;
use crate::retry_log::RetryLog;

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Statements applied and removed from the log
    pub applied: usize,
    /// Lines that are not update statements and were left alone
    pub ignored: usize,
}

/// Replays the retry log against the store
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    retry_log: Arc<RetryLog>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PaymentStore>, retry_log: Arc<RetryLog>, policy: RetryPolicy) -> Self {
        Self {
            store,
            retry_log,
            policy,
        }
    }

    /// Apply every pending statement in file order
    ///
    /// A statement that keeps failing stops the pass with
    /// [`EngineError::ReconciliationExhausted`] and stays in the log.
    #[instrument(skip(self), fields(path = %self.retry_log.path().display()))]
    pub async fn run(&self) -> Result<ReconcileReport, EngineError> {
        let pending = self.retry_log.read_pending().await?;
        let mut report = ReconcileReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        info!(count = pending.len(), "replaying retry log");
        for statement in pending {
            if !is_update_statement(&statement) {
                warn!(line = %statement, "ignoring retry log line that is not an update");
                report.ignored += 1;
                continue;
            }
            self.apply(&statement).await?;
            self.retry_log.remove(&statement).await?;
            report.applied += 1;
        }

        info!(applied = report.applied, ignored = report.ignored, "retry log replayed");
        Ok(report)
    }

    async fn apply(&self, statement: &str) -> Result<(), EngineError> {
        let mut attempt = 1;
        loop {
            match self.store.execute_statement(statement).await {
                Ok(rows) => {
                    if rows == 0 {
                        warn!(statement, "replayed statement matched no record");
                    }
                    return Ok(());
                }
                Err(e) if self.policy.has_attempts_remaining(attempt) => {
                    warn!(attempt, error = %e, "replay failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, statement, "replay failed, giving up");
                    return Err(EngineError::ReconciliationExhausted {
                        statement: statement.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPaymentStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, attempts: u32) -> (Arc<InMemoryPaymentStore>, Arc<RetryLog>, Reconciler) {
        let store = Arc::new(InMemoryPaymentStore::new());
        let log = Arc::new(RetryLog::new(dir.path().join("FAILED_QUERIES.TXT")));
        let reconciler = Reconciler::new(
            store.clone(),
            log.clone(),
            RetryPolicy::fixed(Duration::from_secs(5), attempts),
        );
        (store, log, reconciler)
    }

    #[tokio::test]
    async fn test_empty_log_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (store, _log, reconciler) = setup(&dir, 3);
        assert_eq!(reconciler.run().await.unwrap(), ReconcileReport::default());
        assert!(store.executed_statements().is_empty());
    }

    #[tokio::test]
    async fn test_applied_lines_are_removed_and_others_kept() {
        let dir = TempDir::new().unwrap();
        let (store, log, reconciler) = setup(&dir, 3);
        log.append("UPDATE s_payments SET status_pushed = 1 WHERE request_log_id = 1")
            .await
            .unwrap();
        log.append("DELETE FROM s_payments").await.unwrap();
        log.append("update s_payments SET status_pushed = 2 WHERE request_log_id = 2")
            .await
            .unwrap();

        let report = reconciler.run().await.unwrap();
        assert_eq!(report, ReconcileReport { applied: 2, ignored: 1 });
        assert_eq!(store.executed_statements().len(), 2);
        assert_eq!(log.read_pending().await.unwrap(), vec!["DELETE FROM s_payments"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_fatal_and_keeps_line() {
        let dir = TempDir::new().unwrap();
        let (store, log, reconciler) = setup(&dir, 3);
        store.set_statements_failing(true);
        let line = "UPDATE s_payments SET status_pushed = 1 WHERE request_log_id = 9001";
        log.append(line).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = reconciler.run().await.unwrap_err();
        match err {
            EngineError::ReconciliationExhausted { statement, attempts } => {
                assert_eq!(statement, line);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(log.read_pending().await.unwrap(), vec![line]);
    }
}
