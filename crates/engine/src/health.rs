//! Database health gate
//!
//! ```text
//!            ping fails                     ping succeeds
//!  RUNNING ─────────────► INTERRUPTED ─────────────────────► RESUMING
//!     ▲                   (poll every sleep_time)               │
//!     └─────────────── one sleep interval on the next cycle ────┘
//! ```
//!
//! No reconciliation, fetch or dispatch runs unless the gate returns [`Gate::Proceed`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::persistence::PaymentStore;

/// Engine lifecycle state driven by health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Running,
    Interrupted,
    Resuming,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Interrupted => write!(f, "INTERRUPTED"),
            Self::Resuming => write!(f, "RESUMING"),
        }
    }
}

/// Result of a single ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    Healthy,
    Unhealthy,
}

/// What the cycle may do after the health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Database healthy and engine running: do the work
    Proceed,
    /// Engine came back from an outage and is running again; work starts next cycle
    Resumed,
    /// Database answered again after an outage; engine is resuming
    Recovered,
    /// Shutdown was requested while waiting for the database
    Shutdown,
}

/// Pings the database and owns the engine state
pub struct HealthMonitor {
    store: Arc<dyn PaymentStore>,
    sleep_time: Duration,
    state: EngineState,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn PaymentStore>, sleep_time: Duration) -> Self {
        Self {
            store,
            sleep_time,
            state: EngineState::Running,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// One round trip to the database
    pub async fn ping(&self) -> PingStatus {
        match self.store.ping().await {
            Ok(()) => PingStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "database ping failed");
                PingStatus::Unhealthy
            }
        }
    }

    /// Check health and advance the state machine
    ///
    /// While the database is down this blocks, polling every `sleep_time`, until a ping
    /// succeeds or `shutdown` flips to `true`.
    pub async fn gate(&mut self, shutdown: &mut watch::Receiver<bool>) -> Gate {
        match (self.ping().await, self.state) {
            (PingStatus::Healthy, EngineState::Running) => Gate::Proceed,
            (PingStatus::Healthy, EngineState::Resuming) => {
                if !self.sleep(shutdown).await {
                    return Gate::Shutdown;
                }
                info!("resuming push service");
                self.transition(EngineState::Running);
                Gate::Resumed
            }
            (PingStatus::Healthy, EngineState::Interrupted) => {
                self.transition(EngineState::Resuming);
                Gate::Recovered
            }
            (PingStatus::Unhealthy, _) => {
                error!("database appears to be down, suspending push service");
                self.transition(EngineState::Interrupted);
                self.wait_for_database(shutdown).await
            }
        }
    }

    async fn wait_for_database(&mut self, shutdown: &mut watch::Receiver<bool>) -> Gate {
        loop {
            if !self.sleep(shutdown).await {
                return Gate::Shutdown;
            }
            if self.ping().await == PingStatus::Healthy {
                info!("database is reachable again");
                self.transition(EngineState::Resuming);
                return Gate::Recovered;
            }
        }
    }

    /// Sleep one interval; returns `false` if shutdown was requested
    async fn sleep(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.sleep_time) => true,
            changed = shutdown.changed() => match changed {
                Ok(()) => !*shutdown.borrow(),
                // Sender gone: the owner is shutting down
                Err(_) => false,
            },
        }
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "engine state changed");
            self.state = next;
        }
    }
}
