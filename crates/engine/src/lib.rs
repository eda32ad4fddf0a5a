//! # Status Push Engine
//!
//! Delivers payment-status updates recorded in PostgreSQL to each client's HTTP endpoint
//! through a delivery wrapper, and writes every outcome back to the originating record.
//!
//! ## Features
//!
//! - **Health gate**: no work runs while the database is unreachable; the engine walks
//!   RUNNING → INTERRUPTED → RESUMING → RUNNING around an outage
//! - **Bounded dispatch**: one pool per client batch, sized to the batch and capped
//! - **Reply classification**: echoed correlation IDs are checked before the status code
//! - **Durable retry log**: updates the database refused are replayed before new work
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StatusPusher                            │
//! │  (one cycle: health gate, reconciliation, dispatch)         │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                     │
//!            ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌────────────────────┐ ┌───────────────────┐
//! │  HealthMonitor   │ │    Reconciler      │ │    Dispatcher     │
//! │  (ping, state)   │ │ (RetryLog replay)  │ │ (per-client pool) │
//! └──────────────────┘ └────────────────────┘ └───────────────────┘
//!                                                       │
//!                                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PushJob                               │
//! │  (map status, call wrapper, classify, update or log)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use status_pusher_engine::prelude::*;
//!
//! let shared = Arc::new(EngineShared::new(routes));
//! let mut pusher = StatusPusher::new(store, config, shared.clone())?;
//!
//! let (stop, mut shutdown) = tokio::sync::watch::channel(false);
//! loop {
//!     match pusher.run_cycle(&mut shutdown).await? {
//!         CycleOutcome::Cancelled => break,
//!         _ => tokio::time::sleep(pusher.config().sleep_time).await,
//!     }
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod health;
pub mod job;
pub mod model;
pub mod persistence;
pub mod pool;
pub mod reconcile;
pub mod reliability;
pub mod retry_log;
pub mod serde_duration;
pub mod status;
pub mod wrapper;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::engine::{CycleOutcome, CycleReport, EngineShared, StatusPusher};
    pub use crate::error::EngineError;
    pub use crate::health::EngineState;
    pub use crate::model::{ClientRoute, PaymentRecord, RouteTable};
    pub use crate::persistence::{
        InMemoryPaymentStore, PaymentStore, PostgresPaymentStore, StoreError,
    };
    pub use crate::status::StatusCodes;
    pub use std::sync::Arc;
}

// Re-export key types at crate root
pub use config::{ConfigError, EngineConfig};
pub use dispatcher::{DispatchReport, DispatchStatus, JobTally};
pub use engine::{CycleOutcome, CycleReport, EngineShared, StatusPusher};
pub use error::EngineError;
pub use health::{EngineState, Gate, HealthMonitor, PingStatus};
pub use job::{JobContext, JobOutcome, PushJob, PushResult};
pub use model::{ClientRoute, PaymentRecord, PaymentUpdate, RouteTable};
pub use persistence::{
    InMemoryPaymentStore, PaymentStore, PendingQuery, PostgresPaymentStore, StoreError,
};
pub use pool::{DispatchPool, DrainOutcome, DrainReport, PoolError};
pub use reconcile::{ReconcileReport, Reconciler};
pub use reliability::RetryPolicy;
pub use retry_log::{RetryLog, RetryLogError};
pub use status::{PushStatus, StatusCodes, TargetStatus};
pub use wrapper::{WrapperClient, WrapperError, WrapperReply, WrapperRequest};
