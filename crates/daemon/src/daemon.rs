//! Daemon lifecycle
//!
//! `init` wires the store, routes and engine; `start` spawns the driver loop; `stop` asks the
//! loop to finish, waits for the running pool to drain and joins it; `destroy` closes the
//! database pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use status_pusher_engine::{
    CycleOutcome, DispatchStatus, EngineError, EngineShared, PaymentStore, PostgresPaymentStore,
    StatusPusher,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::routes::RouteSource;
use crate::secrets::SecretCipher;
use crate::settings::Settings;

/// How often `stop` reports that it is still waiting for a pool to drain
const DRAIN_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// The push daemon
pub struct Daemon {
    shared: Arc<EngineShared>,
    stop_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
    driver: Option<Driver>,
    handle: Option<JoinHandle<Result<(), EngineError>>>,
    pool: Option<PgPool>,
}

impl Daemon {
    /// Connect to PostgreSQL and build the daemon
    pub async fn init(settings: Settings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .acquire_timeout(settings.database.acquire_timeout)
            .connect(&settings.database.url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        info!(
            max_connections = settings.database.max_connections,
            "connected to PostgreSQL"
        );

        let store = Arc::new(PostgresPaymentStore::new(pool.clone()));
        let mut daemon = Self::with_store(settings, store).await?;
        daemon.pool = Some(pool);
        Ok(daemon)
    }

    /// Build the daemon around an existing store
    pub async fn with_store(settings: Settings, store: Arc<dyn PaymentStore>) -> Result<Self> {
        let cipher = SecretCipher::from_env(settings.encryption_key_env()).with_context(|| {
            format!(
                "Invalid route password key in {}",
                settings.encryption_key_env()
            )
        })?;
        if cipher.is_none() {
            info!(
                key_env = settings.encryption_key_env(),
                "no route password key configured, passwords are read as plaintext"
            );
        }

        let mut routes = RouteSource::new(settings.routes_file.clone(), cipher);
        let table = routes
            .load()
            .await
            .context("Failed to load route table")?;
        info!(clients = table.len(), path = %routes.path().display(), "route table loaded");

        let shared = Arc::new(EngineShared::new(table));
        let pusher = StatusPusher::new(store, settings.engine.clone(), Arc::clone(&shared))
            .context("Failed to build push engine")?;

        let (stop_tx, shutdown) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(false);
        let driver = Driver {
            refresh_interval: settings.engine.refresh_interval,
            sleep_time: settings.engine.sleep_time,
            pusher,
            routes,
            shared: Arc::clone(&shared),
            shutdown,
            finished: finished_tx,
        };

        Ok(Self {
            shared,
            stop_tx,
            finished_rx,
            driver: Some(driver),
            handle: None,
            pool: None,
        })
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Receiver that flips to `true` once the driver loop has exited
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished_rx.clone()
    }

    /// Spawn the driver loop
    pub fn start(&mut self) -> Result<()> {
        let driver = self
            .driver
            .take()
            .ok_or_else(|| anyhow!("daemon already started"))?;
        info!("starting push daemon");
        self.handle = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Request shutdown, wait for the running pool to drain, then join the loop
    ///
    /// Returns the loop's fatal error if it stopped on one.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping push daemon");
        self.stop_tx.send_replace(true);

        let mut drained = self.shared.drained();
        loop {
            tokio::select! {
                _ = drained.wait_for(|drained| *drained) => break,
                _ = tokio::time::sleep(DRAIN_REPORT_INTERVAL) => {
                    info!("waiting for in-flight pushes to drain");
                }
            }
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => {
                info!("push daemon stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("Push engine stopped on a fatal error")),
            Err(e) => Err(anyhow!("Push daemon loop panicked: {e}")),
        }
    }

    /// Release the database pool
    pub async fn destroy(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
            debug!("database pool closed");
        }
    }
}

/// The loop owned by the spawned task
struct Driver {
    pusher: StatusPusher,
    routes: RouteSource,
    shared: Arc<EngineShared>,
    refresh_interval: Duration,
    sleep_time: Duration,
    shutdown: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
}

impl Driver {
    async fn run(mut self) -> Result<(), EngineError> {
        let result = self.run_loop().await;
        self.finished.send_replace(true);
        result
    }

    async fn run_loop(&mut self) -> Result<(), EngineError> {
        let mut last_refresh = Instant::now();
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if last_refresh.elapsed() >= self.refresh_interval {
                self.refresh_routes().await;
                last_refresh = Instant::now();
            }

            match self.pusher.run_cycle(&mut self.shutdown).await {
                Ok(CycleOutcome::Cancelled) => break,
                Ok(CycleOutcome::Completed(report)) => {
                    let failed = report
                        .dispatches
                        .iter()
                        .filter(|d| matches!(d.status, DispatchStatus::FetchFailed(_)))
                        .count();
                    debug!(
                        cycle_id = %report.cycle_id,
                        clients = report.dispatches.len(),
                        fetch_failures = failed,
                        "cycle completed"
                    );
                }
                Ok(outcome) => debug!(?outcome, state = %self.pusher.state(), "cycle skipped"),
                Err(e) => {
                    error!(error = %e, "fatal engine error, stopping push daemon");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.sleep_time) => {}
                changed = self.shutdown.changed() => {
                    // Daemon handle dropped without calling stop
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("push daemon loop finished");
        Ok(())
    }

    async fn refresh_routes(&mut self) {
        match self.routes.changed().await {
            Ok(false) => {}
            Ok(true) => match self.routes.load().await {
                Ok(table) => {
                    info!(clients = table.len(), "route table changed, reloading");
                    self.shared.swap_routes(table);
                }
                Err(e) => warn!(error = %e, "route table reload failed, keeping previous routes"),
            },
            Err(e) => warn!(error = %e, "route table check failed, keeping previous routes"),
        }
    }
}
