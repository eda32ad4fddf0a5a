//! # Status Push Daemon
//!
//! Runs the push engine as a long-lived process: loads settings and the route table, keeps
//! the routes fresh, drives one engine cycle after another and shuts down cleanly on a
//! signal.
//!
//! ```text
//!   settings.yaml ──► Settings ──► Daemon::init ──► StatusPusher
//!   routes.yaml ───► RouteSource ──(digest changed)──► EngineShared::swap_routes
//! ```

pub mod daemon;
pub mod routes;
pub mod secrets;
pub mod settings;
pub mod telemetry;

pub use daemon::Daemon;
pub use routes::{RouteError, RouteSource};
pub use secrets::{SecretCipher, SecretError};
pub use settings::{DatabaseSettings, Settings, SettingsError};
pub use telemetry::{init_telemetry, TelemetryConfig};
