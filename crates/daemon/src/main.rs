// Status pusher daemon
//
// Design Decision: A fatal engine error ends the process with exit status 1 after the pool
// has drained, so a supervisor restarts it with the retry log intact.
// Design Decision: `check` validates settings and routes without touching the database.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use status_pusher_daemon::{
    init_telemetry, Daemon, RouteSource, SecretCipher, Settings, TelemetryConfig,
};

#[derive(Parser)]
#[command(name = "status-pusher")]
#[command(about = "Pushes payment status updates to client endpoints")]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(
        long,
        short,
        env = "STATUS_PUSHER_CONFIG",
        default_value = "config/settings.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the push daemon (default)
    Run,

    /// Validate the settings and route files, then exit
    Check,

    /// Encrypt a route password with the configured key
    EncryptPassword {
        /// Password to encrypt
        plaintext: String,
    },

    /// Print a fresh random encryption key
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::GenerateKey => {
            println!("{}", SecretCipher::generate_key());
            Ok(())
        }
        Commands::EncryptPassword { plaintext } => {
            let settings = Settings::from_file(&cli.config)?;
            let cipher = SecretCipher::from_env(settings.encryption_key_env())?
                .with_context(|| format!("{} is not set", settings.encryption_key_env()))?;
            println!("{}", cipher.encrypt(&plaintext)?);
            Ok(())
        }
        Commands::Check => {
            let settings = Settings::load(&cli.config)?;
            let cipher = SecretCipher::from_env(settings.encryption_key_env())?;
            let table = RouteSource::new(settings.routes_file.clone(), cipher)
                .load()
                .await?;
            println!("settings ok, {} client routes", table.len());
            Ok(())
        }
        Commands::Run => run(cli.config).await,
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    let telemetry = TelemetryConfig::from_env().with_fallback_filter(settings.log_filter.as_deref());
    init_telemetry(&telemetry).context("Failed to initialise logging")?;

    tracing::info!(
        config = %config_path.display(),
        wrapper_url = %settings.engine.wrapper_url,
        bucket_size = settings.engine.bucket_size,
        max_workers = settings.engine.max_workers,
        "status-pusher starting..."
    );

    let mut daemon = Daemon::init(settings).await?;
    daemon.start()?;

    let mut finished = daemon.finished();
    tokio::select! {
        _ = finished.wait_for(|finished| *finished) => {
            tracing::warn!("push daemon loop exited on its own");
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let result = daemon.stop().await;
    daemon.destroy().await;

    if let Err(e) = result {
        tracing::error!(error = format!("{e:#}"), "status-pusher exiting with failure");
        std::process::exit(1);
    }

    tracing::info!("status-pusher shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
