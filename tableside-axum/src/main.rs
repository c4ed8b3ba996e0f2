use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use chrono::FixedOffset;
use clap::{Args, Parser, Subcommand};
use tableside::{EngineConfig, SqliteRepositoryProvider, StaffAuthenticator, Tableside, TablesideBuilder};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Command line interface for the tableside server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "TABLESIDE_DATABASE_URL", default_value = "sqlite://tableside.db")]
    database_url: String,

    #[command(flatten)]
    engine: EngineArgs,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Lifetime of a new session, in minutes
    #[arg(long, env = "TABLESIDE_SESSION_TTL_MINUTES", default_value_t = 30)]
    session_ttl_minutes: i64,

    /// Days an unused, expired session is kept before it is purged
    #[arg(long, env = "TABLESIDE_RETENTION_DAYS", default_value_t = 7)]
    retention_days: i64,

    /// Seconds between background expiry sweeps
    #[arg(long, env = "TABLESIDE_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Customer-facing origin encoded into QR codes
    #[arg(long, env = "TABLESIDE_BASE_URL", default_value = "http://localhost:5173")]
    base_url: String,

    /// Offset from UTC, in minutes, whose midnight starts an analytics day
    #[arg(long, env = "TABLESIDE_UTC_OFFSET_MINUTES", default_value_t = 0, allow_hyphen_values = true)]
    utc_offset_minutes: i32,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and real-time endpoint
    Serve {
        /// Address to listen on
        #[arg(long, env = "TABLESIDE_BIND", default_value = "0.0.0.0:3000")]
        bind: SocketAddr,

        /// Shared secret staff credentials are signed with
        #[arg(long, env = "TABLESIDE_JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,
    },
    /// Run database migrations
    Migrate,
    /// Run one expiry sweep and retention purge, then exit
    Sweep,
    /// Print version information
    Version,
}

impl EngineArgs {
    fn config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        let utc_offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| format!("UTC offset out of range: {} minutes", self.utc_offset_minutes))?;

        Ok(EngineConfig::default()
            .session_ttl(chrono::Duration::minutes(self.session_ttl_minutes))
            .retention(chrono::Duration::days(self.retention_days))
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .base_url(self.base_url.clone())
            .utc_offset(utc_offset))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tableside=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, jwt_secret } => {
            let tableside = Arc::new(open(&cli.database_url, cli.engine.config()?).await?);
            let authenticator = Arc::new(StaffAuthenticator::new_hs256(jwt_secret.as_bytes()));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let tasks = tableside.start_background_tasks(shutdown_rx);

            let app = tableside_axum::routes(tableside.clone(), authenticator);
            let listener = tokio::net::TcpListener::bind(bind).await?;
            tracing::info!(%bind, "Listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    }
                    tracing::info!("Shutting down");
                    let _ = shutdown_tx.send(true);
                })
                .await?;

            for task in tasks {
                task.await?;
            }
        }
        Commands::Migrate => {
            tracing::info!("Running migrations...");
            let tableside = open(&cli.database_url, cli.engine.config()?).await?;
            tableside.health_check().await?;
        }
        Commands::Sweep => {
            let tableside = open(&cli.database_url, cli.engine.config()?).await?;
            let (expired, purged) = tableside.sweep().await?;
            tracing::info!(expired, purged, "Sweep complete");
        }
        Commands::Version => {
            println!("tableside v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn open(
    database_url: &str,
    config: EngineConfig,
) -> Result<Tableside<SqliteRepositoryProvider>, Box<dyn Error>> {
    let tableside = TablesideBuilder::new()
        .with_config(config)
        .with_sqlite(database_url)
        .await?
        .apply_migrations(true)
        .build()
        .await?;
    Ok(tableside)
}
