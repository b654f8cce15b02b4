//! Crowdbench daemon
//!
//! Serves the benchmark HTTP API over a local SQLite database and runs the
//! expired-vote sweep on a schedule.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! crowdbench
//!
//! # Start with custom config
//! crowdbench --config /path/to/config.toml
//!
//! # Load reference entries at startup
//! crowdbench --seed-file entities.json
//!
//! # Run without the background sweep
//! crowdbench --no-maintenance
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crowdbench::services::spawn_logging_listener;
use crowdbench::{BenchDb, Config, HttpServer, Services};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Idle time after which a client's rate-limit state is dropped
const LIMITER_IDLE_MS: i64 = 10 * 60 * 1000;

#[derive(Parser, Debug)]
#[command(name = "crowdbench")]
#[command(about = "Crowd-voted benchmark for model entity guesses")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// JSON file of reference entries to seed if absent
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Bearer token for admin routes
    #[arg(long, env = "CROWDBENCH_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Disable the scheduled expired-vote sweep
    #[arg(long)]
    no_maintenance: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("crowdbench=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.admin_token.is_some() {
        config.admin_token = args.admin_token;
    }
    if args.no_maintenance {
        config.maintenance.enabled = false;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        cooldown_hours = config.vote_cooldown_hours,
        "Starting crowdbench"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(BenchDb::open(&config.database_path())?);
    let services = Arc::new(Services::new(db.clone(), &config));
    let _event_logger = spawn_logging_listener(services.events.clone());

    if let Some(seed_file) = &args.seed_file {
        let result = services.reference.seed_from_file(seed_file)?;
        info!(inserted = result.inserted, skipped = result.skipped, "Reference data loaded");
    }

    if config.admin_token.is_none() {
        warn!("No admin token configured; /admin routes are open");
    }

    // Scheduled sweep
    let maintenance_handle = if config.maintenance.enabled {
        let services = services.clone();
        let maintenance = config.maintenance.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(maintenance.sweep_interval_secs));
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = services
                    .maintenance
                    .sweep_expired_votes(maintenance.sweep_batch_size, maintenance.sweep_max_batches)
                {
                    error!(error = %e, "Scheduled sweep failed");
                }
                services
                    .limiter
                    .cleanup(crowdbench::db::current_timestamp_ms(), LIMITER_IDLE_MS);
            }
        }))
    } else {
        info!("Scheduled maintenance disabled");
        None
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(
        HttpServer::new(services.clone(), http_addr)
            .with_admin_token(config.admin_token.clone())
            .with_maintenance(config.maintenance.clone()),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    if let Some(handle) = maintenance_handle {
        handle.abort();
    }

    if let Ok(stats) = db.stats() {
        info!(
            submissions = stats.submissions,
            ledger_rows = stats.ledger_rows,
            models = stats.models,
            "Final storage stats"
        );
    }

    Ok(())
}
