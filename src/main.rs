// Competition engine entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database
// 4. Import a legacy roster when one is passed on the command line
// 5. Build the engine handle
// 6. Spawn the ingestion scheduler task
// 7. Wait for Ctrl+C
// 8. Signal shutdown and drain the scheduler

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use fantasy_cricket::config;
use fantasy_cricket::db::Database;
use fantasy_cricket::engine::Engine;
use fantasy_cricket::ingest::{self, import, scraper::HttpMatchSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("Competition engine starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: ruleset={}, {} clubs, schedule \"{}\"",
        config.scoring.ruleset_version,
        config.ingest.configured_clubs.len(),
        config.ingest.scrape_schedule
    );

    // 3. Open database
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4. Optional legacy roster import: `crickd path/to/roster.csv`
    if let Some(roster_path) = std::env::args().nth(1) {
        let summary = import::import_legacy_roster(&db, Path::new(&roster_path))
            .context("failed to import legacy roster")?;
        info!(
            "Legacy roster imported from {}: {} created, {} existing, {} skipped",
            roster_path, summary.created, summary.existing, summary.skipped
        );
    }

    // 5. Build the engine handle
    let timeout = std::time::Duration::from_secs(config.ingest.request_timeout_secs);
    let source = Arc::new(
        HttpMatchSource::new(&config.ingest.scraper_base_url, timeout)
            .context("failed to build scraper client")?,
    );
    let engine = Arc::new(Engine::new(db, config).context("failed to build engine")?);

    // 6. Spawn the ingestion scheduler task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(ingest::run_scheduler(
        engine.clone(),
        source,
        shutdown_rx,
    ));
    info!("Ingestion scheduler running. Press Ctrl+C to exit.");

    // 7. Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Ctrl+C received, shutting down...");
        }
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    }

    // 8. Signal shutdown and drain the scheduler (with timeout)
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = scheduler_handle.await;
    })
    .await;

    info!("Competition engine shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (keeps stdout clean for operators).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("crickd.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fantasy_cricket=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
