mod analysis;
mod api;
mod blocking;
mod clock;
mod config;
mod models;
mod storage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::dispatcher::{AnalysisDispatcher, ATTACK_PATTERNS_COLLECTION};
use crate::analysis::geoip::GeoIpLookup;
use crate::analysis::profiler::TrafficProfiler;
use crate::api::routes::AppState;
use crate::api::server::ApiServer;
use crate::blocking::firewall;
use crate::blocking::policy::IpBlocker;
use crate::clock::{Clock, SystemClock};
use crate::config::settings::Settings;
use crate::storage::cache::EphemeralCache;
use crate::storage::event_store::EventStore;
use crate::storage::sqlite::BlockStore;

/// Parse the `--config` CLI flag. Defaults to `/opt/rampart/config/rampart.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("/opt/rampart/config/rampart.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with both stdout and file output.
/// The returned guard must stay alive for the file writer to flush.
fn init_tracing(log_dir: &str, level: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::never(log_dir, "rampart.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},rampart=debug")));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}

/// Background task that settles expired blocks and cache entries, and
/// applies retention cleanup roughly once a day.
async fn maintenance_loop(
    blocker: Arc<IpBlocker>,
    cache: Arc<EphemeralCache>,
    events: Arc<EventStore>,
    sweep_interval_secs: u64,
    retention_days: u64,
) {
    let sweep_interval_secs = sweep_interval_secs.max(1);
    let ticks_per_day = (86_400 / sweep_interval_secs).max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
    let mut ticks: u64 = 0;

    loop {
        interval.tick().await;
        blocker.sweep_expired();
        cache.clear_expired();

        ticks += 1;
        if ticks % ticks_per_day == 0 {
            blocker.cleanup_old_blocks(retention_days);
            let removed = events.cleanup(ATTACK_PATTERNS_COLLECTION, retention_days);
            if removed > 0 {
                info!(removed, "Removed old attack-pattern documents");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = if std::path::Path::new(&config_path).exists() {
        Settings::load(&config_path)?
    } else {
        Settings::default()
    };
    let settings = Arc::new(settings);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    let _log_guard = init_tracing(&settings.logging.dir, &settings.logging.level);

    info!("Starting Rampart detection service");
    info!("Config loaded from {}", config_path);

    // ---------------------------------------------------------------
    // 3. Storage
    // ---------------------------------------------------------------
    for path in [&settings.storage.blocks_db, &settings.storage.cache_db] {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let block_store = Arc::new(
        BlockStore::new(&settings.storage.blocks_db)
            .expect("Failed to initialise block store"),
    );
    let cache = Arc::new(
        EphemeralCache::new(&settings.storage.cache_db, clock.clone())
            .expect("Failed to initialise cache"),
    );
    let events = Arc::new(
        EventStore::new(settings.storage.data_dir.clone(), clock.clone())
            .expect("Failed to initialise event store"),
    );

    info!("Storage layer initialised");

    // ---------------------------------------------------------------
    // 4. Detection components
    // ---------------------------------------------------------------
    let geoip = Arc::new(GeoIpLookup::new(&settings.geoip.city_db));
    let enforcer = firewall::from_config(&settings.blocking.firewall);
    let blocker = Arc::new(IpBlocker::new(
        block_store,
        enforcer,
        clock.clone(),
        settings.blocking.block_ttl_secs,
    ));
    let profiler = Arc::new(TrafficProfiler::new(settings.profiler.max_history));

    let dispatcher = Arc::new(AnalysisDispatcher::new(
        profiler,
        blocker.clone(),
        events.clone(),
        cache.clone(),
        geoip,
        clock.clone(),
        settings.blocking.alert_ttl_secs,
    ));

    info!("Analysis pipeline initialised");

    // ---------------------------------------------------------------
    // 5. API server
    // ---------------------------------------------------------------
    let state = AppState {
        dispatcher,
        blocker: blocker.clone(),
        events: events.clone(),
        cache: cache.clone(),
        clock,
        start_time: Instant::now(),
        api_key: settings.server.api_key.clone(),
    };

    let api_server = ApiServer::new(state, settings.server.bind.clone());

    // ---------------------------------------------------------------
    // 6. Spawn everything
    // ---------------------------------------------------------------
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!("API server error: {}", e);
        }
    });

    let maintenance_handle = tokio::spawn(maintenance_loop(
        blocker,
        cache,
        events,
        settings.blocking.sweep_interval_secs,
        settings.blocking.retention_days,
    ));

    info!("Rampart is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 7. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Rampart...");

    api_handle.abort();
    maintenance_handle.abort();

    info!("Rampart shut down gracefully");
    Ok(())
}
