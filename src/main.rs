//! places daemon: serves a history store over HTTP and runs its periodic
//! maintenance.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use places::config::Config;
use places::db::HistoryDB;
use places::error::PlacesError;
use places::observer::TracingObserver;
use places::{api, db_call, AppState, SharedHistory};

#[derive(Parser)]
#[command(name = "places", version, about = "Visit history store with frecency ranking")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3918", env = "PLACES_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "places.db", env = "PLACES_DB")]
    db: String,

    /// JSON file overriding the default tunables
    #[arg(short, long, env = "PLACES_CONFIG")]
    config: Option<String>,

    /// Minutes between idle maintenance passes; 0 disables them
    #[arg(long, default_value = "1440", env = "PLACES_MAINTENANCE_MINS")]
    maintenance_mins: u64,

    /// Bearer token required by every route except /health
    #[arg(long, env = "PLACES_API_KEY")]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "places exited");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), PlacesError> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .apply_env();

    let history: SharedHistory = Arc::new(HistoryDB::open_with_config(&args.db, config)?);
    history.add_observer(Arc::new(TracingObserver));

    let auth_status = if args.api_key.is_some() { "enabled" } else { "disabled" };
    let state = AppState::new(Arc::clone(&history), args.api_key);
    let app = api::router(state);

    if args.maintenance_mins > 0 {
        let bg = Arc::clone(&history);
        let every = Duration::from_secs(args.maintenance_mins.saturating_mul(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick fires immediately; skip it so startup stays quick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match db_call(&bg, |h| h.run_idle_maintenance(h.now())).await {
                    Ok(r) => info!(
                        decayed = r.decayed,
                        expired_visits = r.expired.visits_removed,
                        expired_places = r.expired.places_removed,
                        vacuum = ?r.vacuum,
                        "idle maintenance"
                    ),
                    // already logged by the store; retried next window
                    Err(e) => warn!(error = %e, "idle maintenance skipped"),
                }
            }
        });
        info!(every_mins = args.maintenance_mins, "background maintenance enabled");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        schema = ?history.schema_status(),
        auth = auth_status,
        "places starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PlacesError::Internal(format!("bind {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PlacesError::Internal(format!("server: {e}")))
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("shutting down");
}
