//! ResQ server binary.
//!
//! Configuration comes from the environment:
//!
//! - `RESQ_PORT`: listen port (default 3000)
//! - `RESQ_DATABASE_URL`: SQLite connection string (default "sqlite:resq.db?mode=rwc")

use std::env;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use resq::api::{AppState, router};
use resq::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:resq.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("resq=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("RESQ_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("RESQ_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    info!(port, db_url = %db_url, "Starting ResQ server");

    // Initialize storage
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    // Create application state
    let state = AppState::new(storage);

    // A push-notification dispatcher would subscribe here; for now the
    // broadcast is observed only through logs.
    let mut alert_events = state.subscribe_alerts();
    tokio::spawn(async move {
        while let Ok(alert) = alert_events.recv().await {
            info!(
                alert_id = alert.id,
                level = alert.level.as_repr(),
                "Alert created event observed"
            );
        }
    });

    // Build router
    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "ResQ is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
