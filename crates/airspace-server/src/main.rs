//! Airspace Server - overlay backend for layered airspace maps

use airspace_openaip::OpenAipClient;
use airspace_server::{api, loops, persistence, Config, OverlayService};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("airspace_server=debug".parse()?))
        .init();

    tracing::info!("Starting Airspace Server...");

    let config = Config::from_env()?;
    let port = config.server_port;

    let mut service = OverlayService::new(config.clone())?;
    if config.persist {
        let db = persistence::init_database(&config.database_path, config.database_max_connections).await?;
        service = service.with_database(db);
    }
    if config.has_openaip_key() {
        let client = OpenAipClient::new(
            config.openaip_url.as_str(),
            config.openaip_api_key.as_str(),
            config.fetch_timeout(),
        )?;
        service = service.with_source(Arc::new(client));
    } else {
        tracing::warn!("OPENAIP_API_KEY not set; serving stored airspace only");
    }
    let service = Arc::new(service);
    service.load_from_database().await?;

    // Start background loops
    let (shutdown_tx, _) = broadcast::channel(1);
    let retention = tokio::spawn(loops::retention_loop::run_retention_loop(
        service.clone(),
        Duration::from_secs(config.retention_sweep_s),
        shutdown_tx.subscribe(),
    ));

    // Build the app
    let app = api::routes()
        .with_state(service)
        .layer(CorsLayer::permissive());

    // Run server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = retention.await;
    Ok(())
}
