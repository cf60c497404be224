mod arrow_io;
mod config;
mod jobs;
mod models;
mod routes;
mod storage;

use axum::{extract::DefaultBodyLimit, Router};
use config::ServiceConfig;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scan_service=debug,scan_parser=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;
    let addr = config.addr;
    let max_upload_bytes = config.max_upload_bytes;
    tracing::debug!("Service configuration: {:?}", config);

    let state = routes::AppState::new(config)?;

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::create_routes(state))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors);

    tracing::info!("Starting scan service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
