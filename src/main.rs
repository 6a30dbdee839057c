use mediaedge::{config::EdgeConfig, router, AppState};
use std::net::SocketAddr;

/// mediaedge standalone server entry point.
///
/// Initializes tracing, loads and validates configuration, and serves the
/// asset, file and metadata routes.
///
/// # Configuration
/// Environment variables:
/// - `EDGE_ORIGIN_BASE`: origin store base address (default: http://127.0.0.1:9000)
/// - `EDGE_ALLOWED_ORIGIN`: the single CORS origin allowed (default: http://localhost:3000)
/// - `EDGE_CACHE_DIR`: persist the response cache with sled in this directory
/// - `EDGE_MAX_CACHE_BYTES`, `EDGE_MAX_INPUT_BYTES`, `EDGE_FETCH_TIMEOUT_SECS`
/// - `PORT`: HTTP listen port (default: 8080)
/// - `RUST_LOG`: Logging verbosity (default: "mediaedge=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaedge=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting mediaedge server");

    let cfg = EdgeConfig::from_env()?;
    cfg.validate()?;
    tracing::info!(
        "Origin {} (previews: /{}, files: /{}), CORS origin {}",
        cfg.origin_base, cfg.preview_prefix, cfg.public_prefix, cfg.allowed_origin
    );

    let app = router(AppState::from_config(cfg)?);

    // Cloud platforms inject PORT environment variable
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
