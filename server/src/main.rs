use std::net::SocketAddr;
use tokio::net::TcpListener;

use courier_server::config::{generate_config_template, Config};
use courier_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("courier_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Courier server v{} starting", env!("CARGO_PKG_VERSION"));

    if config.jwt_secret.is_empty() {
        return Err("jwt_secret must be set (COURIER_JWT_SECRET or courier.toml)".into());
    }

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Blob and staging directories must exist before they are served
    let storage = config.storage();
    for dir in [&storage.images_dir, &storage.files_dir, &storage.upload_dir] {
        std::fs::create_dir_all(dir)?;
    }

    let app_state = state::AppState::new(db, &config);
    let sessions = app_state.sessions.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(
        open_connections = sessions.connection_count(),
        "Courier server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
