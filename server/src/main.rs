use std::net::SocketAddr;
use tokio::net::TcpListener;

use coded_server::config::{generate_config_template, Config};
use coded_server::{auth, db, routes, state, ws};

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
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("coded_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("Coded server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Shared secret with the account service, or a key generated into data_dir
    let jwt_secret =
        auth::jwt::load_or_generate_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    let ws_config = config.ws();
    let hub = ws::hub::spawn(ws_config.mailbox_capacity);
    tracing::info!(
        mailbox_capacity = ws_config.mailbox_capacity,
        heartbeat_ms = ws_config.heartbeat_interval_ms,
        "Connection hub started"
    );

    let app_state = state::AppState::new(db, jwt_secret, hub.clone(), ws_config);

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
    .with_graceful_shutdown(shutdown_signal(hub))
    .await?;

    tracing::info!("Server stopped");

    Ok(())
}

/// Resolves on Ctrl-C. Upgraded sockets would otherwise hold the graceful
/// drain open, so the hub is closed here, which makes every writer send a
/// close frame.
async fn shutdown_signal(hub: ws::HubHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    hub.shutdown();
}
