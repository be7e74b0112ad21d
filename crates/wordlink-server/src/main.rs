use tracing_subscriber::EnvFilter;

use wordlink_server::config::ServerConfig;
use wordlink_server::{build_app, spawn_room_reaper};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("WORDLINK_LOG_FORMAT").is_ok_and(|v| v == "json");
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = ServerConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
    let listen_addr = config.listen_addr.clone();

    let (app, state) = build_app(config);
    let reaper = spawn_room_reaper(state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "wordlink signaling server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }
    reaper.abort();
    tracing::info!("Shutdown complete");
}
