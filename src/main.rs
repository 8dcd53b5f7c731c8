use arena_sync::config::parse_cli_args;
use arena_sync::shutdown::{shutdown_channel, wait_for_signal};

#[tokio::main]
async fn main() {
    observability::init_logging();

    let config = match parse_cli_args() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Sync server starting...");

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let server = match arena_sync::start(&config, shutdown_rx).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start server on {}: {}", config.net.addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = wait_for_signal().await {
        tracing::error!("Failed to listen for shutdown signals: {}", e);
    }
    tracing::info!("Shutdown signal received, stopping server...");
    shutdown_tx.trigger();

    if let Err(e) = server.wait().await {
        tracing::error!("Server error: {}", e);
    }
    tracing::info!("Server stopped.");
}
