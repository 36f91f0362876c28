//! pingd: a minimal concurrent command server
//!
//! Accepts TCP connections and answers whitespace-delimited text commands:
//! - `PING` (any case) replies `+PONG\r\n`
//! - anything else replies `-ERR Unknown command\r\n`
//!
//! Features:
//! - One task per connection, no pool and no connection limit
//! - Address reuse so a restarted server can rebind immediately
//! - Graceful listener shutdown on Ctrl+C; open sessions run until their
//!   clients leave (a second Ctrl+C closes them)
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod server;

use config::Config;
use server::Listener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = ?config.workers,
        empty_command = ?config.empty_command,
        "Starting pingd server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(serve(config))
}

/// Bind, then accept until Ctrl+C.
async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let listener = match Listener::bind(&config.listener_config()) {
        Ok(listener) => listener.empty_command(config.empty_command),
        Err(e) => {
            error!(error = %e, "Failed to start listener");
            return Err(e.into());
        }
    };

    let sessions = listener.run(shutdown_signal()).await;

    if !sessions.is_empty() {
        info!(
            open_sessions = sessions.len(),
            "Waiting for open sessions, press Ctrl+C again to close them"
        );
        tokio::select! {
            _ = sessions.wait() => {}
            _ = shutdown_signal() => info!("Closing open sessions"),
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
