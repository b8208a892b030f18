//! livecode server: hosts the room registry behind a WebSocket listener.
//!
//! Configured through the environment (`PORT`, `LIVECODE_BIND_ADDR`,
//! `LIVECODE_OUTBOX_CAPACITY`); log levels through `RUST_LOG`.

use log::{error, info};
use std::process::ExitCode;

use livecode_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Starting livecode server on {}", config.bind_addr);

    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Server stopped: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
