//! Folio server: collaborative document relay and storage.
//!
//! Usage: `folio-server [config.toml]`. Settings can also be overridden with
//! `FOLIO_*` environment variables; logging is controlled by `RUST_LOG`.

use log::info;
use std::path::PathBuf;

use folio_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;

    info!("Starting Folio server...");
    let server = SyncServer::new(config)?;
    server.run().await?;
    Ok(())
}
