//! Orbit relay server binary.
//!
//! Reads its configuration from `ORBIT_*` environment variables (see
//! [`config`]) and serves until Ctrl-C. Log verbosity follows `RUST_LOG`,
//! defaulting to `info`.

mod config;

use log::info;
use orbit_relay::RelayServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::from_env()?;
    info!(
        "Starting orbit relay on {} (queue {}, storage {})",
        config.bind_addr,
        config.queue_capacity,
        config
            .storage_path
            .as_ref()
            .map_or_else(|| "memory".to_string(), |path| path.display().to_string())
    );

    let server = RelayServer::new(config)?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
