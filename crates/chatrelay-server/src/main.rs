//! Chat relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on all interfaces, port 9025
//! chatrelay-server
//!
//! # Local only, custom port, rooms from 10000 up
//! chatrelay-server 127.0.0.1 7000 --room-port-start 10000
//! ```

use std::net::{IpAddr, SocketAddr};

use chatrelay_server::{
    DirectoryConfig, Server, ServerConfig,
    config::{DEFAULT_MAX_BIND_ATTEMPTS, DEFAULT_PORT, DEFAULT_WORKERS},
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat relay directory server
#[derive(Parser, Debug)]
#[command(name = "chatrelay-server")]
#[command(about = "Chat relay directory server with per-room sub-servers")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(default_value = "0.0.0.0")]
    address: IpAddr,

    /// Directory port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory connections served at once
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// First candidate port for rooms
    #[arg(long, default_value_t = DEFAULT_PORT)]
    room_port_start: u16,

    /// Bind attempts per room before the join is denied
    #[arg(long, default_value_t = DEFAULT_MAX_BIND_ATTEMPTS)]
    max_bind_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        bind_address: SocketAddr::new(args.address, args.port).to_string(),
        workers: args.workers,
        directory: DirectoryConfig {
            bind_ip: args.address,
            room_port_start: args.room_port_start,
            max_bind_attempts: args.max_bind_attempts,
        },
    };

    tracing::info!("Binding to {}", config.bind_address);
    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
