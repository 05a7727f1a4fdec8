//! Chat relay client binary.
//!
//! # Usage
//!
//! ```bash
//! chatrelay-client                  # localhost:9025
//! chatrelay-client 10.0.0.5 7000
//! ```

use chatrelay_client::{ClientConfig, DEFAULT_PORT};
use clap::Parser;
use tokio::io::{self, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat relay line client
#[derive(Parser, Debug)]
#[command(name = "chatrelay-client")]
#[command(about = "Line client for the chat relay")]
#[command(version)]
struct Args {
    /// Directory server host
    #[arg(default_value = "localhost")]
    address: String,

    /// Directory server port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr so they never interleave with chat on stdout.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = ClientConfig { server_address: format!("{}:{}", args.address, args.port) };

    chatrelay_client::run(&config, BufReader::new(io::stdin()), io::stdout()).await?;

    Ok(())
}
