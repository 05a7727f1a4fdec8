//! Server configuration.

use std::net::{IpAddr, Ipv4Addr};

/// Well-known directory port, also the first candidate for room ports.
pub const DEFAULT_PORT: u16 = 9025;

/// Default number of directory connections served at once.
pub const DEFAULT_WORKERS: usize = 10;

/// Default number of bind attempts before a room creation is given up.
pub const DEFAULT_MAX_BIND_ATTEMPTS: u32 = 8;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the directory listener to (e.g., "0.0.0.0:9025")
    pub bind_address: String,
    /// Size of the directory worker pool. Connections beyond this wait in
    /// the listen backlog until a worker frees up.
    pub workers: usize,
    /// Room directory configuration
    pub directory: DirectoryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            workers: DEFAULT_WORKERS,
            directory: DirectoryConfig::default(),
        }
    }
}

/// Room directory configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Interface room listeners bind to
    pub bind_ip: IpAddr,
    /// First candidate port for new rooms
    pub room_port_start: u16,
    /// Bind attempts per room creation before giving up
    pub max_bind_attempts: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            room_port_start: DEFAULT_PORT,
            max_bind_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
        }
    }
}
