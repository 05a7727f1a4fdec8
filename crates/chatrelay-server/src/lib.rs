//! Chat relay server.
//!
//! A directory server that hands out chat rooms. Each room is a small
//! sub-server on its own port, created on the first join and torn down when
//! its last member leaves.
//!
//! # Architecture
//!
//! This crate wraps [`chatrelay_core`]'s pure session state machine with real
//! I/O. [`Server`] accepts directory connections and runs one driver task per
//! client; the driver executes the session's actions against the shared
//! [`Directory`].
//!
//! # Components
//!
//! - [`Server`]: Directory listener and worker pool
//! - [`Directory`]: Concurrent room map with atomic create and teardown
//! - [`Room`]: Room listener, members, broadcast
//! - [`PortAllocator`]: Probe-binding port search

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
pub mod config;
mod connection;
pub mod directory;
mod error;
pub mod ports;
pub mod room;

use std::{net::SocketAddr, sync::Arc};

pub use config::{DirectoryConfig, ServerConfig};
pub use directory::{Directory, JoinOutcome, RoomInfo};
pub use error::{PortError, RoomError, ServerError};
pub use ports::PortAllocator;
pub use room::{BroadcastReport, Member, MemberId, Outbox, Room, RoomPhase};
use tokio::{net::TcpListener, sync::Semaphore};

/// Directory server.
pub struct Server {
    /// Directory listener
    listener: TcpListener,
    /// Shared room map
    directory: Arc<Directory>,
    /// One permit per directory connection being served
    workers: Arc<Semaphore>,
}

impl Server {
    /// Bind the directory listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if `workers` is zero
    /// - `ServerError::Transport` if the address cannot be bound
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        if config.workers == 0 {
            return Err(ServerError::Config("worker pool size must be at least 1".to_string()));
        }

        let listener = TcpListener::bind(&config.bind_address).await?;
        let directory = Directory::new(config.directory);

        Ok(Self { listener, directory, workers: Arc::new(Semaphore::new(config.workers)) })
    }

    /// Run the server, accepting directory connections.
    ///
    /// A worker permit is taken before each accept, so clients beyond the
    /// pool size wait in the listen backlog. Runs until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.listener.local_addr()?);

        loop {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|e| ServerError::Internal(format!("worker pool closed: {e}")))?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let directory = Arc::clone(&self.directory);

                    tokio::spawn(async move {
                        if let Err(e) = connection::handle_connection(stream, peer, directory).await
                        {
                            tracing::error!(%peer, "Connection error: {}", e);
                        }
                        drop(permit);
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Local address the directory listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared room directory.
    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.directory)
    }
}
