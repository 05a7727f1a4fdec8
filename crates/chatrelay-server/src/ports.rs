//! Port allocation for room listeners.
//!
//! Ports are found by trial: bind a throwaway listener, drop it, report the
//! number. Nothing is reserved between that trial bind and the room's real
//! bind, so another process can win the port in between. The room directory handles
//! that by retrying with the next candidate.
//!
//! The assigned set is advisory bookkeeping for logs and listings. The OS
//! already refuses a trial bind on a port a live room listens on; skipping
//! assigned ports just saves the syscall.

use std::{
    collections::BTreeSet,
    net::{IpAddr, TcpListener},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::error::PortError;

/// Highest valid port.
pub const MAX_PORT: u16 = u16::MAX;

/// Finds bindable ports and tracks which ones rooms hold.
#[derive(Debug)]
pub struct PortAllocator {
    /// Interface trial binds use (same as the rooms)
    bind_ip: IpAddr,
    /// Ports currently held by rooms
    assigned: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator probing on `bind_ip`.
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip, assigned: Mutex::new(BTreeSet::new()) }
    }

    /// First bindable port at or above `start`.
    ///
    /// Port 0 is never returned; a `start` of 0 begins at 1.
    pub fn allocate(&self, start: u16) -> Result<u16, PortError> {
        let start = start.max(1);

        for port in start..=MAX_PORT {
            if self.is_assigned(port) {
                continue;
            }
            if TcpListener::bind((self.bind_ip, port)).is_ok() {
                return Ok(port);
            }
        }

        Err(PortError::Exhausted { start })
    }

    /// Record that a room now listens on `port`.
    pub fn record_assigned(&self, port: u16) {
        if self.lock().insert(port) {
            tracing::info!(port, "assigned port");
        }
    }

    /// Record that the room on `port` closed.
    pub fn record_released(&self, port: u16) {
        if self.lock().remove(&port) {
            tracing::info!(port, "released port");
        }
    }

    /// Whether a room currently holds `port`.
    pub fn is_assigned(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Ports currently held by rooms, ascending.
    pub fn assigned(&self) -> Vec<u16> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.assigned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
