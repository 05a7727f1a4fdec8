//! Room sub-server.
//!
//! A [`Room`] owns a listener on its own port, a set of members (directory
//! sessions, addressed through their outbox) and a set of feed connections
//! (sockets accepted on the room port). Broadcasts go to both; only members
//! count toward the room's size and lifetime.
//!
//! # Lifecycle
//!
//! ```text
//! create ──> Listening ──add_member──> Active ──close──> Closing ──> Closed
//! ```
//!
//! The room never decides on its own to close. The [`Directory`] removes it
//! and calls [`Room::close`] in the same critical section that drops the last
//! member, so nobody can join a room that is being torn down. `close` drops
//! the listening socket before it returns; the accept loop only ever borrows
//! it, so the port is free for reuse as soon as the room is gone.
//!
//! Feed connections speak the same line protocol as the directory: the first
//! line is the display name, every later line is relayed to the room as chat.

use std::{
    collections::HashMap,
    fmt,
    future::poll_fn,
    io,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use chatrelay_core::protocol;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};

use crate::{clock, connection::write_lines, directory::Directory, error::RoomError};

/// Line sink of one client connection.
///
/// A directory session's outbox doubles as its membership token.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Identifies a directory session inside rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// A room member: a directory session's membership token.
#[derive(Debug, Clone)]
pub struct Member {
    /// Session identity
    pub id: MemberId,
    /// Display name of the session
    pub name: String,
    /// Where broadcasts for this member go
    pub outbox: Outbox,
}

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Bound, no member yet
    Listening,
    /// At least one member has joined
    Active,
    /// Removed from the directory, accept loop shutting down
    Closing,
    /// Listener dropped, port free
    Closed,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the line was queued for
    pub delivered: usize,
    /// Members whose outbox is gone; they should be reaped
    pub failed: Vec<MemberId>,
}

/// Listening socket, owned by the room rather than its accept loop.
#[derive(Debug)]
enum RoomListener {
    /// Bound, accept loop not started
    Bound(std::net::TcpListener),
    /// Registered with the runtime, accept loop running
    Serving(TcpListener),
    /// Dropped by `close`, or lost to a failed registration
    Closed,
}

#[derive(Debug)]
struct RoomState {
    phase: RoomPhase,
    members: HashMap<MemberId, Member>,
    connections: HashMap<u64, Outbox>,
}

/// An independently listening chat room.
pub struct Room {
    name: String,
    port: u16,
    state: Mutex<RoomState>,
    listener: Mutex<RoomListener>,
    shutdown: watch::Sender<bool>,
    next_connection: AtomicU64,
    directory: Weak<Directory>,
}

impl Room {
    /// Bind a room listener on `bind_ip:port`.
    ///
    /// Port 0 binds an OS-chosen port; [`Room::port`] reports the real one.
    /// `directory` is used to reap members whose connection died during a
    /// broadcast; a dangling `Weak` disables reaping.
    ///
    /// # Errors
    ///
    /// - `RoomError::Bind` if the port is taken
    pub fn create(
        name: &str,
        bind_ip: IpAddr,
        port: u16,
        directory: Weak<Directory>,
    ) -> Result<Self, RoomError> {
        let bind_error = |source| RoomError::Bind { port, source };

        let listener = std::net::TcpListener::bind((bind_ip, port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            name: name.to_string(),
            port,
            state: Mutex::new(RoomState {
                phase: RoomPhase::Listening,
                members: HashMap::new(),
                connections: HashMap::new(),
            }),
            listener: Mutex::new(RoomListener::Bound(listener)),
            shutdown,
            next_connection: AtomicU64::new(1),
            directory,
        })
    }

    /// Room name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port the room listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> RoomPhase {
        self.state().phase
    }

    /// Point-in-time member count.
    pub fn member_count(&self) -> usize {
        self.state().members.len()
    }

    /// Point-in-time number of feed connections.
    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    /// Whether `id` is currently a member.
    pub fn has_member(&self, id: MemberId) -> bool {
        self.state().members.contains_key(&id)
    }

    /// Add a member. Re-adding an existing member replaces its token.
    ///
    /// Returns `false` if the room is already closing.
    pub fn add_member(&self, member: Member) -> bool {
        let mut state = self.state();
        if matches!(state.phase, RoomPhase::Closing | RoomPhase::Closed) {
            return false;
        }

        state.members.insert(member.id, member);
        state.phase = RoomPhase::Active;
        true
    }

    /// Remove a member.
    ///
    /// Returns the number of members left, or `None` if `id` was not a
    /// member. Reaching zero does not close the room; the directory does that
    /// under its own lock.
    pub fn remove_member(&self, id: MemberId) -> Option<usize> {
        let mut state = self.state();
        state.members.remove(&id)?;
        Some(state.members.len())
    }

    /// Send `line` to every member and feed connection present right now.
    ///
    /// Never blocks on a slow client: lines are queued on each outbox. A dead
    /// member does not stop delivery to the others and is reported in
    /// [`BroadcastReport::failed`]; dead feed connections are dropped here.
    /// Broadcasts on one room are serialized, so every member sees them in
    /// the same order.
    pub fn broadcast(&self, line: &str) -> BroadcastReport {
        deliver(&mut self.state(), line)
    }

    /// Broadcast a line written by member `sender`.
    ///
    /// Returns `None`, delivering nothing, if `sender` is not a member. The
    /// membership check and the delivery happen under the same lock.
    pub fn broadcast_from(&self, sender: MemberId, line: &str) -> Option<BroadcastReport> {
        let mut state = self.state();
        if !state.members.contains_key(&sender) {
            return None;
        }
        Some(deliver(&mut state, line))
    }

    /// Start the accept loop.
    ///
    /// Returns `Ok(true)` on the first call. Later calls, and calls after
    /// [`Room::close`], return `Ok(false)`.
    ///
    /// # Errors
    ///
    /// - `RoomError::Serve` outside a Tokio runtime, or if the runtime cannot
    ///   register the listener. A room that failed to register cannot serve
    ///   and should be discarded.
    pub fn serve(self: &Arc<Self>) -> Result<bool, RoomError> {
        let serve_error = |source| RoomError::Serve { port: self.port, source };
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| serve_error(io::Error::other(e)))?;

        {
            let mut slot = self.listener();
            let listener = match std::mem::replace(&mut *slot, RoomListener::Closed) {
                RoomListener::Bound(listener) => listener,
                other => {
                    *slot = other;
                    return Ok(false);
                },
            };
            *slot = RoomListener::Serving(TcpListener::from_std(listener).map_err(serve_error)?);
        }

        runtime.spawn(Arc::clone(self).accept_loop());
        Ok(true)
    }

    /// Shut the room down.
    ///
    /// Drops every membership token and feed connection, closes the listening
    /// socket and wakes the accept loop so it exits. When this returns the
    /// port can be bound again. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state();
            if matches!(state.phase, RoomPhase::Closing | RoomPhase::Closed) {
                return;
            }
            state.phase = RoomPhase::Closing;
            state.members.clear();
            state.connections.clear();
        }

        let listener = std::mem::replace(&mut *self.listener(), RoomListener::Closed);
        drop(listener);
        self.shutdown.send_replace(true);
        self.set_phase(RoomPhase::Closed);

        tracing::info!(room = %self.name, port = self.port, "room closed");
    }

    async fn accept_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!(room = %self.name, port = self.port, "room listening");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = poll_fn(|cx| self.poll_accept(cx)) => accepted,
            };

            match accepted {
                Some(Ok((stream, peer))) => {
                    tracing::debug!(room = %self.name, %peer, "room connection accepted");
                    tokio::spawn(Arc::clone(&self).serve_connection(stream, peer));
                },
                Some(Err(e)) => {
                    tracing::warn!(room = %self.name, "room accept failed: {e}");
                },
                None => break,
            }
        }

        tracing::debug!(room = %self.name, port = self.port, "room accept loop stopped");
    }

    /// Poll the listener without holding its lock across wakeups.
    ///
    /// `None` once the listener has been closed.
    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<(TcpStream, SocketAddr)>>> {
        match &*self.listener() {
            RoomListener::Serving(listener) => listener.poll_accept(cx).map(Some),
            RoomListener::Bound(_) | RoomListener::Closed => Poll::Ready(None),
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (reader, writer) = stream.into_split();
        let (outbox, inbox) = mpsc::unbounded_channel();
        let Some(connection) = self.attach(outbox) else {
            return;
        };
        tokio::spawn(write_lines(writer, inbox));

        let mut lines = BufReader::new(reader).lines();
        let mut shutdown = self.shutdown.subscribe();
        let mut name: Option<String> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if name.is_none() {
                            name = Some(text.to_string());
                            continue;
                        }
                        let body = protocol::chat_text(name.as_deref().unwrap_or_default(), text);
                        self.relay(&protocol::chat_line(&clock::timestamp(), &body));
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(room = %self.name, %peer, "room read failed: {e}");
                        break;
                    },
                },
            }
        }

        self.detach(connection);
        tracing::debug!(room = %self.name, %peer, "room connection closed");
    }

    /// Broadcast and hand dead members to the directory for reaping.
    fn relay(&self, line: &str) {
        let report = self.broadcast(line);
        if report.failed.is_empty() {
            return;
        }
        if let Some(directory) = self.directory.upgrade() {
            directory.reap(&self.name, report.failed);
        }
    }

    fn attach(&self, outbox: Outbox) -> Option<u64> {
        let mut state = self.state();
        if matches!(state.phase, RoomPhase::Closing | RoomPhase::Closed) {
            return None;
        }

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        state.connections.insert(id, outbox);
        Some(id)
    }

    fn detach(&self, connection: u64) {
        self.state().connections.remove(&connection);
    }

    fn set_phase(&self, phase: RoomPhase) {
        self.state().phase = phase;
    }

    fn state(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> MutexGuard<'_, RoomListener> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queue `line` on every member and feed outbox of an active room.
fn deliver(state: &mut RoomState, line: &str) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    if state.phase != RoomPhase::Active {
        return report;
    }

    for member in state.members.values() {
        if member.outbox.send(line.to_string()).is_ok() {
            report.delivered += 1;
        } else {
            report.failed.push(member.id);
        }
    }
    state.connections.retain(|_, outbox| outbox.send(line.to_string()).is_ok());

    report
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("phase", &state.phase)
            .field("members", &state.members.len())
            .field("connections", &state.connections.len())
            .finish()
    }
}
