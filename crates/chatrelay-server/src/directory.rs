//! Room directory.
//!
//! Maps room names to live [`Room`]s. Every operation that can change whether
//! a room exists runs inside the map's per-key entry lock:
//!
//! - `join`: add the member to the room, publishing a new room if absent
//! - `leave`: remove the member and, if it was the last one, remove the
//!   entry, close the room and release its port
//!
//! Because both hold the same entry lock, a join can never land in a room
//! that a concurrent leave is tearing down. Port scanning and binding for a
//! new room happen before the entry lock is taken; when two joins race to
//! create the same name, the first to publish wins and the other closes its
//! spare room. Different names do not contend beyond the map's sharding.
//!
//! Lock order is always map shard, then room state. Rooms never call back
//! into the directory synchronously; reaping dead members is spawned.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    config::DirectoryConfig,
    error::RoomError,
    ports::PortAllocator,
    room::{BroadcastReport, Member, MemberId, Room},
};

/// One row of a room listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Room name
    pub name: String,
    /// Member count when the row was read
    pub members: usize,
    /// Room port
    pub port: u16,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The joined room
    pub room: Arc<Room>,
    /// Whether this join created the room
    pub created: bool,
}

/// Concurrent name -> room map.
#[derive(Debug)]
pub struct Directory {
    rooms: DashMap<String, Arc<Room>>,
    ports: PortAllocator,
    config: DirectoryConfig,
    next_member: AtomicU64,
    /// Handed to rooms so their feed connections can trigger reaping
    me: Weak<Directory>,
}

impl Directory {
    /// Create an empty directory.
    pub fn new(config: DirectoryConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            rooms: DashMap::new(),
            ports: PortAllocator::new(config.bind_ip),
            config,
            next_member: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    /// Allocate a session identity.
    pub fn next_member_id(&self) -> MemberId {
        MemberId(self.next_member.fetch_add(1, Ordering::Relaxed))
    }

    /// Port bookkeeping
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Look up `name`, creating and serving the room if absent.
    ///
    /// Returns the room and whether this call created it. A room created here
    /// has no members; it stays listed as empty-and-hidden until a join
    /// arrives or [`Directory::remove`] drops it.
    ///
    /// # Errors
    ///
    /// - `RoomError::Ports` if no port is left from the configured start
    /// - `RoomError::CreationFailed` if every bind attempt lost its race
    /// - `RoomError::Serve` if called outside a Tokio runtime
    pub fn get_or_create(&self, name: &str) -> Result<(Arc<Room>, bool), RoomError> {
        let outcome = self.upsert(name, None)?;
        Ok((outcome.room, outcome.created))
    }

    /// Add `member` to room `name`, creating the room if absent.
    ///
    /// The member is added under the room's entry lock, so it never lands in
    /// a room that is being torn down. A new room is bound and served before
    /// that lock is taken; if another join published the room first, the
    /// spare is closed and the member joins the published one.
    ///
    /// # Errors
    ///
    /// Same as [`Directory::get_or_create`]. On error nothing changed.
    pub fn join(&self, name: &str, member: Member) -> Result<JoinOutcome, RoomError> {
        self.upsert(name, Some(member))
    }

    /// Room `name`, if it exists.
    pub fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).map(|room| Arc::clone(room.value()))
    }

    /// Remove and close room `name` regardless of members. Idempotent.
    pub fn remove(&self, name: &str) -> Option<Arc<Room>> {
        let (_, room) = self.rooms.remove(name)?;
        self.teardown(&room);
        Some(room)
    }

    /// Remove member `id` from room `name`.
    ///
    /// If the room drains to zero it is removed, closed and its port released
    /// before the entry lock is dropped. Returns whether `id` was a member.
    pub fn leave(&self, name: &str, id: MemberId) -> bool {
        let Entry::Occupied(entry) = self.rooms.entry(name.to_string()) else {
            return false;
        };
        let Some(remaining) = entry.get().remove_member(id) else {
            return false;
        };

        tracing::debug!(room = name, member = %id, remaining, "member left");
        if remaining == 0 {
            self.teardown(entry.get());
            entry.remove();
        }
        true
    }

    /// Snapshot of rooms with members, sorted by name.
    ///
    /// Lazily consistent: rows reflect the moment each shard was read, and no
    /// global lock is taken.
    pub fn list(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|entry| {
                let room = entry.value();
                RoomInfo {
                    name: room.name().to_string(),
                    members: room.member_count(),
                    port: room.port(),
                }
            })
            .filter(|info| info.members > 0)
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Broadcast `line` in room `name`; `None` if the room does not exist.
    ///
    /// Members whose outbox is gone are removed asynchronously.
    pub fn broadcast(&self, name: &str, line: &str) -> Option<BroadcastReport> {
        let room = self.get(name)?;
        let report = room.broadcast(line);
        self.reap_failed(name, &report);
        Some(report)
    }

    /// Broadcast `line` in room `name` on behalf of `sender`.
    ///
    /// `None` if the room does not exist or `sender` is not one of its
    /// members; nothing is delivered in either case.
    pub fn broadcast_from(
        &self,
        name: &str,
        sender: MemberId,
        line: &str,
    ) -> Option<BroadcastReport> {
        let room = self.get(name)?;
        let report = room.broadcast_from(sender, line)?;
        self.reap_failed(name, &report);
        Some(report)
    }

    /// Number of rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room exists
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn reap_failed(&self, name: &str, report: &BroadcastReport) {
        if !report.failed.is_empty() {
            self.reap(name, report.failed.clone());
        }
    }

    /// Remove unreachable members of room `name` off the caller's path.
    pub(crate) fn reap(&self, name: &str, failed: Vec<MemberId>) {
        let Some(directory) = self.me.upgrade() else {
            return;
        };
        let name = name.to_string();
        let reap = move || {
            for id in failed {
                if directory.leave(&name, id) {
                    tracing::warn!(room = %name, member = %id, "reaped unreachable member");
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { reap() });
            },
            Err(_) => reap(),
        }
    }

    fn upsert(&self, name: &str, member: Option<Member>) -> Result<JoinOutcome, RoomError> {
        if let Entry::Occupied(entry) = self.rooms.entry(name.to_string()) {
            let room = Arc::clone(entry.get());
            if let Some(member) = member {
                room.add_member(member);
            }
            return Ok(JoinOutcome { room, created: false });
        }

        // Port scanning and binding run without the entry lock held.
        let room = Arc::new(self.create_room(name)?);
        if let Err(e) = room.serve() {
            room.close();
            return Err(e);
        }

        match self.rooms.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                room.close();
                tracing::debug!(room = name, port = room.port(), "room creation lost the race");
                let existing = Arc::clone(entry.get());
                if let Some(member) = member {
                    existing.add_member(member);
                }
                Ok(JoinOutcome { room: existing, created: false })
            },
            Entry::Vacant(entry) => {
                if let Some(member) = member {
                    let added = room.add_member(member);
                    debug_assert!(added, "fresh room refused its first member");
                }
                self.ports.record_assigned(room.port());
                entry.insert(Arc::clone(&room));

                tracing::info!(room = name, port = room.port(), "room created");
                Ok(JoinOutcome { room, created: true })
            },
        }
    }

    /// Bind a new room, retrying with the next port when a bind loses the
    /// race against another process.
    fn create_room(&self, name: &str) -> Result<Room, RoomError> {
        let mut start = self.config.room_port_start;
        let mut attempts = 0;

        while attempts < self.config.max_bind_attempts {
            attempts += 1;
            let port = self.ports.allocate(start)?;

            match Room::create(name, self.config.bind_ip, port, self.me.clone()) {
                Ok(room) => return Ok(room),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(room = name, port, attempt = attempts, "room bind failed: {e}");
                    match port.checked_add(1) {
                        Some(next) => start = next,
                        None => break,
                    }
                },
                Err(e) => return Err(e),
            }
        }

        Err(RoomError::CreationFailed { room: name.to_string(), attempts })
    }

    fn teardown(&self, room: &Room) {
        room.close();
        self.ports.record_released(room.port());
    }
}
