//! Directory connection driver.
//!
//! Executes [`SessionAction`]s produced by the pure [`Session`] against real
//! I/O: replies go to the connection's outbox, room operations go to the
//! shared [`Directory`]. Each connection has two tasks: this driver reading
//! lines, and a writer draining the outbox onto the socket. Rooms hold clones
//! of the outbox as the membership token, so the writer finishes once the
//! driver and every room have let go of it.

use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use chatrelay_core::{Session, SessionAction, protocol};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use crate::{
    clock,
    directory::Directory,
    error::ServerError,
    room::{Member, MemberId, Outbox},
};

/// Write every line from `inbox` to `writer`, then shut the write side down.
///
/// Stops early if the peer is gone.
pub(crate) async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = inbox.recv().await {
        let mut framed = line.into_bytes();
        framed.push(b'\n');
        if let Err(e) = writer.write_all(&framed).await {
            tracing::debug!("write failed: {e}");
            return;
        }
    }

    let _ = writer.shutdown().await;
}

/// Serve one directory client until `exit`, EOF or a read error.
///
/// On every path out, the session's room membership is released before the
/// socket closes.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    directory: Arc<Directory>,
) -> Result<(), ServerError> {
    let (reader, writer) = stream.into_split();
    let (outbox, inbox) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(writer, inbox));

    let mut connection =
        Connection { id: directory.next_member_id(), session: Session::new(), outbox, directory };
    tracing::debug!(%peer, member = %connection.id, "directory connection accepted");

    let result = connection.serve(reader).await;

    let cleanup = connection.session.disconnect();
    connection.execute(cleanup);
    tracing::debug!(%peer, member = %connection.id, "directory connection closed");

    drop(connection);
    if let Err(e) = writer.await {
        tracing::warn!(%peer, "writer task failed: {e}");
    }

    result
}

struct Connection {
    id: MemberId,
    session: Session,
    outbox: Outbox,
    directory: Arc<Directory>,
}

impl Connection {
    async fn serve(&mut self, reader: OwnedReadHalf) -> Result<(), ServerError> {
        let start = self.session.start();
        self.execute(start);

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::debug!(member = %self.id, "read failed: {e}");
                    return Ok(());
                },
            };

            let actions = self.session.handle_line(&line)?;
            if !self.execute(actions) {
                return Ok(());
            }
        }
    }

    /// Run `actions` in order. Returns `false` once the session asked to close.
    fn execute(&mut self, actions: Vec<SessionAction>) -> bool {
        let mut queue = VecDeque::from(actions);
        let mut open = true;

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Send(line) => self.send(line),
                SessionAction::JoinRoom { room } => {
                    let follow_up = self.join(&room);
                    for action in follow_up.into_iter().rev() {
                        queue.push_front(action);
                    }
                },
                SessionAction::LeaveRoom { room } => {
                    self.directory.leave(&room, self.id);
                },
                SessionAction::ListRooms => {
                    let rooms = self.directory.list();
                    if rooms.is_empty() {
                        self.send(protocol::NO_ROOMS.to_string());
                    }
                    for info in rooms {
                        self.send(protocol::room_listing(&info.name, info.members, info.port));
                    }
                },
                SessionAction::Broadcast { room, text } => {
                    let line = protocol::chat_line(&clock::timestamp(), &text);
                    if self.directory.broadcast_from(&room, self.id, &line).is_none() {
                        tracing::debug!(
                            room = %room,
                            member = %self.id,
                            "chat dropped, not a member"
                        );
                    }
                },
                SessionAction::Close => open = false,
            }
        }

        open
    }

    fn join(&mut self, room: &str) -> Vec<SessionAction> {
        let member = Member {
            id: self.id,
            name: self.session.name().unwrap_or_default().to_string(),
            outbox: self.outbox.clone(),
        };

        match self.directory.join(room, member) {
            Ok(outcome) => self.session.join_succeeded(room, outcome.room.port()),
            Err(e) => {
                tracing::warn!(room, member = %self.id, "join failed: {e}");
                self.session.join_failed(room, &e.to_string())
            },
        }
    }

    fn send(&self, line: String) {
        if self.outbox.send(line).is_err() {
            tracing::debug!(member = %self.id, "reply dropped, writer gone");
        }
    }
}
