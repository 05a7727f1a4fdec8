//! End-to-end scenarios over loopback TCP
//!
//! Each test starts a real server on an ephemeral directory port and drives
//! it with line clients, including feed connections on announced room ports.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use chatrelay_core::{ServerLine, protocol};
use chatrelay_server::{Directory, DirectoryConfig, Server, ServerConfig};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{sleep, timeout},
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(5);

async fn start_server(room_port_start: u16, workers: usize) -> (SocketAddr, Arc<Directory>) {
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        workers,
        directory: DirectoryConfig { bind_ip: LOCALHOST, room_port_start, max_bind_attempts: 8 },
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let directory = server.directory();
    tokio::spawn(server.run());
    (addr, directory)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached");
}

/// Line-oriented test client for both directory and room connections.
struct LineClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self { lines: BufReader::new(reader).lines(), writer }
    }

    /// Connect to the directory and complete the name exchange.
    async fn named(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        assert_eq!(client.recv().await, protocol::NAME_PROMPT);
        client.send(name).await;
        assert_eq!(client.recv().await, protocol::welcome(name));
        client
    }

    /// Open a feed connection on a room port.
    async fn feed(port: u16, name: &str) -> Self {
        let mut client = Self::connect(SocketAddr::new(LOCALHOST, port)).await;
        client.send(name).await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed")
    }

    /// Receive until a line matches, skipping others.
    async fn recv_until(&mut self, matches: impl Fn(&str) -> bool) -> String {
        loop {
            let line = self.recv().await;
            if matches(&line) {
                return line;
            }
        }
    }

    /// Join `room` and return the announced port.
    async fn join(&mut self, room: &str) -> u16 {
        self.send(&format!("/join {room}")).await;
        assert_eq!(self.recv_until(|l| l == protocol::joined(room)).await, protocol::joined(room));
        match ServerLine::parse(&self.recv().await) {
            ServerLine::RoomPort(port) => port,
            other => panic!("expected port announcement, got {other:?}"),
        }
    }

    /// Whether the peer closes the connection, skipping remaining lines.
    async fn closes(&mut self) -> bool {
        timeout(WAIT, async {
            loop {
                match self.lines.next_line().await {
                    Ok(Some(_)) => {},
                    Ok(None) | Err(_) => return true,
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::test]
async fn two_clients_chat_through_room_port_and_room_disappears() {
    let (addr, directory) = start_server(44_000, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let port = alice.join("general").await;
    let mut bob = LineClient::named(addr, "bob").await;
    assert_eq!(bob.join("general").await, port);

    let mut alice_feed = LineClient::feed(port, "alice").await;
    let mut bob_feed = LineClient::feed(port, "bob").await;
    let room = directory.get("general").unwrap();
    eventually(|| room.connection_count() == 2).await;

    alice.send("hello from alice").await;
    let line = bob_feed.recv().await;
    assert!(matches!(ServerLine::parse(&line), ServerLine::Chat(_)));
    assert!(line.ends_with("alice: hello from alice"));
    assert!(alice_feed.recv().await.ends_with("alice: hello from alice"));

    bob_feed.send("hi alice").await;
    assert!(alice_feed.recv_until(|l| l.ends_with("bob: hi alice")).await.starts_with('['));

    alice.send("/leave").await;
    alice.recv_until(|l| l == protocol::left("general")).await;
    bob.send("leave").await;
    bob.recv_until(|l| l == protocol::left("general")).await;

    let mut carol = LineClient::named(addr, "carol").await;
    carol.send("/listrooms").await;
    assert_eq!(carol.recv().await, protocol::NO_ROOMS);

    assert!(alice_feed.closes().await);
    assert!(bob_feed.closes().await);
    assert!(!directory.ports().is_assigned(port));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_share_one_room() {
    let (addr, directory) = start_server(44_100, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let mut bob = LineClient::named(addr, "bob").await;

    let (alice_port, bob_port) = tokio::join!(alice.join("lobby"), bob.join("lobby"));

    assert_eq!(alice_port, bob_port);
    assert_eq!(directory.len(), 1);
    assert_eq!(directory.ports().assigned(), vec![alice_port]);
    assert_eq!(directory.get("lobby").map(|room| room.member_count()), Some(2));
}

#[tokio::test]
async fn exit_shrinks_room_for_remaining_member() {
    let (addr, directory) = start_server(44_200, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let mut bob = LineClient::named(addr, "bob").await;
    let port = alice.join("general").await;
    bob.join("general").await;

    alice.send("/exit").await;
    assert_eq!(alice.recv().await, protocol::GOODBYE);
    assert_eq!(alice.recv().await, protocol::CLOSE_CONNECTION);
    assert!(alice.closes().await);

    bob.send("/listrooms").await;
    assert_eq!(bob.recv().await, protocol::room_listing("general", 1, port));

    bob.send("/exit").await;
    assert_eq!(bob.recv().await, protocol::GOODBYE);

    let mut carol = LineClient::named(addr, "carol").await;
    carol.send("/listrooms").await;
    assert_eq!(carol.recv().await, protocol::NO_ROOMS);
    assert!(directory.is_empty());
}

#[tokio::test]
async fn abrupt_disconnect_releases_membership() {
    let (addr, directory) = start_server(44_300, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let port = alice.join("general").await;
    drop(alice);

    eventually(|| directory.get("general").is_none()).await;
    eventually(|| !directory.ports().is_assigned(port)).await;
}

#[tokio::test]
async fn switching_rooms_leaves_the_previous_one() {
    let (addr, directory) = start_server(44_400, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    alice.join("first").await;

    alice.send("/join second").await;
    assert_eq!(alice.recv().await, protocol::left("first"));
    assert_eq!(alice.recv().await, protocol::joined("second"));
    assert!(matches!(ServerLine::parse(&alice.recv().await), ServerLine::RoomPort(_)));

    assert!(directory.get("first").is_none());
    assert_eq!(directory.get("second").map(|room| room.member_count()), Some(1));
}

#[tokio::test]
async fn rejoining_current_room_reannounces_port() {
    let (addr, directory) = start_server(44_500, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let port = alice.join("general").await;
    assert_eq!(alice.join("general").await, port);

    assert_eq!(directory.get("general").map(|room| room.member_count()), Some(1));
}

#[tokio::test]
async fn chat_outside_room_is_dropped() {
    let (addr, _directory) = start_server(44_600, 10).await;

    let mut alice = LineClient::named(addr, "alice").await;
    alice.send("anyone here?").await;
    alice.send("/leave").await;
    alice.send("/listrooms").await;

    assert_eq!(alice.recv().await, protocol::NO_ROOMS);
}

#[tokio::test]
async fn blank_name_prompts_again() {
    let (addr, _directory) = start_server(44_700, 10).await;

    let mut client = LineClient::connect(addr).await;
    assert_eq!(client.recv().await, protocol::NAME_PROMPT);
    client.send("   ").await;
    assert_eq!(client.recv().await, protocol::NAME_PROMPT);
    client.send("dave").await;
    assert_eq!(client.recv().await, protocol::welcome("dave"));
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_sessions() {
    let (addr, _directory) = start_server(44_800, 1).await;

    let mut alice = LineClient::named(addr, "alice").await;
    let mut bob = LineClient::connect(addr).await;

    let waiting = timeout(Duration::from_millis(200), bob.lines.next_line()).await;
    assert!(waiting.is_err(), "second client served while the pool was full");

    alice.send("/exit").await;
    assert!(alice.closes().await);
    assert_eq!(bob.recv().await, protocol::NAME_PROMPT);
}
