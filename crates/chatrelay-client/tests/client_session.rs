//! Line client against a real server
//!
//! The client's stdin and stdout are replaced with in-memory pipes; the
//! server runs on loopback with ephemeral ports.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use chatrelay_client::{ClientConfig, ClientError, run};
use chatrelay_core::protocol;
use chatrelay_server::{Directory, DirectoryConfig, Server, ServerConfig};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    net::TcpListener,
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(room_port_start: u16) -> (SocketAddr, Arc<Directory>) {
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        workers: 10,
        directory: DirectoryConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            room_port_start,
            max_bind_attempts: 8,
        },
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

/// A client task with piped terminal.
struct Terminal {
    keyboard: DuplexStream,
    screen: Lines<BufReader<DuplexStream>>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl Terminal {
    fn spawn(addr: SocketAddr) -> Self {
        let (keyboard, stdin) = tokio::io::duplex(4096);
        let (stdout, screen) = tokio::io::duplex(4096);
        let config = ClientConfig { server_address: addr.to_string() };
        let task = tokio::spawn(async move { run(&config, BufReader::new(stdin), stdout).await });
        Self { keyboard, screen: BufReader::new(screen).lines(), task }
    }

    /// Spawn, then answer the name prompt.
    async fn named(addr: SocketAddr, name: &str) -> Self {
        let mut terminal = Self::spawn(addr);
        assert!(terminal.read().await.starts_with("Connected to main server on"));
        assert_eq!(terminal.read().await, protocol::NAME_PROMPT);
        terminal.type_line(name).await;
        assert_eq!(terminal.read().await, protocol::welcome(name));
        terminal
    }

    async fn type_line(&mut self, line: &str) {
        self.keyboard.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn read(&mut self) -> String {
        timeout(WAIT, self.screen.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()
            .expect("client output closed")
    }

    async fn finish(self) -> Result<(), ClientError> {
        timeout(WAIT, self.task).await.expect("client did not stop").unwrap()
    }
}

#[tokio::test]
async fn follows_room_port_and_shows_chat_once() {
    let (addr, directory) = start_server(45_000).await;

    let mut alice = Terminal::named(addr, "alice").await;
    alice.type_line("/join general").await;
    assert_eq!(alice.read().await, protocol::joined("general"));
    eventually(|| directory.get("general").is_some_and(|room| room.connection_count() == 1)).await;

    let mut bob = Terminal::named(addr, "bob").await;
    bob.type_line("/join general").await;
    assert_eq!(bob.read().await, protocol::joined("general"));
    let room = directory.get("general").unwrap();
    eventually(|| room.connection_count() == 2).await;

    bob.type_line("hello").await;
    let chat = alice.read().await;
    assert!(chat.starts_with('['));
    assert!(chat.ends_with("bob: hello"));

    alice.type_line("/listrooms").await;
    assert_eq!(alice.read().await, protocol::room_listing("general", 2, room.port()));

    alice.type_line("/exit").await;
    assert_eq!(alice.read().await, protocol::GOODBYE);
    assert_eq!(alice.read().await, "Client exited.");
    assert!(alice.finish().await.is_ok());

    eventually(|| room.member_count() == 1).await;
}

#[tokio::test]
async fn directory_chat_shows_while_feed_is_silent() {
    let directory = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let room = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let room_port = room.local_addr().unwrap().port();

    let mut alice = Terminal::spawn(directory.local_addr().unwrap());
    let (mut server, _) = timeout(WAIT, directory.accept()).await.unwrap().unwrap();
    assert!(alice.read().await.starts_with("Connected to main server on"));

    server.write_all(format!("{}\n", protocol::room_port(room_port)).as_bytes()).await.unwrap();
    let (feed, _) = timeout(WAIT, room.accept()).await.unwrap().unwrap();
    let mut feed = BufReader::new(feed).lines();
    assert_eq!(timeout(WAIT, feed.next_line()).await.unwrap().unwrap(), Some(String::new()));

    let chat = protocol::chat_line("12:00:00", &protocol::chat_text("bob", "hello"));
    server.write_all(format!("{chat}\n").as_bytes()).await.unwrap();
    server.write_all(format!("{}\n", protocol::CLOSE_CONNECTION).as_bytes()).await.unwrap();

    assert_eq!(alice.read().await, chat);
    assert_eq!(alice.read().await, "Client exited.");
    assert!(alice.finish().await.is_ok());
    drop(feed);
}

#[tokio::test]
async fn leaving_closes_the_feed() {
    let (addr, directory) = start_server(45_100).await;

    let mut alice = Terminal::named(addr, "alice").await;
    alice.type_line("join lobby").await;
    assert_eq!(alice.read().await, protocol::joined("lobby"));
    let room = directory.get("lobby").unwrap();
    eventually(|| room.connection_count() == 1).await;

    alice.type_line("leave").await;
    assert_eq!(alice.read().await, protocol::left("lobby"));
    eventually(|| directory.get("lobby").is_none()).await;

    alice.type_line("/listrooms").await;
    assert_eq!(alice.read().await, protocol::NO_ROOMS);
}

#[tokio::test]
async fn end_of_input_disconnects() {
    let (addr, directory) = start_server(45_200).await;

    let mut alice = Terminal::named(addr, "alice").await;
    alice.type_line("/join general").await;
    assert_eq!(alice.read().await, protocol::joined("general"));

    alice.keyboard.shutdown().await.unwrap();
    assert_eq!(alice.read().await, "Client exited.");
    assert!(alice.finish().await.is_ok());

    eventually(|| directory.is_empty()).await;
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };

    let config = ClientConfig { server_address: format!("127.0.0.1:{port}") };
    let result = run(&config, BufReader::new(tokio::io::empty()), tokio::io::sink()).await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
}
