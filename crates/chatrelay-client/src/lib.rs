//! Chat relay line client.
//!
//! Connects to the directory server, echoes every server line and forwards
//! every input line. When the server announces a room port, the client opens
//! a feed connection to that port on the same host, introduces itself with
//! its display name and prints what the room broadcasts. While a feed is
//! open, a chat line delivered on both connections is printed once, from
//! whichever connection delivered it first.
//!
//! The client stops when the server sends the closing marker or closes the
//! directory connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dedup;
mod error;

use std::net::{IpAddr, SocketAddr};

use chatrelay_core::{Command, ServerLine};
use dedup::{ChatDedup, Source};
pub use error::ClientError;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

/// Default directory port.
pub const DEFAULT_PORT: u16 = 9025;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory server address (e.g., "localhost:9025")
    pub server_address: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { server_address: format!("localhost:{DEFAULT_PORT}") }
    }
}

/// Open connection to a room port.
struct Feed {
    lines: Lines<BufReader<OwnedReadHalf>>,
    /// Held so the room keeps the connection; nothing is written after the name
    _writer: OwnedWriteHalf,
}

impl Feed {
    async fn open(addr: SocketAddr, name: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(format!("{name}\n").as_bytes()).await?;
        Ok(Self { lines: BufReader::new(reader).lines(), _writer: writer })
    }
}

/// Next feed line; pending forever while no feed is open.
async fn next_feed_line(feed: &mut Option<Feed>) -> std::io::Result<Option<String>> {
    match feed {
        Some(feed) => feed.lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Run one client session.
///
/// `input` supplies the user's lines; everything meant for the user is
/// written to `output`.
///
/// # Errors
///
/// - `ClientError::Config` if the server address resolves to nothing
/// - `ClientError::Transport` if the directory connection fails
pub async fn run<I, O>(config: &ClientConfig, input: I, mut output: O) -> Result<(), ClientError>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let addr = tokio::net::lookup_host(&config.server_address).await?.next().ok_or_else(|| {
        ClientError::Config(format!("no address found for {}", config.server_address))
    })?;
    let stream = TcpStream::connect(addr).await?;
    let host = stream.peer_addr()?.ip();
    let (reader, mut writer) = stream.into_split();
    let mut server = BufReader::new(reader).lines();
    let mut input = input.lines();

    show(&mut output, &format!("Connected to main server on {}", config.server_address)).await?;

    let mut feed: Option<Feed> = None;
    let mut dedup = ChatDedup::default();
    let mut name: Option<String> = None;
    let mut reading_input = true;

    loop {
        tokio::select! {
            line = server.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("directory connection closed");
                    break;
                };

                match ServerLine::parse(&line) {
                    ServerLine::Close => break,
                    ServerLine::RoomPort(port) => {
                        feed = open_feed(&mut output, host, port, name.as_deref()).await?;
                        dedup.reset();
                    },
                    ServerLine::LeftRoom(room) => {
                        tracing::debug!(room, "left room, closing feed");
                        feed = None;
                        dedup.reset();
                        show(&mut output, &line).await?;
                    },
                    ServerLine::Chat(_) if feed.is_some() => {
                        if dedup.admit(Source::Directory, &line) {
                            show(&mut output, &line).await?;
                        }
                    },
                    ServerLine::Chat(_) | ServerLine::Text(_) => show(&mut output, &line).await?,
                }
            },

            line = next_feed_line(&mut feed) => match line {
                Ok(Some(line)) => {
                    if dedup.admit(Source::Feed, &line) {
                        show(&mut output, &line).await?;
                    }
                },
                Ok(None) => {
                    tracing::debug!("room feed closed");
                    feed = None;
                    dedup.reset();
                },
                Err(e) => {
                    tracing::warn!("room feed failed: {e}");
                    feed = None;
                    dedup.reset();
                },
            },

            line = input.next_line(), if reading_input => match line? {
                Some(line) => {
                    if name.is_none() && !line.trim().is_empty() {
                        name = Some(line.trim().to_string());
                    }
                    writer.write_all(format!("{line}\n").as_bytes()).await?;

                    // Wait for the goodbye and closing marker, read nothing more.
                    if Command::parse(&line) == Command::Exit {
                        reading_input = false;
                    }
                },
                None => {
                    reading_input = false;
                    writer.shutdown().await?;
                },
            },
        }
    }

    show(&mut output, "Client exited.").await?;
    Ok(())
}

async fn open_feed<O>(
    output: &mut O,
    host: IpAddr,
    port: u16,
    name: Option<&str>,
) -> Result<Option<Feed>, ClientError>
where
    O: AsyncWrite + Unpin,
{
    let addr = SocketAddr::new(host, port);
    match Feed::open(addr, name.unwrap_or_default()).await {
        Ok(feed) => {
            tracing::debug!(%addr, "room feed open");
            Ok(Some(feed))
        },
        Err(e) => {
            tracing::warn!(%addr, "room feed failed: {e}");
            show(output, &format!("Error connecting to chat room: {e}")).await?;
            Ok(None)
        },
    }
}

async fn show<O>(output: &mut O, line: &str) -> Result<(), ClientError>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(format!("{line}\n").as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
