use log::{debug, info, warn};
use shared::framing::{read_packet, write_packet};
use shared::{Packet, PlayerData};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection and said why.
    #[error("server closed the connection: {0}")]
    Rejected(String),

    #[error("connection lost")]
    Disconnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected packet during {stage}: {packet:?}")]
    UnexpectedPacket { stage: &'static str, packet: Packet },
}

/// What the server answered to `Connect`.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    /// Server-data mode: the server owns the player's state.
    ServerData(PlayerData),
    /// Client mode: only an identity was assigned.
    ClientData { id: u32 },
}

impl Handshake {
    /// Identity the server assigned.
    pub fn player_id(&self) -> u32 {
        match self {
            Handshake::ServerData(data) => data.id,
            Handshake::ClientData { id } => *id,
        }
    }
}

/// A connection to the game server.
///
/// Incoming frames are decoded by a background task, so receiving with a
/// timeout never leaves the stream in the middle of a frame.
pub struct Client {
    writer: OwnedWriteHalf,
    incoming: mpsc::UnboundedReceiver<Packet>,
    reader_task: JoinHandle<()>,
    player_id: Option<u32>,
    fake_ping_ms: u64,
}

impl Client {
    /// Opens a TCP connection and starts reading frames in the background.
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        info!("Connecting to {}...", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let (tx, incoming) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_packet(&mut reader).await {
                    Ok(packet) => {
                        if tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Stopped reading from server: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Client {
            writer,
            incoming,
            reader_task,
            player_id: None,
            fake_ping_ms: 0,
        })
    }

    /// Delays every outgoing packet by half of `fake_ping_ms`.
    pub fn with_fake_ping(mut self, fake_ping_ms: u64) -> Self {
        self.fake_ping_ms = fake_ping_ms;
        self
    }

    /// Identity from the last successful handshake.
    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    /// Writes one framed packet.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }
        write_packet(&mut self.writer, packet).await?;
        Ok(())
    }

    /// Next packet from the server. A `Closed` packet becomes `Rejected`.
    pub async fn recv(&mut self) -> Result<Packet, ClientError> {
        match self.incoming.recv().await {
            Some(Packet::Closed { reason }) => {
                warn!("Server closed the connection: {}", reason);
                Err(ClientError::Rejected(reason))
            }
            Some(packet) => Ok(packet),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Like [`Client::recv`], failing with `Timeout` after `limit`.
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Packet, ClientError> {
        timeout(limit, self.recv())
            .await
            .map_err(|_| ClientError::Timeout(limit))?
    }

    /// Skips packets until one satisfies `matches`, giving up after `limit`.
    pub async fn recv_matching<F>(&mut self, limit: Duration, matches: F) -> Result<Packet, ClientError>
    where
        F: Fn(&Packet) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.recv_timeout(remaining).await?;
            if matches(&packet) {
                return Ok(packet);
            }
            debug!("Skipping {:?} while waiting", packet.kind());
        }
    }

    /// Packets already received and not yet read.
    pub fn drain(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.incoming.try_recv() {
            packets.push(packet);
        }
        packets
    }

    /// Sends `Connect` and waits for the server's answer.
    pub async fn handshake(
        &mut self,
        version: &str,
        name: &str,
        limit: Duration,
    ) -> Result<Handshake, ClientError> {
        self.send(&Packet::Connect {
            version: version.to_string(),
            name: name.to_string(),
        })
        .await?;

        let handshake = match self.recv_timeout(limit).await? {
            Packet::PlayerConnect(data) => Handshake::ServerData(data),
            Packet::PlayerId { id } => Handshake::ClientData { id },
            packet => {
                return Err(ClientError::UnexpectedPacket {
                    stage: "handshake",
                    packet,
                })
            }
        };

        info!("Connected as player {}", handshake.player_id());
        self.player_id = Some(handshake.player_id());
        Ok(handshake)
    }

    /// Completes the handshake by echoing the player's state.
    pub async fn join(&mut self, data: PlayerData) -> Result<(), ClientError> {
        self.send(&Packet::PlayerJoin(data)).await
    }

    /// Connects, handshakes and joins. In client mode the state is built
    /// locally from the assigned identity.
    pub async fn connect_and_join(
        server_addr: &str,
        version: &str,
        name: &str,
        limit: Duration,
    ) -> Result<(Self, PlayerData), ClientError> {
        let mut client = Client::connect(server_addr).await?;
        let data = match client.handshake(version, name, limit).await? {
            Handshake::ServerData(data) => data,
            Handshake::ClientData { id } => PlayerData::new(id, name),
        };
        client.join(data.clone()).await?;
        Ok((client, data))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
