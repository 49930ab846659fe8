//! Server network layer: listener, per-connection tasks and packet routing.
//!
//! Each accepted socket gets a reader loop that dispatches packets through the
//! [`HandlerTable`] and a writer task fed by an unbounded channel. Handlers and
//! the simulation never write to sockets: they queue into the
//! [`Outbox`](crate::outbox::Outbox), and the router task resolves each
//! message to writer channels.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionId, ConnectionManager, Outgoing};
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::handlers::HandlerTable;
use crate::outbox::OutboundMessage;
use crate::store::RecordStore;
use crate::tasks::PendingTask;
use crate::tick::{run_tick_loop, Simulation, TickSettings};
use log::{debug, error, info, warn};
use shared::framing::{read_packet, write_packet};
use shared::Packet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;

pub const HANDSHAKE_TIMEOUT_REASON: &str = "Handshake timed out.";

/// Entry point that wires the server tasks together.
pub struct Server;

impl Server {
    /// Binds the listener and starts every server task.
    ///
    /// The handler table is complete before the first connection is
    /// accepted. A bind failure is the only error.
    pub async fn start(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<ServerHandle, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::TransportFailure {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::TransportFailure { addr, source })?;
        info!(
            "Server listening on {} (version {})",
            local_addr, config.version
        );

        let handlers = Arc::new(HandlerTable::standard());
        let settings = TickSettings::from(&config);
        let speed = config.speed;
        let (context, outbound_rx) = ServerContext::new(config, store);
        let context = Arc::new(context);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let simulation = Simulation::new(context.tasks.clone(), context.outbox.clone(), speed);
        let tasks = vec![
            spawn_outbound_router(Arc::clone(&context.connections), outbound_rx),
            spawn_handshake_timeout_checker(Arc::clone(&context)),
            tokio::spawn(run_tick_loop(simulation, settings)),
            spawn_accept_loop(listener, Arc::clone(&context), handlers, shutdown_rx),
        ];

        info!("Server started successfully");
        Ok(ServerHandle {
            local_addr,
            context,
            tasks,
            shutdown: shutdown_tx,
        })
    }
}

/// Running server. Dropping the handle leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    context: Arc<ServerContext>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// State shared by the network tasks.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Closes every connection and stops the server tasks.
    pub fn shutdown(self) {
        info!("Server shutting down");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.abort();
        }
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    handlers: Arc<HandlerTable>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        Arc::clone(&context),
                        Arc::clone(&handlers),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
    handlers: Arc<HandlerTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let connection = context.connections.write().await.add_connection(addr, tx);
    info!("Connection {} opened from {}", connection, addr);

    // Dropped when the writer stops, which ends the reader loop below.
    let (writer_done_tx, mut writer_done_rx) = oneshot::channel::<()>();
    let writer_task = tokio::spawn(async move {
        let _writer_done = writer_done_tx;
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Packet(packet) => {
                    if let Err(e) = write_packet(&mut writer, &packet).await {
                        debug!("Write to connection {} failed: {}", connection, e);
                        break;
                    }
                }
                Outgoing::Close(reason) => {
                    if let Err(e) = write_packet(&mut writer, &Packet::Closed { reason }).await {
                        debug!("Close to connection {} failed: {}", connection, e);
                    }
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            result = read_packet(&mut reader) => match result {
                Ok(packet) => handlers.dispatch(&context, connection, packet).await,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Connection {} closed by peer", connection);
                    break;
                }
                Err(e) => {
                    warn!("Dropping connection {}: {}", connection, e);
                    break;
                }
            },
            _ = &mut writer_done_rx => break,
            Ok(()) = shutdown.changed() => break,
        }
    }

    connection_lost(&context, connection).await;
    if let Err(e) = writer_task.await {
        error!("Writer task for connection {} failed: {}", connection, e);
    }
}

/// Forgets a connection. A joined player is removed from the simulation and
/// every remaining player is told; an identity that was only reserved is
/// released silently.
///
/// The removal task is queued before the connection lock is released, so a
/// player that reuses the identity is always added after the old one is gone.
pub async fn connection_lost(context: &ServerContext, connection: ConnectionId) {
    let mut connections = context.connections.write().await;
    let Some(removed) = connections.remove_connection(connection) else {
        return;
    };

    match removed.player_id {
        Some(id) if removed.is_joined() => {
            info!("Player '{}' ({}) disconnected", removed.display_name(), id);
            context.tasks.push(PendingTask::RemovePlayer { id });
            context.outbox.broadcast(Packet::Disconnect { id }, None);
        }
        Some(id) => info!(
            "Released identity {} of '{}', who never joined",
            id,
            removed.display_name()
        ),
        None => debug!("Connection {} closed before connecting", connection),
    }
}

fn spawn_outbound_router(
    connections: Arc<RwLock<ConnectionManager>>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                OutboundMessage::SendPacket { connection, packet } => {
                    let sender = connections.read().await.sender(connection);
                    match sender {
                        Some(sender) => {
                            if sender.send(Outgoing::Packet(packet)).is_err() {
                                debug!("Connection {} stopped writing", connection);
                            }
                        }
                        None => debug!("Dropping packet for closed connection {}", connection),
                    }
                }
                OutboundMessage::BroadcastPacket { packet, exclude } => {
                    let targets = connections.read().await.joined_senders(exclude);
                    for (connection, sender) in targets {
                        if sender.send(Outgoing::Packet(packet.clone())).is_err() {
                            debug!("Connection {} stopped writing", connection);
                        }
                    }
                }
                OutboundMessage::Close { connection, reason } => {
                    let sender = connections.read().await.sender(connection);
                    if let Some(sender) = sender {
                        let _ = sender.send(Outgoing::Close(reason));
                    }
                }
            }
        }
    })
}

/// Closes connections that were authenticated but never joined within the
/// configured handshake timeout.
fn spawn_handshake_timeout_checker(context: Arc<ServerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timeout = context.config.handshake_timeout;
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            interval.tick().await;

            let expired = context.connections.read().await.expired_handshakes(timeout);
            for connection in expired {
                warn!(
                    "Connection {} did not join within {}s",
                    connection,
                    timeout.as_secs()
                );
                context
                    .close_connection(connection, HANDSHAKE_TIMEOUT_REASON.to_string())
                    .await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use shared::PlayerData;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            version: "1.0".to_string(),
            ..ServerConfig::default()
        }
    }

    async fn read_with_timeout(stream: &mut TcpStream) -> Packet {
        tokio::time::timeout(Duration::from_secs(2), read_packet(stream))
            .await
            .expect("timed out waiting for packet")
            .expect("failed to read packet")
    }

    async fn open(context: &ServerContext) -> ConnectionId {
        let (tx, _rx) = mpsc::unbounded_channel();
        context
            .connections
            .write()
            .await
            .add_connection("127.0.0.1:7100".parse().unwrap(), tx)
    }

    async fn connect_and_join(
        context: &ServerContext,
        handlers: &HandlerTable,
        name: &str,
    ) -> ConnectionId {
        let connection = open(context).await;
        let connect = Packet::Connect {
            version: "1.0".to_string(),
            name: name.to_string(),
        };
        handlers.dispatch(context, connection, connect).await;
        handlers
            .dispatch(context, connection, Packet::PlayerJoin(PlayerData::new(0, name)))
            .await;
        connection
    }

    #[tokio::test]
    async fn test_reused_identity_is_added_after_previous_owner_is_removed() {
        let config = ServerConfig {
            max_players: 1,
            ..loopback_config()
        };
        let (context, _outbound) = ServerContext::new(config, Arc::new(MemoryRecordStore::new()));
        let handlers = HandlerTable::standard();
        let mut simulation = Simulation::new(context.tasks.clone(), context.outbox.clone(), 1.0);

        let alice = connect_and_join(&context, &handlers, "Alice").await;
        simulation.step(0.0);
        assert!(simulation.characters().players().contains(0));

        connection_lost(&context, alice).await;
        connect_and_join(&context, &handlers, "Bob").await;
        simulation.step(0.0);

        let players = simulation.characters().players();
        assert_eq!(players.len(), 1);
        assert_eq!(players.get(0).unwrap().data.name, "Bob");
    }

    #[tokio::test]
    async fn test_connection_lost_before_connect_does_nothing() {
        let (context, mut outbound) =
            ServerContext::new(loopback_config(), Arc::new(MemoryRecordStore::new()));
        let connection = open(&context).await;

        connection_lost(&context, connection).await;
        connection_lost(&context, connection).await;

        assert!(outbound.try_recv().is_err());
        assert!(context.tasks.is_empty());
        assert!(context.connections.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_is_transport_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..loopback_config()
        };

        match Server::start(config, Arc::new(MemoryRecordStore::new())).await {
            Err(ServerError::TransportFailure { .. }) => {}
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Expected bind to fail"),
        }
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let server = Server::start(loopback_config(), Arc::new(MemoryRecordStore::new()))
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        write_packet(&mut stream, &Packet::Ping { timestamp: 77 })
            .await
            .unwrap();
        assert_eq!(read_with_timeout(&mut stream).await, Packet::Ping { timestamp: 77 });

        server.shutdown();
    }

    #[tokio::test]
    async fn test_version_mismatch_sends_reason_and_closes() {
        let server = Server::start(loopback_config(), Arc::new(MemoryRecordStore::new()))
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        write_packet(
            &mut stream,
            &Packet::Connect {
                version: "0.1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            read_with_timeout(&mut stream).await,
            Packet::Closed {
                reason: "Invalid Version. [Client: 0.1] [Server: 1.0]".to_string()
            }
        );
        let next = tokio::time::timeout(Duration::from_secs(2), read_packet(&mut stream))
            .await
            .expect("socket was not closed");
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_unjoined_identity_is_released_on_disconnect() {
        let config = ServerConfig {
            max_players: 1,
            ..loopback_config()
        };
        let server = Server::start(config, Arc::new(MemoryRecordStore::new()))
            .await
            .unwrap();

        let mut first = TcpStream::connect(server.local_addr()).await.unwrap();
        write_packet(
            &mut first,
            &Packet::Connect {
                version: "1.0".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            read_with_timeout(&mut first).await,
            Packet::PlayerConnect(_)
        ));
        drop(first);

        // The slot frees up once the server notices the disconnect.
        let mut reserved = 1;
        for _ in 0..50 {
            reserved = server
                .context()
                .connections
                .read()
                .await
                .reserved_identities();
            if reserved == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(reserved, 0);
    }

    #[tokio::test]
    async fn test_handshake_timeout_closes_connection() {
        let config = ServerConfig {
            handshake_timeout: Duration::ZERO,
            ..loopback_config()
        };
        let server = Server::start(config, Arc::new(MemoryRecordStore::new()))
            .await
            .unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        write_packet(
            &mut stream,
            &Packet::Connect {
                version: "1.0".to_string(),
                name: "Slowpoke".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            read_with_timeout(&mut stream).await,
            Packet::PlayerConnect(_)
        ));
        assert_eq!(
            read_with_timeout(&mut stream).await,
            Packet::Closed {
                reason: HANDSHAKE_TIMEOUT_REASON.to_string()
            }
        );
    }
}
