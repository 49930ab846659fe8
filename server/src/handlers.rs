//! Message handlers and the table that routes packets to them.
//!
//! Every inbound [`MessageKind`] maps to exactly one handler. The table is
//! built once before the listener accepts its first connection and is
//! read-only afterwards. Handlers answer stateless queries inline, broadcast
//! inline, and push a [`PendingTask`] for anything that mutates simulation
//! state.
//!
//! Handshake, in order:
//! 1. `Connect` carries the client version and desired name.
//! 2. The version must match the server's verbatim, otherwise the connection
//!    is closed with both versions in the reason.
//! 3. A player identity is reserved, or the connection is closed with
//!    "Server is full." and nothing is consumed.
//! 4. In server-data mode the record store is consulted by name and a
//!    starting inventory is generated.
//! 5. The server answers with `PlayerConnect` (server-data mode) or
//!    `PlayerId` (client mode).
//! 6. The client echoes `PlayerJoin`; only then is the player registered and
//!    announced to everyone else.

use crate::connection_manager::ConnectionId;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::items;
use crate::store::RecordStore;
use crate::tasks::PendingTask;
use log::{debug, error, info, warn};
use shared::{MessageKind, Packet, PlayerData};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Processes one packet from one connection.
pub type Handler = for<'a> fn(&'a ServerContext, ConnectionId, Packet) -> HandlerFuture<'a>;

/// Maps each message kind to its handler.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<MessageKind, Handler>,
}

impl HandlerTable {
    /// Creates a table with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with a handler for every kind a client may send.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(MessageKind::Connect, handle_connect);
        table.register(MessageKind::PlayerJoin, handle_player_join);
        table.register(MessageKind::MatrixUpdate, handle_matrix_update);
        table.register(MessageKind::Action, handle_action);
        table.register(MessageKind::ChunkRequest, handle_chunk_request);
        table.register(MessageKind::Chat, handle_chat);
        table.register(MessageKind::Move, handle_move);
        table.register(MessageKind::Ping, handle_ping);
        table.register(MessageKind::ProjectileSpawn, handle_projectile_spawn);
        table.register(MessageKind::Sound, handle_sound);
        table.register(MessageKind::MonsterSpawn, handle_monster_spawn);
        table
    }

    /// Registers `handler` for `kind`, replacing any previous handler.
    pub fn register(&mut self, kind: MessageKind, handler: Handler) {
        if self.handlers.insert(kind, handler).is_some() {
            warn!("Replaced handler for {:?}", kind);
        }
    }

    /// Checks whether a handler is registered for `kind`.
    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Checks whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for `packet`. Packets from connections that are
    /// closing or gone are dropped.
    pub async fn dispatch(&self, ctx: &ServerContext, connection: ConnectionId, packet: Packet) {
        let kind = packet.kind();
        if !ctx.connections.read().await.accepts_messages(connection) {
            debug!("Dropping {:?} from closing connection {}", kind, connection);
            return;
        }

        match self.handlers.get(&kind) {
            Some(handler) => handler(ctx, connection, packet).await,
            None => warn!("No handler for {:?} from connection {}", kind, connection),
        }
    }
}

fn mismatched(connection: ConnectionId, expected: MessageKind) {
    error!(
        "Handler for {:?} received another packet kind from connection {}",
        expected, connection
    );
}

/// Identity and name of a joined connection, or `None` (logged) otherwise.
async fn joined_player(
    ctx: &ServerContext,
    connection: ConnectionId,
    kind: MessageKind,
) -> Option<(u32, String)> {
    let player = ctx.connections.read().await.joined_player(connection);
    if player.is_none() {
        warn!(
            "Ignoring {:?} from connection {} before it joined",
            kind, connection
        );
    }
    player
}

/// Builds the state sent to a player in server-data mode. Store failures are
/// logged and fall back to the default state.
pub fn load_player_data(
    store: &dyn RecordStore,
    id: u32,
    name: &str,
    starting_items: usize,
) -> PlayerData {
    let mut data = PlayerData::new(id, name);

    match store.lookup_player_record(name) {
        Ok(Some(record)) => {
            info!(
                "Loaded record {} for player '{}' ({})",
                record.record_id, name, id
            );
            data.position = record.position;
            data.equipment = record.equipment;
        }
        Ok(None) => match store.create_player_record(name) {
            Ok(record_id) => info!(
                "Created record {} for new player '{}' ({})",
                record_id, name, id
            ),
            Err(e) => error!(
                "Player '{}' ({}): create record failed: {}",
                name,
                id,
                ServerError::from(e)
            ),
        },
        Err(e) => error!(
            "Player '{}' ({}): lookup record failed, using defaults: {}",
            name,
            id,
            ServerError::from(e)
        ),
    }

    data.inventory = items::starting_inventory(&mut rand::thread_rng(), starting_items);
    data
}

fn handle_connect(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Connect { version, name } = packet else {
            return mismatched(connection, MessageKind::Connect);
        };
        info!(
            "Connection {} wants to join as '{}' (version {})",
            connection, name, version
        );

        if version != ctx.config.version {
            let err = ServerError::ProtocolMismatch {
                client: version,
                server: ctx.config.version.clone(),
            };
            warn!("Rejecting '{}' on connection {}: {}", name, connection, err);
            ctx.close_connection(connection, err.close_reason()).await;
            return;
        }

        let reserved = ctx
            .connections
            .write()
            .await
            .reserve_identity(connection, &name);
        let player_id = match reserved {
            Ok(id) => id,
            Err(err @ ServerError::CapacityExceeded) => {
                warn!("Rejecting '{}' on connection {}: {}", name, connection, err);
                ctx.close_connection(connection, err.close_reason()).await;
                return;
            }
            Err(err) => {
                warn!("Ignoring Connect from '{}': {}", name, err);
                return;
            }
        };

        if !ctx.config.server_player_data {
            ctx.outbox.send(connection, Packet::PlayerId { id: player_id });
            return;
        }

        let store = Arc::clone(&ctx.store);
        let starting_items = ctx.config.starting_items;
        let lookup_name = name.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            load_player_data(store.as_ref(), player_id, &lookup_name, starting_items)
        })
        .await;

        let data = match loaded {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "Player '{}' ({}): loading state failed, using defaults: {}",
                    name, player_id, e
                );
                PlayerData::new(player_id, &name)
            }
        };
        ctx.outbox.send(connection, Packet::PlayerConnect(data));
    })
}

fn handle_player_join(
    ctx: &ServerContext,
    connection: ConnectionId,
    packet: Packet,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::PlayerJoin(mut data) = packet else {
            return mismatched(connection, MessageKind::PlayerJoin);
        };

        let joined = {
            let mut connections = ctx.connections.write().await;
            connections
                .mark_joined(connection)
                .and_then(|_| connections.joined_player(connection))
        };
        let Some((player_id, name)) = joined else {
            warn!(
                "Ignoring PlayerJoin from connection {} that is not authenticated",
                connection
            );
            return;
        };

        data.id = player_id;
        data.name = name;
        info!("Player '{}' ({}) joined", data.name, player_id);

        ctx.tasks.push(PendingTask::AddPlayer {
            connection,
            data: data.clone(),
        });
        ctx.outbox.broadcast(Packet::PlayerJoin(data), Some(connection));
    })
}

fn handle_matrix_update(
    ctx: &ServerContext,
    connection: ConnectionId,
    packet: Packet,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::MatrixUpdate(mut update) = packet else {
            return mismatched(connection, MessageKind::MatrixUpdate);
        };
        let Some((player_id, name)) =
            joined_player(ctx, connection, MessageKind::MatrixUpdate).await
        else {
            return;
        };

        if let Some(node) = &update.node {
            if !node.delay.is_finite() || node.delay < 0.0 {
                let err = ServerError::MalformedState {
                    operation: "update matrix",
                    detail: format!("node delay {} is not a finite duration", node.delay),
                };
                warn!("Ignoring MatrixUpdate from '{}' ({}): {}", name, player_id, err);
                return;
            }
        }

        update.player_id = player_id;
        ctx.outbox
            .send(connection, Packet::MatrixUpdate(update.clone()));
        ctx.tasks.push(PendingTask::UpdateMatrix(update));
    })
}

fn handle_action(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Action(mut action) = packet else {
            return mismatched(connection, MessageKind::Action);
        };
        let Some((player_id, name)) = joined_player(ctx, connection, MessageKind::Action).await
        else {
            return;
        };

        if !action.start.is_finite() || !action.target.is_finite() {
            let err = ServerError::MalformedState {
                operation: "action",
                detail: "start or target is not a finite point".to_string(),
            };
            warn!("Ignoring Action from '{}' ({}): {}", name, player_id, err);
            return;
        }

        action.player_id = player_id;
        ctx.tasks.push(PendingTask::Action(action));
    })
}

fn handle_chunk_request(
    ctx: &ServerContext,
    connection: ConnectionId,
    packet: Packet,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::ChunkRequest(request) = packet else {
            return mismatched(connection, MessageKind::ChunkRequest);
        };
        if joined_player(ctx, connection, MessageKind::ChunkRequest)
            .await
            .is_none()
        {
            return;
        }

        ctx.outbox
            .send(connection, Packet::Chunk(ctx.chunks.generate(request)));
    })
}

fn handle_chat(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Chat(mut chat) = packet else {
            return mismatched(connection, MessageKind::Chat);
        };
        let Some((player_id, name)) = joined_player(ctx, connection, MessageKind::Chat).await else {
            return;
        };

        info!("{}: {}", name, chat.message);
        chat.owner = player_id;
        ctx.outbox.broadcast(Packet::Chat(chat), Some(connection));
    })
}

fn handle_move(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Move(mut movement) = packet else {
            return mismatched(connection, MessageKind::Move);
        };
        let Some((player_id, _)) = joined_player(ctx, connection, MessageKind::Move).await else {
            return;
        };

        movement.player_id = player_id;
        ctx.tasks.push(PendingTask::MovePlayer(movement.clone()));
        ctx.outbox.broadcast(Packet::Move(movement), Some(connection));
    })
}

fn handle_ping(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Ping { timestamp } = packet else {
            return mismatched(connection, MessageKind::Ping);
        };
        ctx.outbox.send(connection, Packet::Ping { timestamp });
    })
}

fn handle_projectile_spawn(
    ctx: &ServerContext,
    connection: ConnectionId,
    packet: Packet,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::ProjectileSpawn(mut projectile) = packet else {
            return mismatched(connection, MessageKind::ProjectileSpawn);
        };
        let Some((player_id, _)) =
            joined_player(ctx, connection, MessageKind::ProjectileSpawn).await
        else {
            return;
        };

        projectile.owner = player_id;
        ctx.tasks
            .push(PendingTask::SpawnProjectile(projectile.clone()));
        ctx.outbox.broadcast(Packet::ProjectileSpawn(projectile), None);
    })
}

fn handle_sound(ctx: &ServerContext, connection: ConnectionId, packet: Packet) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::Sound(sound) = packet else {
            return mismatched(connection, MessageKind::Sound);
        };
        if joined_player(ctx, connection, MessageKind::Sound)
            .await
            .is_none()
        {
            return;
        }

        ctx.outbox.broadcast(Packet::Sound(sound), None);
    })
}

/// The monster identity is allocated by the tick, which also broadcasts the
/// new monster to every joined connection.
fn handle_monster_spawn(
    ctx: &ServerContext,
    connection: ConnectionId,
    packet: Packet,
) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Packet::MonsterSpawn { location } = packet else {
            return mismatched(connection, MessageKind::MonsterSpawn);
        };
        if joined_player(ctx, connection, MessageKind::MonsterSpawn)
            .await
            .is_none()
        {
            return;
        }

        ctx.tasks.push(PendingTask::SpawnMonster { location });
    })
}
