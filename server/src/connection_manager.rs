//! Connection lifecycle and player identity reservation.
//!
//! Every accepted socket gets a [`Connection`] entry that moves through
//! open → authenticated → joined and is removed when the socket goes away.
//! The manager also owns the player identity namespace: an identity is
//! reserved when the handshake authenticates a connection and released when
//! that connection is removed, whether or not it ever joined.
//!
//! The manager is shared behind a `tokio::sync::RwLock`. Reservation happens
//! under the write lock, so two handshakes racing for the last free identity
//! cannot both win.

use crate::error::ServerError;
use crate::ids::{IdLimit, IdNamespace};
use log::{debug, info};
use shared::Packet;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Server-assigned handle of an accepted socket.
///
/// Distinct from the player identity: a connection exists before it is
/// authenticated and player identities are reused after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Instructions for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Write this packet.
    Packet(Packet),
    /// Send `Closed` with this reason, then shut the socket.
    Close(String),
}

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no valid `Connect` seen yet.
    Open,
    /// Identity reserved, waiting for `PlayerJoin`.
    Authenticated { since: Instant },
    /// Entity registered and visible to other players.
    Joined,
}

/// An accepted socket and the player it speaks for
///
/// Holds the sending end of the connection's writer channel, so dropping
/// the entry ends the writer task.
#[derive(Debug)]
pub struct Connection {
    /// Handle assigned when the socket was accepted
    pub id: ConnectionId,
    /// Remote address of the socket
    pub addr: SocketAddr,
    /// Handshake progress
    pub state: ConnectionState,
    /// Player identity reserved by `Connect`
    pub player_id: Option<u32>,
    /// Name sent with `Connect`
    pub name: Option<String>,
    /// Set once a close has been requested. No further messages are processed.
    pub closing: bool,
    /// Channel to the writer task
    sender: UnboundedSender<Outgoing>,
}

impl Connection {
    fn new(id: ConnectionId, addr: SocketAddr, sender: UnboundedSender<Outgoing>) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Open,
            player_id: None,
            name: None,
            closing: false,
            sender,
        }
    }

    /// Checks whether the connection completed the handshake.
    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    /// Name for log lines, falling back to the socket address.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.addr.to_string(),
        }
    }

    fn handshake_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            ConnectionState::Authenticated { since } => {
                !self.closing && now.duration_since(since) > timeout
            }
            _ => false,
        }
    }
}

/// Tracks every open connection and the player identities they hold.
pub struct ConnectionManager {
    /// Open connections by handle
    connections: HashMap<ConnectionId, Connection>,
    /// Handle given to the next accepted socket
    next_connection_id: u64,
    /// Reserved player identities
    player_ids: IdNamespace,
}

impl ConnectionManager {
    /// Creates a manager whose player namespace holds `player_limit` identities.
    pub fn new(player_limit: u32) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            player_ids: IdNamespace::new(IdLimit::Bounded(player_limit)),
        }
    }

    /// Registers an accepted socket in the open state and returns its handle.
    pub fn add_connection(
        &mut self,
        addr: SocketAddr,
        sender: UnboundedSender<Outgoing>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        self.connections
            .insert(id, Connection::new(id, addr, sender));
        debug!("Connection {} registered for {}", id, addr);
        id
    }

    /// Reserves a player identity for an open connection and marks it
    /// authenticated. Nothing is reserved when the namespace is full.
    pub fn reserve_identity(&mut self, id: ConnectionId, name: &str) -> Result<u32, ServerError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| ServerError::MalformedState {
                operation: "reserve identity",
                detail: format!("connection {} is not registered", id),
            })?;

        if connection.state != ConnectionState::Open || connection.closing {
            return Err(ServerError::MalformedState {
                operation: "reserve identity",
                detail: format!("connection {} already sent Connect", id),
            });
        }

        let player_id = self
            .player_ids
            .allocate()
            .ok_or(ServerError::CapacityExceeded)?;

        connection.state = ConnectionState::Authenticated {
            since: Instant::now(),
        };
        connection.player_id = Some(player_id);
        connection.name = Some(name.to_string());
        info!(
            "Reserved identity {} for '{}' on connection {}",
            player_id, name, id
        );
        Ok(player_id)
    }

    /// Moves an authenticated connection to joined and returns its identity.
    /// Returns `None` for connections in any other state.
    pub fn mark_joined(&mut self, id: ConnectionId) -> Option<u32> {
        let connection = self.connections.get_mut(&id)?;
        match connection.state {
            ConnectionState::Authenticated { .. } if !connection.closing => {
                connection.state = ConnectionState::Joined;
                connection.player_id
            }
            _ => None,
        }
    }

    /// Flags a connection as closing. Returns false if it is unknown or
    /// already closing.
    pub fn begin_close(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) if !connection.closing => {
                connection.closing = true;
                true
            }
            _ => false,
        }
    }

    /// Removes a connection and releases any identity it held.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(player_id) = connection.player_id {
            self.player_ids.release(player_id);
        }
        Some(connection)
    }

    /// Gets the connection with handle `id`.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// True while the connection exists and no close has been requested.
    pub fn accepts_messages(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .map(|connection| !connection.closing)
            .unwrap_or(false)
    }

    /// Identity and name of a joined connection.
    pub fn joined_player(&self, id: ConnectionId) -> Option<(u32, String)> {
        let connection = self.connections.get(&id)?;
        if !connection.is_joined() {
            return None;
        }
        Some((connection.player_id?, connection.display_name()))
    }

    /// Writer channel of a connection, in any state.
    pub fn sender(&self, id: ConnectionId) -> Option<UnboundedSender<Outgoing>> {
        self.connections
            .get(&id)
            .map(|connection| connection.sender.clone())
    }

    /// Senders of every joined connection that is not closing, minus `exclude`.
    pub fn joined_senders(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, UnboundedSender<Outgoing>)> {
        self.connections
            .values()
            .filter(|connection| connection.is_joined() && !connection.closing)
            .filter(|connection| Some(connection.id) != exclude)
            .map(|connection| (connection.id, connection.sender.clone()))
            .collect()
    }

    /// Authenticated connections that have held their identity longer than
    /// `timeout` without joining.
    pub fn expired_handshakes(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.connections
            .values()
            .filter(|connection| connection.handshake_expired(now, timeout))
            .map(|connection| connection.id)
            .collect()
    }

    /// Number of player identities currently held.
    pub fn reserved_identities(&self) -> usize {
        self.player_ids.len()
    }

    /// Number of connections that completed the handshake.
    pub fn joined_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_joined()).count()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Checks whether no connections are open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
