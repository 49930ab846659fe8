//! State shared by every network task.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionId, ConnectionManager};
use crate::outbox::{OutboundMessage, Outbox};
use crate::store::RecordStore;
use crate::tasks::TaskQueue;
use crate::world::ChunkGenerator;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Everything a handler may touch. Simulation state is deliberately absent:
/// handlers reach it only through [`TaskQueue`].
pub struct ServerContext {
    /// Settings read at startup
    pub config: Arc<ServerConfig>,
    /// Connections and reserved player identities
    pub connections: Arc<RwLock<ConnectionManager>>,
    /// Work handed to the simulation
    pub tasks: TaskQueue,
    /// Packets waiting to be routed to writers
    pub outbox: Outbox,
    /// Persistent player records
    pub store: Arc<dyn RecordStore>,
    /// Answers chunk requests without simulation state
    pub chunks: ChunkGenerator,
}

impl ServerContext {
    /// Builds a context and returns the receiving end of its outbox, which
    /// the caller must route.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbox, outbound_rx) = Outbox::new();
        let context = Self {
            connections: Arc::new(RwLock::new(ConnectionManager::new(config.player_limit()))),
            tasks: TaskQueue::new(),
            outbox,
            store,
            chunks: ChunkGenerator::new(config.world_seed),
            config: Arc::new(config),
        };
        (context, outbound_rx)
    }

    /// Stops processing messages from `connection` and asks its writer to
    /// send `reason` before closing. Repeated requests are ignored.
    pub async fn close_connection(&self, connection: ConnectionId, reason: String) {
        let first_request = self.connections.write().await.begin_close(connection);
        if first_request {
            self.outbox.close(connection, reason);
        }
    }
}
