//! Queue of outbound packets shared by handlers and the simulation.
//!
//! Producers never write to sockets. They queue an [`OutboundMessage`] and a
//! single router task resolves it against the connection manager and hands
//! the packet to each target's writer task. One queue keeps every packet a
//! producer sends in the order it sent them.

use crate::connection_manager::ConnectionId;
use log::error;
use shared::Packet;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Delivered to one connection.
    SendPacket {
        connection: ConnectionId,
        packet: Packet,
    },
    /// Delivered to every joined connection except `exclude`.
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ConnectionId>,
    },
    /// Sends the reason to one connection and closes it.
    Close {
        connection: ConnectionId,
        reason: String,
    },
}

/// Producer end of the outbound queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    /// Creates the queue and returns the receiver the router drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues `packet` for one connection.
    pub fn send(&self, connection: ConnectionId, packet: Packet) {
        if let Err(e) = self
            .tx
            .send(OutboundMessage::SendPacket { connection, packet })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Queues `packet` for every joined connection except `exclude`.
    pub fn broadcast(&self, packet: Packet, exclude: Option<ConnectionId>) {
        if let Err(e) = self
            .tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Queues a close with a reason the peer will see.
    pub fn close(&self, connection: ConnectionId, reason: String) {
        if let Err(e) = self.tx.send(OutboundMessage::Close { connection, reason }) {
            error!("Failed to queue close for connection {}: {}", connection, e);
        }
    }
}
