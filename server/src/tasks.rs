//! Deferred mutations handed from network tasks to the simulation.
//!
//! Network tasks never touch registries, the world or the event manager.
//! Anything that would mutate them is pushed here as a [`PendingTask`] and
//! executed by the tick loop. Draining swaps the buffer out under the lock, so
//! a task pushed while a batch is being executed lands in the next batch.

use crate::connection_manager::ConnectionId;
use parking_lot::Mutex;
use shared::{ActionData, MatrixUpdate, MoveData, PlayerData, ProjectileData, Vector2};
use std::sync::Arc;

/// A state mutation waiting for the next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingTask {
    /// Registers a player whose connection completed the handshake.
    AddPlayer {
        connection: ConnectionId,
        data: PlayerData,
    },
    RemovePlayer {
        id: u32,
    },
    UpdateMatrix(MatrixUpdate),
    /// Resolves an ability into an event chain.
    Action(ActionData),
    MovePlayer(MoveData),
    SpawnProjectile(ProjectileData),
    SpawnMonster {
        location: Vector2,
    },
}

impl PendingTask {
    /// Short name used in log lines.
    pub fn operation(&self) -> &'static str {
        match self {
            PendingTask::AddPlayer { .. } => "add player",
            PendingTask::RemovePlayer { .. } => "remove player",
            PendingTask::UpdateMatrix(_) => "update matrix",
            PendingTask::Action(_) => "action",
            PendingTask::MovePlayer(_) => "move player",
            PendingTask::SpawnProjectile(_) => "spawn projectile",
            PendingTask::SpawnMonster { .. } => "spawn monster",
        }
    }
}

/// Multi-producer queue consumed once per tick.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    pending: Arc<Mutex<Vec<PendingTask>>>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` for the next drain.
    pub fn push(&self, task: PendingTask) {
        self.pending.lock().push(task);
    }

    /// Takes every task queued so far, in enqueue order.
    pub fn take_batch(&self) -> Vec<PendingTask> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of tasks waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
