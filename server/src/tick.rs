//! The simulation task.
//!
//! [`Simulation`] owns the event manager, the world and the entity
//! registries. Each tick it drains the pending-task queue once, then advances
//! events, world and registries in that order. Nothing else mutates them.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{EventChain, EventEffect, EventManager};
use crate::outbox::Outbox;
use crate::registry::CharacterManager;
use crate::tasks::{PendingTask, TaskQueue};
use crate::world::ServerWorld;
use log::{debug, warn};
use shared::Packet;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Authoritative game state and the queue that feeds it.
pub struct Simulation {
    tasks: TaskQueue,
    outbox: Outbox,
    events: EventManager,
    world: ServerWorld,
    characters: CharacterManager,
    tick: u64,
    speed: f32,
}

impl Simulation {
    /// Creates an empty simulation draining `tasks` and reporting through `outbox`.
    pub fn new(tasks: TaskQueue, outbox: Outbox, speed: f32) -> Self {
        Self {
            tasks,
            outbox,
            events: EventManager::new(),
            world: ServerWorld::new(),
            characters: CharacterManager::new(),
            tick: 0,
            speed,
        }
    }

    /// Runs one tick of `dt` real seconds. Returns false when paused, in
    /// which case nothing runs and the queue is left untouched.
    pub fn step(&mut self, dt: f32) -> bool {
        if self.is_paused() {
            return false;
        }
        let dt = dt * self.speed;

        for task in self.tasks.take_batch() {
            let operation = task.operation();
            if let Err(e) = self.execute(task) {
                warn!("Dropped {} task: {}", operation, e);
            }
        }

        for effect in self.events.update(dt) {
            self.apply_effect(effect);
        }

        let expired = self.world.update(dt);
        if !expired.is_empty() {
            debug!("Projectiles {:?} expired", expired);
        }

        self.characters.update(dt);
        self.tick += 1;
        true
    }

    fn execute(&mut self, task: PendingTask) -> Result<(), ServerError> {
        match task {
            PendingTask::AddPlayer { connection, data } => {
                let player_id = data.id;
                let matrix_updates = self.characters.add_player(data)?;
                for update in matrix_updates {
                    self.outbox.send(connection, Packet::MatrixUpdate(update));
                }
                for packet in self.world.snapshot() {
                    self.outbox.send(connection, packet);
                }
                for packet in self.characters.snapshot_for(player_id) {
                    self.outbox.send(connection, packet);
                }
            }
            PendingTask::RemovePlayer { id } => {
                self.characters.remove_player(id)?;
            }
            PendingTask::UpdateMatrix(update) => {
                self.characters.update_matrix(&update)?;
            }
            PendingTask::Action(action) => {
                let matrix = self.characters.matrix(action.player_id, action.slot)?;
                let chain = EventChain::from_action(matrix, &action);
                if chain.is_finished() {
                    debug!(
                        "Player {} used empty matrix slot {}",
                        action.player_id, action.slot
                    );
                } else {
                    self.events.add_chain(chain);
                }
            }
            PendingTask::MovePlayer(movement) => {
                self.characters
                    .move_player(movement.player_id, movement.position)?;
            }
            PendingTask::SpawnProjectile(projectile) => {
                self.world.add_projectile(&projectile);
            }
            PendingTask::SpawnMonster { location } => {
                let monster = self.characters.spawn_monster(location)?;
                self.outbox.broadcast(Packet::Monster(monster), None);
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, effect: EventEffect) {
        match effect {
            EventEffect::SpawnProjectile(projectile) => {
                self.world.add_projectile(&projectile);
                self.outbox
                    .broadcast(Packet::ProjectileSpawn(projectile), None);
            }
            EventEffect::PlaySound(sound) => {
                self.outbox.broadcast(Packet::Sound(sound), None);
            }
        }
    }

    /// True while the speed multiplier is zero.
    pub fn is_paused(&self) -> bool {
        self.speed <= 0.0
    }

    /// Sets the simulation speed multiplier; zero pauses.
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.max(0.0);
    }

    /// Number of ticks that ran.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn world(&self) -> &ServerWorld {
        &self.world
    }

    /// Players and monsters.
    pub fn characters(&self) -> &CharacterManager {
        &self.characters
    }

    fn status(&self) -> String {
        format!(
            "Tick {}: {} players, {} monsters, {} event chains, {} projectiles",
            self.tick,
            self.characters.players().len(),
            self.characters.monsters().len(),
            self.events.len(),
            self.world.projectiles().len()
        )
    }
}

/// Timing parameters of the tick loop.
#[derive(Debug, Clone, Copy)]
pub struct TickSettings {
    pub tick_duration: Duration,
    /// Ticks between status lines.
    pub status_interval: u64,
    pub slow_tick_threshold: Duration,
}

impl From<&ServerConfig> for TickSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            tick_duration: config.tick_duration(),
            status_interval: config.tick_rate.max(1) as u64,
            slow_tick_threshold: config.slow_tick_threshold,
        }
    }
}

/// Drives `simulation` at a fixed rate with measured elapsed time. Late
/// ticks are skipped rather than caught up.
pub async fn run_tick_loop(mut simulation: Simulation, settings: TickSettings) {
    let mut ticker = interval(settings.tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick completes immediately.
    ticker.tick().await;
    let mut last_tick = Instant::now();

    loop {
        ticker.tick().await;

        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;

        if elapsed > settings.slow_tick_threshold {
            warn!(
                "Tick {} took {}ms (threshold {}ms)",
                simulation.tick(),
                elapsed.as_millis(),
                settings.slow_tick_threshold.as_millis()
            );
        }

        if !simulation.step(elapsed.as_secs_f32()) {
            continue;
        }

        if settings.status_interval > 0 && simulation.tick() % settings.status_interval == 0 {
            debug!("{}", simulation.status());
        }
    }
}
