//! A headless player that wanders around and exercises the server.

use crate::network::{Client, ClientError};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ActionData, ChatData, ChunkRequest, MoveData, Packet, PlayerData, Vector2, CHUNK_SIZE};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;

/// World units per second.
pub const BOT_SPEED: f32 = 4.0;
/// Bots pick targets within this distance of the origin.
pub const WANDER_RADIUS: f32 = 32.0;

/// A joined client that moves towards random targets.
pub struct Bot {
    client: Client,
    data: PlayerData,
    rng: StdRng,
    target: Vector2,
    ping_ms: u64,
}

impl Bot {
    /// Wraps a joined client. The same seed gives the same path.
    pub fn new(client: Client, data: PlayerData, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let target = random_point(&mut rng);
        Self {
            client,
            data,
            rng,
            target,
            ping_ms: 0,
        }
    }

    /// Position last reported to the server.
    pub fn position(&self) -> Vector2 {
        self.data.position
    }

    /// Round trip of the latest ping, in milliseconds.
    pub fn ping_ms(&self) -> u64 {
        self.ping_ms
    }

    /// Moves towards the current target, picking a new one on arrival.
    pub fn step(&mut self, dt: f32) -> Vector2 {
        let to_target = self.target.sub(&self.data.position);
        let step = BOT_SPEED * dt;
        if to_target.magnitude() <= step {
            self.data.position = self.target;
            self.target = random_point(&mut self.rng);
        } else {
            self.data.position = self
                .data
                .position
                .add(&to_target.normalize().scale(step));
        }
        self.data.position
    }

    /// Runs until the server closes the connection or `duration` passes.
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), ClientError> {
        let started = tokio::time::Instant::now();
        let mut move_interval = interval(Duration::from_millis(100));
        let mut ping_interval = interval(Duration::from_secs(1));
        let mut action_interval = interval(Duration::from_secs(3));

        let chunk = self.chunk_under_bot();
        self.client.send(&Packet::ChunkRequest(chunk)).await?;

        loop {
            if let Some(limit) = duration {
                if started.elapsed() >= limit {
                    info!("Bot '{}' finished after {:?}", self.data.name, limit);
                    return Ok(());
                }
            }

            tokio::select! {
                packet = self.client.recv() => self.handle_packet(packet?),
                _ = move_interval.tick() => {
                    let position = self.step(0.1);
                    self.client.send(&Packet::Move(MoveData {
                        player_id: self.data.id,
                        position,
                    })).await?;
                },
                _ = ping_interval.tick() => {
                    self.client.send(&Packet::Ping { timestamp: now_millis() }).await?;
                },
                _ = action_interval.tick() => {
                    let target = random_point(&mut self.rng);
                    self.client.send(&Packet::Action(ActionData {
                        player_id: self.data.id,
                        slot: 0,
                        start: self.data.position,
                        target,
                    })).await?;
                    if self.rng.gen_bool(0.2) {
                        self.client.send(&Packet::Chat(ChatData {
                            owner: self.data.id,
                            message: format!("{} is at ({:.1}, {:.1})", self.data.name, self.data.position.x, self.data.position.y),
                        })).await?;
                    }
                },
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Ping { timestamp } => {
                self.ping_ms = now_millis().saturating_sub(timestamp);
            }
            Packet::PlayerJoin(data) => info!("{} joined", data.name),
            Packet::Disconnect { id } => info!("Player {} left", id),
            Packet::Chat(chat) => info!("[{}] {}", chat.owner, chat.message),
            Packet::Chunk(chunk) => info!(
                "Received chunk ({}, {}) with {} tiles",
                chunk.x,
                chunk.y,
                chunk.tiles.len()
            ),
            Packet::Monster(monster) => info!("Monster {} appeared", monster.id),
            Packet::Move(_)
            | Packet::MatrixUpdate(_)
            | Packet::ProjectileSpawn(_)
            | Packet::Sound(_) => {}
            other => warn!("Unexpected packet {:?}", other.kind()),
        }
    }

    fn chunk_under_bot(&self) -> ChunkRequest {
        let size = CHUNK_SIZE as f32;
        ChunkRequest {
            x: (self.data.position.x / size).floor() as i32,
            y: (self.data.position.y / size).floor() as i32,
        }
    }
}

fn random_point<R: Rng>(rng: &mut R) -> Vector2 {
    Vector2::new(
        rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
        rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
    )
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
