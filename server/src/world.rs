//! Spatial world state advanced by the tick loop.
//!
//! Terrain content is produced by [`ChunkGenerator`], which is deterministic in
//! the world seed and chunk coordinates. That lets network tasks answer chunk
//! requests without touching simulation state. Projectiles are owned by
//! [`ServerWorld`] and only the simulation task mutates them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ChunkData, ChunkRequest, Packet, ProjectileData, Vector2, CHUNK_SIZE};

/// World units per second.
pub const PROJECTILE_SPEED: f32 = 12.0;
/// Projectiles that never reach their target are removed after this many seconds.
pub const PROJECTILE_MAX_LIFETIME: f32 = 5.0;

pub const TILE_AIR: u8 = 0;
pub const TILE_GROUND: u8 = 1;
pub const TILE_STONE: u8 = 2;
pub const TILE_ORE: u8 = 3;

/// Produces chunk contents from the world seed.
#[derive(Debug, Clone)]
pub struct ChunkGenerator {
    seed: u64,
}

impl ChunkGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn generate(&self, request: ChunkRequest) -> ChunkData {
        let mut rng = StdRng::seed_from_u64(self.chunk_seed(request.x, request.y));
        let tiles = (0..CHUNK_SIZE * CHUNK_SIZE)
            .map(|index| {
                let row = (index / CHUNK_SIZE) as i64 + request.y as i64 * CHUNK_SIZE as i64;
                if row > 0 {
                    TILE_AIR
                } else {
                    match rng.gen_range(0..100) {
                        0..=69 => TILE_GROUND,
                        70..=94 => TILE_STONE,
                        _ => TILE_ORE,
                    }
                }
            })
            .collect();

        ChunkData {
            x: request.x,
            y: request.y,
            tiles,
        }
    }

    fn chunk_seed(&self, x: i32, y: i32) -> u64 {
        let packed = ((x as u32 as u64) << 32) | y as u32 as u64;
        self.seed ^ packed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u32,
    pub owner: u32,
    pub position: Vector2,
    pub target: Vector2,
    velocity: Vector2,
    remaining: f32,
}

impl Projectile {
    fn new(id: u32, data: &ProjectileData) -> Self {
        let travel = data.start.distance(&data.target);
        let velocity = data.target.sub(&data.start).normalize().scale(PROJECTILE_SPEED);
        Self {
            id,
            owner: data.owner,
            position: data.start,
            target: data.target,
            velocity,
            remaining: (travel / PROJECTILE_SPEED).min(PROJECTILE_MAX_LIFETIME),
        }
    }

    /// Moves the projectile. Returns false once it has expired.
    fn advance(&mut self, dt: f32) -> bool {
        let step = dt.min(self.remaining);
        self.position = self.position.add(&self.velocity.scale(step));
        self.remaining -= dt;
        self.remaining > 0.0
    }

    fn to_data(&self) -> ProjectileData {
        ProjectileData {
            owner: self.owner,
            start: self.position,
            target: self.target,
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerWorld {
    projectiles: Vec<Projectile>,
    next_projectile_id: u32,
}

impl ServerWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_projectile(&mut self, data: &ProjectileData) -> u32 {
        let id = self.next_projectile_id;
        self.next_projectile_id = self.next_projectile_id.wrapping_add(1);
        self.projectiles.push(Projectile::new(id, data));
        id
    }

    pub fn destroy_projectile(&mut self, id: u32) -> bool {
        let before = self.projectiles.len();
        self.projectiles.retain(|p| p.id != id);
        self.projectiles.len() != before
    }

    /// Advances every projectile and removes the expired ones, returning their ids.
    pub fn update(&mut self, dt: f32) -> Vec<u32> {
        let mut expired = Vec::new();
        self.projectiles.retain_mut(|projectile| {
            let alive = projectile.advance(dt);
            if !alive {
                expired.push(projectile.id);
            }
            alive
        });
        expired
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Packets describing the world for a newly joined connection.
    pub fn snapshot(&self) -> Vec<Packet> {
        self.projectiles
            .iter()
            .map(|p| Packet::ProjectileSpawn(p.to_data()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn shot(distance: f32) -> ProjectileData {
        ProjectileData {
            owner: 1,
            start: Vector2::ZERO,
            target: Vector2::new(distance, 0.0),
        }
    }

    #[test]
    fn test_chunks_are_deterministic() {
        let generator = ChunkGenerator::new(50);
        let request = ChunkRequest { x: 3, y: -2 };

        let first = generator.generate(request);
        let second = generator.generate(request);
        assert_eq!(first, second);
        assert_eq!(first.tiles.len(), CHUNK_SIZE * CHUNK_SIZE);
        assert_eq!((first.x, first.y), (3, -2));

        let other_seed = ChunkGenerator::new(51).generate(request);
        assert_ne!(first.tiles, other_seed.tiles);
    }

    #[test]
    fn test_chunks_above_ground_are_empty() {
        let chunk = ChunkGenerator::new(7).generate(ChunkRequest { x: 0, y: 1 });
        assert!(chunk.tiles.iter().all(|&t| t == TILE_AIR));
    }

    #[test]
    fn test_projectile_moves_towards_target() {
        let mut world = ServerWorld::new();
        world.add_projectile(&shot(PROJECTILE_SPEED * 2.0));

        let expired = world.update(0.5);
        assert!(expired.is_empty());
        assert_approx_eq!(world.projectiles()[0].position.x, PROJECTILE_SPEED * 0.5, 0.001);
    }

    #[test]
    fn test_projectile_expires_on_arrival() {
        let mut world = ServerWorld::new();
        let id = world.add_projectile(&shot(PROJECTILE_SPEED));

        assert!(world.update(0.6).is_empty());
        assert_eq!(world.update(0.6), vec![id]);
        assert!(world.projectiles().is_empty());
    }

    #[test]
    fn test_projectile_lifetime_is_capped() {
        let mut world = ServerWorld::new();
        world.add_projectile(&shot(PROJECTILE_SPEED * 100.0));

        assert!(world.update(PROJECTILE_MAX_LIFETIME - 0.5).is_empty());
        assert_eq!(world.update(1.0).len(), 1);
    }

    #[test]
    fn test_destroy_projectile() {
        let mut world = ServerWorld::new();
        let a = world.add_projectile(&shot(10.0));
        let b = world.add_projectile(&shot(10.0));
        assert_ne!(a, b);

        assert!(world.destroy_projectile(a));
        assert!(!world.destroy_projectile(a));
        assert_eq!(world.projectiles().len(), 1);
        assert_eq!(world.snapshot().len(), 1);
    }
}
