//! Wire protocol shared by the server and its clients.
//!
//! Every message exchanged over a connection is a [`Packet`]. Packets are
//! serialized with bincode and carried in length-prefixed frames (see
//! [`framing`]). The payload structs below are plain data: the server owns the
//! authoritative copies and clients only ever see snapshots of them.

pub mod framing;

use serde::{Deserialize, Serialize};

/// Largest player identity handed out, regardless of configured capacity.
pub const PLAYER_ID_LIMIT: u32 = 9999;
/// Largest monster identity handed out.
pub const MONSTER_ID_LIMIT: u32 = 9999;
pub const DEFAULT_PORT: u16 = 6143;
pub const DEFAULT_TICK_RATE: u32 = 64;
/// Tiles per chunk edge.
pub const CHUNK_SIZE: usize = 16;
/// Number of ability matrices each player carries.
pub const MATRIX_SLOTS: usize = 4;
/// Edge length of an ability matrix.
pub const MATRIX_SIZE: usize = 3;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Handshake
    Connect { version: String, name: String },
    PlayerConnect(PlayerData),
    PlayerId { id: u32 },
    PlayerJoin(PlayerData),
    Closed { reason: String },
    Disconnect { id: u32 },

    // Ability matrices and actions
    MatrixUpdate(MatrixUpdate),
    Action(ActionData),

    // World
    ChunkRequest(ChunkRequest),
    Chunk(ChunkData),
    Chat(ChatData),
    Move(MoveData),
    Ping { timestamp: u64 },
    ProjectileSpawn(ProjectileData),
    Sound(SoundData),
    MonsterSpawn { location: Vector2 },
    Monster(MonsterData),
}

/// Payload-free tag of a [`Packet`], used to key handler tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    PlayerConnect,
    PlayerId,
    PlayerJoin,
    Closed,
    Disconnect,
    MatrixUpdate,
    Action,
    ChunkRequest,
    Chunk,
    Chat,
    Move,
    Ping,
    ProjectileSpawn,
    Sound,
    MonsterSpawn,
    Monster,
}

impl Packet {
    pub fn kind(&self) -> MessageKind {
        match self {
            Packet::Connect { .. } => MessageKind::Connect,
            Packet::PlayerConnect(_) => MessageKind::PlayerConnect,
            Packet::PlayerId { .. } => MessageKind::PlayerId,
            Packet::PlayerJoin(_) => MessageKind::PlayerJoin,
            Packet::Closed { .. } => MessageKind::Closed,
            Packet::Disconnect { .. } => MessageKind::Disconnect,
            Packet::MatrixUpdate(_) => MessageKind::MatrixUpdate,
            Packet::Action(_) => MessageKind::Action,
            Packet::ChunkRequest(_) => MessageKind::ChunkRequest,
            Packet::Chunk(_) => MessageKind::Chunk,
            Packet::Chat(_) => MessageKind::Chat,
            Packet::Move(_) => MessageKind::Move,
            Packet::Ping { .. } => MessageKind::Ping,
            Packet::ProjectileSpawn(_) => MessageKind::ProjectileSpawn,
            Packet::Sound(_) => MessageKind::Sound,
            Packet::MonsterSpawn { .. } => MessageKind::MonsterSpawn,
            Packet::Monster(_) => MessageKind::Monster,
        }
    }
}

impl MessageKind {
    /// Kinds a client is allowed to send.
    pub const INBOUND: [MessageKind; 11] = [
        MessageKind::Connect,
        MessageKind::PlayerJoin,
        MessageKind::MatrixUpdate,
        MessageKind::Action,
        MessageKind::ChunkRequest,
        MessageKind::Chat,
        MessageKind::Move,
        MessageKind::Ping,
        MessageKind::ProjectileSpawn,
        MessageKind::Sound,
        MessageKind::MonsterSpawn,
    ];
}

/// A point or direction in world space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// False if either component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        other.sub(self).magnitude()
    }

    /// Unit vector in the same direction, or zero for the zero vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2::new(self.x / mag, self.y / mag)
        }
    }

    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2::new(self.x * scalar, self.y * scalar)
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2::new(self.x - other.x, self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemKind {
    Weapon,
    Armor,
    Trinket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub name: String,
    pub kind: ItemKind,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Inventory {
    pub items: Vec<Item>,
}

impl Inventory {
    pub fn add(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Items currently worn or wielded.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Equipment {
    pub weapon: Option<Item>,
    pub armor: Option<Item>,
    pub trinkets: Vec<Item>,
}

impl Equipment {
    pub fn is_empty(&self) -> bool {
        self.weapon.is_none() && self.armor.is_none() && self.trinkets.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SpellEffect {
    /// Fires a projectile from the caster towards the target.
    Projectile,
    /// Plays a named sound at the target.
    Sound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpellNode {
    pub effect: SpellEffect,
    /// Seconds between the action and this node firing, before travel time.
    pub delay: f32,
}

/// Square grid of spell nodes, stored row-major.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpellMatrix {
    pub nodes: Vec<Option<SpellNode>>,
}

impl Default for SpellMatrix {
    fn default() -> Self {
        Self {
            nodes: vec![None; MATRIX_SIZE * MATRIX_SIZE],
        }
    }
}

impl SpellMatrix {
    /// Replaces the node at `index`. Returns false if the index is outside the grid.
    pub fn set(&mut self, index: usize, node: Option<SpellNode>) -> bool {
        match self.nodes.get_mut(index) {
            Some(slot) => {
                *slot = node;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&SpellNode> {
        self.nodes.get(index).and_then(|node| node.as_ref())
    }

    /// Filled nodes with their grid index, in row-major order.
    pub fn filled(&self) -> impl Iterator<Item = (usize, &SpellNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.as_ref().map(|n| (index, n)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerData {
    pub id: u32,
    pub name: String,
    pub position: Vector2,
    pub equipment: Equipment,
    pub inventory: Inventory,
}

impl PlayerData {
    /// Default state for a player: at the origin with nothing equipped.
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            position: Vector2::ZERO,
            equipment: Equipment::default(),
            inventory: Inventory::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonsterData {
    pub id: u32,
    pub name: String,
    pub position: Vector2,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixUpdate {
    pub player_id: u32,
    pub slot: u32,
    pub index: u32,
    pub node: Option<SpellNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionData {
    pub player_id: u32,
    pub slot: u32,
    pub start: Vector2,
    pub target: Vector2,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRequest {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkData {
    pub x: i32,
    pub y: i32,
    /// `CHUNK_SIZE * CHUNK_SIZE` tile ids, row-major.
    pub tiles: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatData {
    pub owner: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveData {
    pub player_id: u32,
    pub position: Vector2,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectileData {
    pub owner: u32,
    pub start: Vector2,
    pub target: Vector2,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoundData {
    pub name: String,
    pub position: Vector2,
}
