//! Authoritative entity registries.
//!
//! Players and monsters live in the same generic [`Registry`], keyed by their
//! identity. Registries are owned by the simulation and only mutated from the
//! tick, so none of the types here are synchronized.

use crate::error::ServerError;
use crate::ids::{find_empty_id, IdLimit};
use log::info;
use shared::{
    MatrixUpdate, MonsterData, Packet, PlayerData, SpellEffect, SpellMatrix, SpellNode, Vector2,
    MATRIX_SLOTS, MONSTER_ID_LIMIT, PLAYER_ID_LIMIT,
};
use std::collections::BTreeMap;

/// Anything the simulation keeps in a [`Registry`].
pub trait Character {
    /// Identity within the character's namespace.
    fn id(&self) -> u32;
    /// Current world position.
    fn position(&self) -> Vector2;
    /// Advances server-side state by `dt` seconds.
    fn server_update(&mut self, dt: f32);
}

/// Live entities of one kind, keyed by identity.
#[derive(Debug)]
pub struct Registry<C: Character> {
    /// Live entities in identity order
    entities: BTreeMap<u32, C>,
    /// Upper bound of the identity namespace
    limit: IdLimit,
}

impl<C: Character> Registry<C> {
    /// Creates an empty registry whose identities stay below `limit`.
    pub fn new(limit: IdLimit) -> Self {
        Self {
            entities: BTreeMap::new(),
            limit,
        }
    }

    /// Smallest identity not used by a live entity.
    pub fn find_empty_id(&self) -> Option<u32> {
        find_empty_id(|id| self.entities.contains_key(&id), self.limit)
    }

    /// Inserts `entity` unless its identity is already live.
    pub fn insert(&mut self, entity: C) -> Result<(), ServerError> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(ServerError::MalformedState {
                operation: "insert entity",
                detail: format!("identity {} is already live", id),
            });
        }
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Removes and returns the entity, freeing its identity.
    pub fn remove(&mut self, id: u32) -> Option<C> {
        self.entities.remove(&id)
    }

    /// Gets the entity with `id`.
    pub fn get(&self, id: u32) -> Option<&C> {
        self.entities.get(&id)
    }

    /// Gets the entity with `id` for modification.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut C> {
        self.entities.get_mut(&id)
    }

    /// Checks whether `id` belongs to a live entity.
    pub fn contains(&self, id: u32) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entities in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.entities.values()
    }

    /// Runs the server-side update of every entity.
    pub fn update(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            entity.server_update(dt);
        }
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Checks whether the registry holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// A joined player as the simulation sees it.
#[derive(Debug, Clone)]
pub struct Player {
    /// State shared with clients
    pub data: PlayerData,
    /// Ability matrices, one per slot
    pub matrices: Vec<SpellMatrix>,
}

impl Player {
    /// Creates a player carrying the starter spell in slot 0.
    pub fn new(data: PlayerData) -> Self {
        let mut matrices = vec![SpellMatrix::default(); MATRIX_SLOTS];
        matrices[0] = starter_spell();
        Self { data, matrices }
    }
}

impl Character for Player {
    fn id(&self) -> u32 {
        self.data.id
    }

    fn position(&self) -> Vector2 {
        self.data.position
    }

    // Player movement is reported by the owning client.
    fn server_update(&mut self, _dt: f32) {}
}

/// A server-controlled character. Monsters hold the position they were
/// spawned at.
#[derive(Debug, Clone)]
pub struct Monster {
    /// State shared with clients
    pub data: MonsterData,
}

impl Monster {
    /// Creates a monster named after its identity.
    pub fn new(id: u32, location: Vector2) -> Self {
        Self {
            data: MonsterData {
                id,
                name: format!("Monster {}", id),
                position: location,
            },
        }
    }
}

impl Character for Monster {
    fn id(&self) -> u32 {
        self.data.id
    }

    fn position(&self) -> Vector2 {
        self.data.position
    }

    fn server_update(&mut self, _dt: f32) {}
}

/// Spell placed in slot 0 of every new player: a projectile with an impact
/// sound at the target.
pub fn starter_spell() -> SpellMatrix {
    let mut matrix = SpellMatrix::default();
    matrix.set(
        0,
        Some(SpellNode {
            effect: SpellEffect::Projectile,
            delay: 0.0,
        }),
    );
    matrix.set(
        1,
        Some(SpellNode {
            effect: SpellEffect::Sound("impact".to_string()),
            delay: 0.0,
        }),
    );
    matrix
}

/// Players and monsters, owned by the simulation.
#[derive(Debug)]
pub struct CharacterManager {
    players: Registry<Player>,
    monsters: Registry<Monster>,
}

impl Default for CharacterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterManager {
    /// Creates empty player and monster registries.
    pub fn new() -> Self {
        Self {
            players: Registry::new(IdLimit::Bounded(PLAYER_ID_LIMIT)),
            monsters: Registry::new(IdLimit::Bounded(MONSTER_ID_LIMIT)),
        }
    }

    /// Registers a joined player and returns the matrix updates that describe
    /// their starting spells.
    pub fn add_player(&mut self, data: PlayerData) -> Result<Vec<MatrixUpdate>, ServerError> {
        let id = data.id;
        let player = Player::new(data);
        let updates: Vec<MatrixUpdate> = player
            .matrices
            .iter()
            .enumerate()
            .flat_map(|(slot, matrix)| {
                matrix.filled().map(move |(index, node)| MatrixUpdate {
                    player_id: id,
                    slot: slot as u32,
                    index: index as u32,
                    node: Some(node.clone()),
                })
            })
            .collect();

        info!("Added player '{}' ({})", player.data.name, id);
        self.players.insert(player)?;
        Ok(updates)
    }

    /// Unregisters a player.
    pub fn remove_player(&mut self, id: u32) -> Result<Player, ServerError> {
        let player = self.players.remove(id).ok_or_else(|| missing_player("remove player", id))?;
        info!("Removed player '{}' ({})", player.data.name, id);
        Ok(player)
    }

    /// Records a position reported by the player's client.
    pub fn move_player(&mut self, id: u32, position: Vector2) -> Result<(), ServerError> {
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| missing_player("move player", id))?;
        player.data.position = position;
        Ok(())
    }

    /// Places or clears one node of a player's ability matrix.
    pub fn update_matrix(&mut self, update: &MatrixUpdate) -> Result<(), ServerError> {
        let player = self
            .players
            .get_mut(update.player_id)
            .ok_or_else(|| missing_player("update matrix", update.player_id))?;

        let matrix = player
            .matrices
            .get_mut(update.slot as usize)
            .ok_or_else(|| ServerError::MalformedState {
                operation: "update matrix",
                detail: format!("player {} has no matrix slot {}", update.player_id, update.slot),
            })?;

        if !matrix.set(update.index as usize, update.node.clone()) {
            return Err(ServerError::MalformedState {
                operation: "update matrix",
                detail: format!("index {} is outside the matrix", update.index),
            });
        }
        Ok(())
    }

    /// The ability matrix in `slot` of a player.
    pub fn matrix(&self, player_id: u32, slot: u32) -> Result<&SpellMatrix, ServerError> {
        let player = self
            .players
            .get(player_id)
            .ok_or_else(|| missing_player("action", player_id))?;
        player
            .matrices
            .get(slot as usize)
            .ok_or_else(|| ServerError::MalformedState {
                operation: "action",
                detail: format!("player {} has no matrix slot {}", player_id, slot),
            })
    }

    /// Allocates a monster identity and registers a monster at `location`.
    pub fn spawn_monster(&mut self, location: Vector2) -> Result<MonsterData, ServerError> {
        let id = self
            .monsters
            .find_empty_id()
            .ok_or_else(|| ServerError::MalformedState {
                operation: "spawn monster",
                detail: "monster namespace is full".to_string(),
            })?;
        let monster = Monster::new(id, location);
        let data = monster.data.clone();
        self.monsters.insert(monster)?;
        info!("Spawned monster {} at ({:.1}, {:.1})", id, location.x, location.y);
        Ok(data)
    }

    /// Packets that introduce every other player and every monster to `player_id`.
    pub fn snapshot_for(&self, player_id: u32) -> Vec<Packet> {
        let players = self
            .players
            .iter()
            .filter(|player| player.id() != player_id)
            .map(|player| Packet::PlayerJoin(player.data.clone()));
        let monsters = self
            .monsters
            .iter()
            .map(|monster| Packet::Monster(monster.data.clone()));
        players.chain(monsters).collect()
    }

    /// Advances every player and monster by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.players.update(dt);
        self.monsters.update(dt);
    }

    /// Registered players.
    pub fn players(&self) -> &Registry<Player> {
        &self.players
    }

    /// Spawned monsters.
    pub fn monsters(&self) -> &Registry<Monster> {
        &self.monsters
    }
}

fn missing_player(operation: &'static str, id: u32) -> ServerError {
    ServerError::MalformedState {
        operation,
        detail: format!("player {} is not registered", id),
    }
}
