//! Authoritative world state owned by a lobby

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::combat::Projectile;
use super::GRID_SIZE;

/// Starting and maximum health
pub const MAX_HEALTH: i32 = 100;

/// Server-owned colour palette; index order is the assignment order
pub const PALETTE: [&str; 8] = [
    "red", "blue", "green", "purple", "orange", "yellow", "cyan", "magenta",
];

/// Spawn cells indexed by admission slot
pub const SPAWN_POINTS: [(i32, i32); 8] = [
    (2, 2),
    (GRID_SIZE - 3, GRID_SIZE - 3),
    (2, GRID_SIZE - 3),
    (GRID_SIZE - 3, 2),
    (GRID_SIZE / 2, 2),
    (GRID_SIZE / 2, GRID_SIZE - 3),
    (2, GRID_SIZE / 2),
    (GRID_SIZE - 3, GRID_SIZE / 2),
];

/// Lobby lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyStatus {
    Pending,
    Running,
    Finished,
}

/// Per-lobby tuning, fixed at lobby creation
#[derive(Debug, Clone)]
pub struct GameRules {
    pub tick_length: Duration,
    /// Health removed per projectile hit
    pub damage: i32,
    /// Cells a projectile advances per tick
    pub travel_distance: f64,
    pub min_players: usize,
    pub max_players: usize,
    /// Countdown armed once quorum is reached
    pub start_grace: Duration,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            tick_length: Duration::from_millis(2000),
            damage: 25,
            travel_distance: 1.0,
            min_players: 2,
            max_players: 4,
            start_grace: Duration::from_secs(10),
        }
    }
}

impl GameRules {
    pub fn tick_length_millis(&self) -> u64 {
        self.tick_length.as_millis() as u64
    }
}

/// Player state in a lobby (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub color: String,
    pub slot: usize,
    pub x: i32,
    pub y: i32,
    pub rotation: i32,
    pub health: i32,
}

impl Player {
    pub fn new(id: String, name: String, color: String, slot: usize, x: i32, y: i32) -> Self {
        Self {
            id,
            name,
            color,
            slot,
            x,
            y,
            rotation: 0,
            health: MAX_HEALTH,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Subtract damage, clamping at zero. Returns true when this hit eliminated the player.
    pub fn take_damage(&mut self, damage: i32) -> bool {
        let was_alive = self.is_alive();
        self.health = (self.health - damage).clamp(0, MAX_HEALTH);
        was_alive && !self.is_alive()
    }
}

/// The simulated world of one lobby
#[derive(Debug, Clone)]
pub struct World {
    pub tick: u64,
    pub tick_length_milli_seconds: u64,
    /// Keyed by player id; iteration is ascending by id
    pub players: BTreeMap<String, Player>,
    pub entities: Vec<Projectile>,
    pub spectators: u32,
    pub status: LobbyStatus,
    next_projectile_id: u64,
}

impl World {
    pub fn new(tick_length_milli_seconds: u64) -> Self {
        Self {
            tick: 0,
            tick_length_milli_seconds,
            players: BTreeMap::new(),
            entities: Vec::new(),
            spectators: 0,
            status: LobbyStatus::Pending,
            next_projectile_id: 1,
        }
    }

    /// Allocate the next projectile id for this lobby
    pub fn next_projectile_id(&mut self) -> u64 {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        id
    }

    pub fn live_player_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive()).count()
    }

    pub fn player_at(&self, x: i32, y: i32) -> Option<&Player> {
        self.players.values().find(|p| p.x == x && p.y == y)
    }

    /// Lowest slot not held by a current player
    pub fn free_slot(&self, capacity: usize) -> Option<usize> {
        (0..capacity).find(|slot| !self.players.values().any(|p| p.slot == *slot))
    }

    /// First palette colour not in use
    pub fn free_color(&self) -> Option<&'static str> {
        PALETTE
            .iter()
            .copied()
            .find(|color| !self.players.values().any(|p| p.color == *color))
    }
}
