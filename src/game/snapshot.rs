//! Snapshot building and serialization

use std::sync::Arc;

use crate::ws::protocol::{EntityType, PlayerSnapshot, ProjectileSnapshot, Snapshot};

use super::combat::Projectile;
use super::world::World;

/// Build the wire snapshot for the current world. Players come out sorted by
/// id, projectiles in id order.
pub fn build(world: &World) -> Snapshot {
    let players = world
        .players
        .values()
        .map(|p| PlayerSnapshot {
            id: p.id.clone(),
            name: p.name.clone(),
            x: p.x,
            y: p.y,
            rotation: p.rotation,
            color: p.color.clone(),
            health: p.health,
            entity_type: EntityType::Player,
        })
        .collect();

    let mut projectiles: Vec<&Projectile> = world.entities.iter().collect();
    projectiles.sort_by_key(|e| e.id);

    let entities = projectiles
        .into_iter()
        .map(|e| ProjectileSnapshot {
            id: e.id.to_string(),
            previous_x: e.previous_x,
            previous_y: e.previous_y,
            x: e.x,
            y: e.y,
            direction: e.direction,
            travel_distance: e.travel_distance,
            entity_type: EntityType::Projectile,
        })
        .collect();

    Snapshot {
        tick: world.tick.to_string(),
        tick_length_milli_seconds: world.tick_length_milli_seconds,
        spectators: world.spectators,
        players,
        entities,
    }
}

/// Serialize once; every connection shares the same text
pub fn encode(world: &World) -> Result<Arc<str>, serde_json::Error> {
    let text = serde_json::to_string(&build(world))?;
    Ok(Arc::from(text))
}

/// Broadcast volume of one lobby, logged when its task exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    pub frames: u64,
    pub bytes: u64,
    /// Player entries summed over every frame
    pub player_entries: u64,
}

impl SnapshotStats {
    pub fn record(&mut self, players: usize, bytes: usize) {
        self.frames += 1;
        self.bytes += bytes as u64;
        self.player_entries += players as u64;
    }

    pub fn mean_players(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.player_entries as f64 / self.frames as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::Player;

    #[test]
    fn snapshot_matches_wire_shape() {
        let mut world = World::new(2000);
        world.tick = 7;
        world.spectators = 2;
        world.players.insert(
            "b".into(),
            Player::new("b".into(), "Bob".into(), "blue".into(), 1, 3, 4),
        );
        world.players.insert(
            "a".into(),
            Player::new("a".into(), "Ann".into(), "red".into(), 0, 1, 2),
        );
        world.entities.push(Projectile {
            id: 10,
            owner: "a".into(),
            previous_x: 1.0,
            previous_y: 2.0,
            x: 1.0,
            y: 3.0,
            direction: 0,
            travel_distance: 1.0,
        });

        let value: serde_json::Value = serde_json::from_str(&encode(&world).unwrap()).unwrap();
        assert_eq!(value["tick"], "7");
        assert_eq!(value["tick_length_milli_seconds"], 2000);
        assert_eq!(value["spectators"], 2);
        assert_eq!(value["players"][0]["id"], "a");
        assert_eq!(value["players"][1]["name"], "Bob");
        assert_eq!(value["players"][0]["entity_type"], "PLAYER");
        assert_eq!(value["players"][0]["health"], 100);
        assert_eq!(value["entities"][0]["id"], "10");
        assert_eq!(value["entities"][0]["entity_type"], "PROJECTILE");
        assert_eq!(value["entities"][0]["y"], 3.0);
        assert!(value["entities"][0].get("owner").is_none());
    }

    #[test]
    fn projectiles_sorted_numerically() {
        let mut world = World::new(2000);
        for id in [10, 9] {
            world.entities.push(Projectile {
                id,
                owner: "a".into(),
                previous_x: 0.0,
                previous_y: 0.0,
                x: 0.0,
                y: 1.0,
                direction: 0,
                travel_distance: 1.0,
            });
        }
        let snapshot = build(&world);
        assert_eq!(snapshot.entities[0].id, "9");
        assert_eq!(snapshot.entities[1].id, "10");
    }

    #[test]
    fn stats_count_frames_bytes_and_players() {
        let mut stats = SnapshotStats::default();
        assert_eq!(stats.mean_players(), 0.0);

        stats.record(2, 100);
        stats.record(3, 300);
        stats.record(1, 50);
        assert_eq!(
            stats,
            SnapshotStats {
                frames: 3,
                bytes: 450,
                player_entries: 6,
            }
        );
        assert_eq!(stats.mean_players(), 2.0);
    }
}
