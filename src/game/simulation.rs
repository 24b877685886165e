//! One deterministic simulation step

use std::collections::HashMap;

use tracing::info;

use super::actions::Action;
use super::combat::{advance_projectiles, resolve_collisions, HitResult, Projectile};
use super::physics::{cell_in_bounds, point_in_bounds, resolve_step, Direction};
use super::world::{GameRules, LobbyStatus, World, MAX_HEALTH};

/// World invariant broken by a step; fatal for the lobby
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("player {0} left the grid")]
    PlayerOutOfBounds(String),

    #[error("players {0} and {1} share a cell")]
    SharedCell(String, String),

    #[error("player {0} has health outside 0..=100")]
    HealthOutOfRange(String),

    #[error("projectile {0} left the grid without being retired")]
    ProjectileOutOfBounds(u64),
}

/// Summary of what one step did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub hits: Vec<HitResult>,
    pub annihilated: Vec<(u64, u64)>,
    pub finished: bool,
    pub winner: Option<String>,
}

/// Advance a RUNNING world by one tick.
///
/// Application order: turns, moves (ascending player id), shoots (ascending
/// player id), projectile advance, collisions, end-of-game check. Actions
/// from unknown or eliminated players are ignored. A world that is not
/// RUNNING is left untouched.
pub fn step(
    world: &mut World,
    rules: &GameRules,
    actions: Vec<(String, Action)>,
) -> Result<TickReport, SimulationError> {
    if world.status != LobbyStatus::Running {
        return Ok(TickReport {
            tick: world.tick,
            ..TickReport::default()
        });
    }

    world.tick += 1;

    let mut turns = Vec::new();
    let mut moves = Vec::new();
    let mut shots = Vec::new();
    for (player_id, action) in actions {
        let live = world.players.get(&player_id).is_some_and(|p| p.is_alive());
        if !live {
            continue;
        }
        match action {
            Action::Turn { degrees } => turns.push((player_id, degrees)),
            Action::Move(direction) => moves.push((player_id, direction)),
            Action::Shoot => shots.push(player_id),
        }
    }
    moves.sort_by(|a, b| a.0.cmp(&b.0));
    shots.sort();

    for (player_id, degrees) in turns {
        if let Some(player) = world.players.get_mut(&player_id) {
            player.rotation = degrees;
        }
    }

    for (player_id, direction) in moves {
        apply_move(world, &player_id, direction);
    }

    for player_id in shots {
        let id = world.next_projectile_id();
        if let Some(shooter) = world.players.get(&player_id) {
            let projectile = Projectile::fire(id, shooter, rules.travel_distance);
            world.entities.push(projectile);
        }
    }

    advance_projectiles(world);
    let combat = resolve_collisions(world, rules.damage);

    for hit in combat.hits.iter().filter(|h| h.target_eliminated) {
        info!(
            tick = world.tick,
            target_id = %hit.target_id,
            shooter_id = %hit.shooter_id,
            "player eliminated"
        );
    }

    let mut report = TickReport {
        tick: world.tick,
        hits: combat.hits,
        annihilated: combat.annihilated,
        finished: false,
        winner: None,
    };

    if world.live_player_count() <= 1 {
        world.status = LobbyStatus::Finished;
        report.finished = true;
        report.winner = world
            .players
            .values()
            .find(|p| p.is_alive())
            .map(|p| p.id.clone());
    }

    check_invariants(world)?;
    Ok(report)
}

fn apply_move(world: &mut World, player_id: &str, direction: Direction) {
    let Some(player) = world.players.get(player_id) else {
        return;
    };
    let (x, y) = (player.x, player.y);
    let destination = resolve_step(x, y, direction, |nx, ny| world.player_at(nx, ny).is_some());

    if let Some(player) = world.players.get_mut(player_id) {
        player.rotation = direction.heading();
        if let Some((nx, ny)) = destination {
            player.x = nx;
            player.y = ny;
        }
    }
}

/// Verify the end-of-tick invariants
pub fn check_invariants(world: &World) -> Result<(), SimulationError> {
    let mut cells: HashMap<(i32, i32), &str> = HashMap::new();
    for player in world.players.values() {
        if !cell_in_bounds(player.x, player.y) {
            return Err(SimulationError::PlayerOutOfBounds(player.id.clone()));
        }
        if !(0..=MAX_HEALTH).contains(&player.health) {
            return Err(SimulationError::HealthOutOfRange(player.id.clone()));
        }
        if let Some(other) = cells.insert((player.x, player.y), &player.id) {
            return Err(SimulationError::SharedCell(
                other.to_string(),
                player.id.clone(),
            ));
        }
    }

    if let Some(projectile) = world.entities.iter().find(|p| !point_in_bounds(p.x, p.y)) {
        return Err(SimulationError::ProjectileOutOfBounds(projectile.id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot;
    use crate::game::world::Player;

    fn rules() -> GameRules {
        GameRules::default()
    }

    fn running_world(players: &[(&str, i32, i32, i32)]) -> World {
        let mut world = World::new(2000);
        for (slot, (id, x, y, rotation)) in players.iter().enumerate() {
            let mut player =
                Player::new(id.to_string(), id.to_string(), "red".into(), slot, *x, *y);
            player.rotation = *rotation;
            world.players.insert(id.to_string(), player);
        }
        world.status = LobbyStatus::Running;
        world
    }

    fn act(id: &str, action: Action) -> Vec<(String, Action)> {
        vec![(id.to_string(), action)]
    }

    #[test]
    fn tick_increments_only_while_running() {
        let mut world = running_world(&[("p1", 5, 5, 0), ("p2", 10, 10, 0)]);
        step(&mut world, &rules(), Vec::new()).unwrap();
        assert_eq!(world.tick, 1);

        world.status = LobbyStatus::Pending;
        step(&mut world, &rules(), act("p1", Action::Shoot)).unwrap();
        assert_eq!(world.tick, 1);
        assert!(world.entities.is_empty());
    }

    #[test]
    fn straight_shot_hits_after_five_ticks() {
        let mut world = running_world(&[("p1", 5, 5, 90), ("p2", 10, 5, 270)]);

        step(&mut world, &rules(), act("p1", Action::Shoot)).unwrap();
        assert_eq!(world.entities.len(), 1);
        assert_eq!((world.entities[0].x, world.entities[0].y), (6.0, 5.0));
        assert_eq!(
            (world.entities[0].previous_x, world.entities[0].previous_y),
            (5.0, 5.0)
        );

        for expected_x in [7.0, 8.0, 9.0] {
            step(&mut world, &rules(), Vec::new()).unwrap();
            assert_eq!(world.entities[0].x, expected_x);
            assert_eq!(world.players["p2"].health, 100);
        }

        let report = step(&mut world, &rules(), Vec::new()).unwrap();
        assert_eq!(world.tick, 5);
        assert_eq!(report.hits.len(), 1);
        assert_eq!(world.players["p2"].health, 75);
        assert!(world.entities.is_empty());
        assert_eq!(world.players["p1"].health, 100);
    }

    #[test]
    fn move_into_occupied_cell_only_turns() {
        let mut world = running_world(&[("p1", 5, 5, 0), ("p2", 6, 5, 0)]);
        step(&mut world, &rules(), act("p1", Action::Move(Direction::Right))).unwrap();
        let p1 = &world.players["p1"];
        assert_eq!((p1.x, p1.y, p1.rotation), (5, 5, 90));
    }

    #[test]
    fn move_off_grid_only_turns() {
        let mut world = running_world(&[("p1", 29, 5, 0), ("p2", 0, 0, 0)]);
        step(&mut world, &rules(), act("p1", Action::Move(Direction::Right))).unwrap();
        let p1 = &world.players["p1"];
        assert_eq!((p1.x, p1.y, p1.rotation), (29, 5, 90));
    }

    #[test]
    fn turn_then_shoot_fires_south() {
        let mut world = running_world(&[("p1", 5, 5, 0), ("p2", 20, 20, 0)]);
        step(&mut world, &rules(), act("p1", Action::Turn { degrees: 180 })).unwrap();
        assert_eq!(world.players["p1"].rotation, 180);

        step(&mut world, &rules(), act("p1", Action::Shoot)).unwrap();
        assert_eq!(world.entities.len(), 1);
        let projectile = &world.entities[0];
        assert_eq!((projectile.x, projectile.y), (5.0, 4.0));
        assert_eq!(projectile.direction, 180);
    }

    #[test]
    fn opposing_shots_annihilate_without_damage() {
        let mut world = running_world(&[("p1", 5, 5, 90), ("p2", 10, 5, 270)]);
        let volley = vec![
            ("p1".to_string(), Action::Shoot),
            ("p2".to_string(), Action::Shoot),
        ];
        step(&mut world, &rules(), volley).unwrap();
        assert_eq!(world.entities.len(), 2);
        step(&mut world, &rules(), Vec::new()).unwrap();
        assert_eq!(world.entities.len(), 2);

        let report = step(&mut world, &rules(), Vec::new()).unwrap();
        assert_eq!(report.annihilated, vec![(1, 2)]);
        assert!(world.entities.is_empty());
        assert_eq!(world.players["p1"].health, 100);
        assert_eq!(world.players["p2"].health, 100);
    }

    #[test]
    fn moves_resolve_in_id_order() {
        // a moves first into (6,5); b then finds it occupied.
        let mut world = running_world(&[("a", 5, 5, 0), ("b", 7, 5, 0)]);
        let actions = vec![
            ("b".to_string(), Action::Move(Direction::Left)),
            ("a".to_string(), Action::Move(Direction::Right)),
        ];
        step(&mut world, &rules(), actions).unwrap();
        assert_eq!((world.players["a"].x, world.players["a"].y), (6, 5));
        assert_eq!((world.players["b"].x, world.players["b"].y), (7, 5));
    }

    #[test]
    fn turn_applies_before_shoot_in_same_tick_set() {
        let mut world = running_world(&[("a", 5, 5, 0), ("b", 20, 20, 0)]);
        // b turns, a shoots; a's projectile still goes north.
        let actions = vec![
            ("a".to_string(), Action::Shoot),
            ("b".to_string(), Action::Turn { degrees: 90 }),
        ];
        step(&mut world, &rules(), actions).unwrap();
        assert_eq!((world.entities[0].x, world.entities[0].y), (5.0, 6.0));
        assert_eq!(world.players["b"].rotation, 90);
    }

    #[test]
    fn eliminated_players_cannot_act() {
        let mut world = running_world(&[("a", 5, 5, 0), ("b", 10, 10, 0), ("c", 20, 20, 0)]);
        world.players.get_mut("a").unwrap().health = 0;
        step(&mut world, &rules(), act("a", Action::Move(Direction::Up))).unwrap();
        assert_eq!((world.players["a"].x, world.players["a"].y), (5, 5));
    }

    #[test]
    fn last_player_standing_finishes_game() {
        let mut world = running_world(&[("p1", 5, 5, 90), ("p2", 6, 5, 270)]);
        world.players.get_mut("p2").unwrap().health = 25;
        let report = step(&mut world, &rules(), act("p1", Action::Shoot)).unwrap();
        assert!(report.finished);
        assert_eq!(report.winner.as_deref(), Some("p1"));
        assert_eq!(world.status, LobbyStatus::Finished);
        assert_eq!(world.players["p2"].health, 0);

        // No further ticks once finished.
        step(&mut world, &rules(), Vec::new()).unwrap();
        assert_eq!(world.tick, 1);
    }

    #[test]
    fn same_actions_in_any_arrival_order_give_identical_snapshots() {
        let base = running_world(&[("a", 5, 5, 90), ("b", 6, 6, 0), ("c", 12, 5, 270)]);
        let actions = vec![
            ("a".to_string(), Action::Shoot),
            ("b".to_string(), Action::Move(Direction::Down)),
            ("c".to_string(), Action::Turn { degrees: 45 }),
        ];
        let mut reversed = actions.clone();
        reversed.reverse();

        let mut first = base.clone();
        let mut second = base;
        step(&mut first, &rules(), actions).unwrap();
        step(&mut second, &rules(), reversed).unwrap();

        assert_eq!(
            snapshot::encode(&first).unwrap(),
            snapshot::encode(&second).unwrap()
        );
    }

    #[test]
    fn invariant_check_flags_shared_cells() {
        let mut world = running_world(&[("a", 5, 5, 0), ("b", 6, 5, 0)]);
        world.players.get_mut("b").unwrap().x = 5;
        assert_eq!(
            check_invariants(&world),
            Err(SimulationError::SharedCell("a".into(), "b".into()))
        );
    }
}
