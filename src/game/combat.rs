//! Combat system - projectiles, hit detection, damage

use std::collections::BTreeSet;

use tracing::debug;

use super::physics::{heading_vector, point_in_bounds, Segment};
use super::world::{Player, World};

/// Active projectile in the game
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u64,
    /// Player that fired it; never damaged by it
    pub owner: String,
    pub previous_x: f64,
    pub previous_y: f64,
    pub x: f64,
    pub y: f64,
    pub direction: i32,
    pub travel_distance: f64,
}

impl Projectile {
    /// Spawn on the shooter's cell, facing the shooter's rotation
    pub fn fire(id: u64, shooter: &Player, travel_distance: f64) -> Self {
        let (x, y) = (shooter.x as f64, shooter.y as f64);
        Self {
            id,
            owner: shooter.id.clone(),
            previous_x: x,
            previous_y: y,
            x,
            y,
            direction: shooter.rotation,
            travel_distance,
        }
    }

    /// Move one tick along the heading
    pub fn advance(&mut self) {
        let (dx, dy) = heading_vector(self.direction);
        self.previous_x = self.x;
        self.previous_y = self.y;
        self.x += self.travel_distance * dx;
        self.y += self.travel_distance * dy;
    }

    /// Segment covered during the last advance
    pub fn swept(&self) -> Segment {
        Segment::new(self.previous_x, self.previous_y, self.x, self.y)
    }
}

/// Hit registered during collision resolution
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub projectile_id: u64,
    pub shooter_id: String,
    pub target_id: String,
    pub damage: i32,
    pub target_health: i32,
    pub target_eliminated: bool,
}

/// Everything collision resolution changed this tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombatReport {
    pub hits: Vec<HitResult>,
    pub out_of_bounds: Vec<u64>,
    /// Projectile pairs that annihilated each other, (lower id, higher id)
    pub annihilated: Vec<(u64, u64)>,
}

/// Advance every projectile by one tick
pub fn advance_projectiles(world: &mut World) {
    for projectile in world.entities.iter_mut() {
        projectile.advance();
    }
}

/// Nearest live non-owner player whose cell the segment passes through.
/// Ties on entry distance go to the lower player id.
fn first_player_hit<'a>(world: &'a World, projectile: &Projectile) -> Option<&'a Player> {
    let segment = projectile.swept();
    let mut best: Option<(f64, &Player)> = None;

    // Ascending id iteration; strict comparison keeps the lower id on ties.
    for player in world.players.values() {
        if !player.is_alive() || player.id == projectile.owner {
            continue;
        }
        if let Some(t) = segment.enters_cell(player.x, player.y) {
            match best {
                Some((best_t, _)) if t >= best_t => {}
                _ => best = Some((t, player)),
            }
        }
    }

    best.map(|(_, player)| player)
}

/// Resolve out-of-bounds, player hits and projectile-projectile collisions,
/// in that order. Retired projectiles are removed from the world.
pub fn resolve_collisions(world: &mut World, damage: i32) -> CombatReport {
    let mut report = CombatReport::default();

    world.entities.retain(|p| {
        let inside = point_in_bounds(p.x, p.y);
        if !inside {
            report.out_of_bounds.push(p.id);
        }
        inside
    });

    let mut order: Vec<usize> = (0..world.entities.len()).collect();
    order.sort_by_key(|&i| world.entities[i].id);

    let mut retired: BTreeSet<u64> = BTreeSet::new();

    for &idx in &order {
        let projectile = &world.entities[idx];
        let Some(target_id) = first_player_hit(world, projectile).map(|p| p.id.clone()) else {
            continue;
        };
        let projectile_id = projectile.id;
        let shooter_id = projectile.owner.clone();

        if let Some(target) = world.players.get_mut(&target_id) {
            let eliminated = target.take_damage(damage);
            debug!(
                projectile_id,
                shooter_id = %shooter_id,
                target_id = %target_id,
                target_health = target.health,
                "projectile hit"
            );
            report.hits.push(HitResult {
                projectile_id,
                shooter_id,
                target_id,
                damage,
                target_health: target.health,
                target_eliminated: eliminated,
            });
        }
        retired.insert(projectile_id);
    }

    // Pairs visited as (min id, max id) ascending; a projectile retired by an
    // earlier pair takes no further part.
    for (a_pos, &a_idx) in order.iter().enumerate() {
        for &b_idx in &order[a_pos + 1..] {
            let a = &world.entities[a_idx];
            let b = &world.entities[b_idx];
            if retired.contains(&a.id) {
                break;
            }
            if retired.contains(&b.id) {
                continue;
            }
            if a.swept().intersects(&b.swept()) {
                retired.insert(a.id);
                retired.insert(b.id);
                report.annihilated.push((a.id, b.id));
            }
        }
    }

    world.entities.retain(|p| !retired.contains(&p.id));
    report
}
