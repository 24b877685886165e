//! Grid geometry and player movement

use super::GRID_SIZE;

/// Absolute compass step requested by a directional action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Heading a player faces after stepping in this direction
    pub fn heading(self) -> i32 {
        match self {
            Direction::Up => 0,
            Direction::Right => 90,
            Direction::Down => 180,
            Direction::Left => 270,
        }
    }

    /// One-cell displacement (dx, dy); Y grows north
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, 1),
            Direction::Down => (0, -1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// Normalize any integer degree value onto [0, 360)
pub fn normalize_heading(degrees: i64) -> i32 {
    degrees.rem_euclid(360) as i32
}

/// Unit direction vector for a heading (0 = north, clockwise)
///
/// Cardinal headings resolve to exact vectors so projectiles on those
/// headings stay on integer coordinates.
pub fn heading_vector(heading: i32) -> (f64, f64) {
    match heading.rem_euclid(360) {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        other => {
            let radians = (other as f64).to_radians();
            (radians.sin(), radians.cos())
        }
    }
}

/// Whether an integer cell lies on the grid
pub fn cell_in_bounds(x: i32, y: i32) -> bool {
    (0..GRID_SIZE).contains(&x) && (0..GRID_SIZE).contains(&y)
}

/// Whether a continuous position lies inside [0, G)²
pub fn point_in_bounds(x: f64, y: f64) -> bool {
    let g = GRID_SIZE as f64;
    (0.0..g).contains(&x) && (0.0..g).contains(&y)
}

/// Resolve a one-cell step. Returns the destination when it is on the grid
/// and not occupied; `None` means the player stays put.
pub fn resolve_step(
    x: i32,
    y: i32,
    direction: Direction,
    occupied: impl Fn(i32, i32) -> bool,
) -> Option<(i32, i32)> {
    let (dx, dy) = direction.offset();
    let (nx, ny) = (x + dx, y + dy);
    if !cell_in_bounds(nx, ny) || occupied(nx, ny) {
        return None;
    }
    Some((nx, ny))
}

/// A straight segment swept by an entity over one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

const EPSILON: f64 = 1e-9;

impl Segment {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Entry parameter t in [0, 1] at which the segment first touches the
    /// closed unit square centred on cell (cx, cy), if it does at all.
    pub fn enters_cell(&self, cx: i32, cy: i32) -> Option<f64> {
        let (min_x, max_x) = (cx as f64 - 0.5, cx as f64 + 0.5);
        let (min_y, max_y) = (cy as f64 - 0.5, cy as f64 + 0.5);
        let dx = self.x1 - self.x0;
        let dy = self.y1 - self.y0;

        let mut t_enter: f64 = 0.0;
        let mut t_exit: f64 = 1.0;

        for (origin, delta, lo, hi) in [(self.x0, dx, min_x, max_x), (self.y0, dy, min_y, max_y)] {
            if delta.abs() < EPSILON {
                if origin < lo - EPSILON || origin > hi + EPSILON {
                    return None;
                }
                continue;
            }
            let mut t0 = (lo - origin) / delta;
            let mut t1 = (hi - origin) / delta;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit + EPSILON {
                return None;
            }
        }

        Some(t_enter)
    }

    /// Whether two segments share at least one point (collinear overlap counts)
    pub fn intersects(&self, other: &Segment) -> bool {
        let p = (self.x0, self.y0);
        let p2 = (self.x1, self.y1);
        let q = (other.x0, other.y0);
        let q2 = (other.x1, other.y1);

        let d1 = orientation(q, q2, p);
        let d2 = orientation(q, q2, p2);
        let d3 = orientation(p, p2, q);
        let d4 = orientation(p, p2, q2);

        if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
            && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
        {
            return true;
        }

        (d1.abs() <= EPSILON && on_segment(q, q2, p))
            || (d2.abs() <= EPSILON && on_segment(q, q2, p2))
            || (d3.abs() <= EPSILON && on_segment(p, p2, q))
            || (d4.abs() <= EPSILON && on_segment(p, p2, q2))
    }
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

// Assumes c is collinear with a-b.
fn on_segment(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    c.0 >= a.0.min(b.0) - EPSILON
        && c.0 <= a.0.max(b.0) + EPSILON
        && c.1 >= a.1.min(b.1) - EPSILON
        && c.1 <= a.1.max(b.1) + EPSILON
}
