//! Mouse movement paths
//!
//! Generates cursor trajectories along cubic Bézier curves with variable
//! speed: slower near the endpoints, faster through the middle, with jitter
//! on every step delay. Straight-line constant-speed cursor movement is one
//! of the oldest automation tells.

use rand::Rng;

/// A 2D point in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A cursor path: points plus the per-step delay in milliseconds.
#[derive(Debug, Clone)]
pub struct MousePath {
    pub points: Vec<Point>,
    pub delays_ms: Vec<u64>,
}

/// Generate a wander between two random points inside a viewport.
pub fn random_wander(width: f64, height: f64) -> MousePath {
    let mut rng = rand::thread_rng();
    let start = Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
    let end = Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
    generate_path(start, end)
}

/// Generate a human-like path from `start` to `end`.
///
/// Step count scales with distance (30-100 steps). Control points sit at a
/// random perpendicular offset so every path bends differently.
pub fn generate_path(start: Point, end: Point) -> MousePath {
    let mut rng = rand::thread_rng();

    let distance = start.distance_to(&end);
    let steps = ((distance / 10.0).round() as usize).clamp(30, 100);

    let control1 = control_point(&mut rng, &start, &end, 0.33);
    let control2 = control_point(&mut rng, &start, &end, 0.67);

    let mut points = Vec::with_capacity(steps + 1);
    let mut delays_ms = Vec::with_capacity(steps + 1);

    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        points.push(cubic_bezier(t, &start, &control1, &control2, &end));

        // Slower at the ends, faster through the middle.
        let speed = ease_in_out_cubic(t);
        let base = 10.0 * (2.0 - speed);
        let jitter = rng.gen_range(0.7..=1.3);
        delays_ms.push(((base * jitter).round() as u64).max(5));
    }

    MousePath { points, delays_ms }
}

fn control_point<R: Rng>(rng: &mut R, start: &Point, end: &Point, position: f64) -> Point {
    let base_x = start.x + (end.x - start.x) * position;
    let base_y = start.y + (end.y - start.y) * position;

    let distance = start.distance_to(end);
    let max_offset = (distance * 0.2).min(100.0);
    if max_offset <= 0.0 {
        return Point::new(base_x, base_y);
    }
    let offset = rng.gen_range(-max_offset..=max_offset);

    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length = (dx * dx + dy * dy).sqrt();
    if length == 0.0 {
        return Point::new(base_x, base_y);
    }

    // Perpendicular unit vector scaled by the offset.
    Point::new(base_x - dy / length * offset, base_y + dx / length * offset)
}

fn cubic_bezier(t: f64, p0: &Point, p1: &Point, p2: &Point, p3: &Point) -> Point {
    let t2 = t * t;
    let t3 = t2 * t;
    let mt = 1.0 - t;
    let mt2 = mt * mt;
    let mt3 = mt2 * mt;

    Point::new(
        mt3 * p0.x + 3.0 * mt2 * t * p1.x + 3.0 * mt * t2 * p2.x + t3 * p3.x,
        mt3 * p0.y + 3.0 * mt2 * t * p1.y + 3.0 * mt * t2 * p2.y + t3 * p3.y,
    )
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        let f = 2.0 * t - 2.0;
        1.0 + f * f * f / 2.0
    }
}
