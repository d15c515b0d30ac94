//! Human-like pointer paths: a randomized cubic Bézier arc with eased
//! progress, per-step jitter, micro-pauses and an occasional overshoot.
//! The last step always lands exactly on the target.

use crate::matcher::Point;
use rand::seq::SliceRandom;
use rand::Rng;
use std::f64::consts::PI;
use std::time::Duration;

/// Moves shorter than this skip synthesis entirely.
const DIRECT_MOVE_PX: f64 = 5.0;
const MIN_STEPS: usize = 10;
/// Longest pointer move the planner synthesizes; longer durations are clamped.
pub const MAX_MOVE_SECS: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub jitter_chance: f64,
    pub curve_variance_min: f64,
    pub curve_variance_max: f64,
    pub speed_min: f64,
    pub speed_max: f64,
    pub micropause_chance: f64,
    pub micropause_min: Duration,
    pub micropause_max: Duration,
    pub overshoot_chance: f64,
    pub overshoot_min: f64,
    pub overshoot_max: f64,
    pub overshoot_settle_min: Duration,
    pub overshoot_settle_max: Duration,
    pub steps_per_second: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            jitter_min: 1.0,
            jitter_max: 4.0,
            jitter_chance: 0.4,
            curve_variance_min: 0.15,
            curve_variance_max: 0.35,
            speed_min: 0.85,
            speed_max: 1.20,
            micropause_chance: 0.08,
            micropause_min: Duration::from_millis(20),
            micropause_max: Duration::from_millis(80),
            overshoot_chance: 0.20,
            overshoot_min: 3.0,
            overshoot_max: 12.0,
            overshoot_settle_min: Duration::from_millis(30),
            overshoot_settle_max: Duration::from_millis(80),
            steps_per_second: 60.0,
        }
    }
}

/// One pointer placement followed by a pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep {
    pub point: Point,
    pub pause: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPlan {
    pub steps: Vec<PathStep>,
    pub overshoot: bool,
}

impl PathPlan {
    pub fn end(&self) -> Option<Point> {
        self.steps.last().map(|step| step.point)
    }
}

pub fn plan_path<R: Rng + ?Sized>(
    start: Point,
    end: Point,
    nominal: Duration,
    config: &MotionConfig,
    rng: &mut R,
) -> PathPlan {
    let distance = start.distance(end);
    if distance < DIRECT_MOVE_PX {
        return PathPlan {
            steps: vec![PathStep {
                point: end,
                pause: Duration::ZERO,
            }],
            overshoot: false,
        };
    }

    let duration = nominal.as_secs_f64().min(MAX_MOVE_SECS)
        * rng.gen_range(config.speed_min..=config.speed_max);
    let (p1, p2) = control_points(start, end, distance, config, rng);
    let p0 = (start.x as f64, start.y as f64);
    let p3 = (end.x as f64, end.y as f64);

    let max_steps = (MAX_MOVE_SECS * config.speed_max * config.steps_per_second) as usize;
    let num_steps =
        ((duration * config.steps_per_second) as usize).clamp(MIN_STEPS, max_steps.max(MIN_STEPS));
    let step_pause =
        Duration::try_from_secs_f64(duration / num_steps as f64).unwrap_or(Duration::ZERO);
    let mut steps = Vec::new();

    for i in 0..=num_steps {
        let t = ease_in_out(i as f64 / num_steps as f64);
        let (x, y) = jitter(bezier(t, p0, p1, p2, p3), config, rng);
        let pause = if rng.gen_bool(config.micropause_chance) {
            random_duration(config.micropause_min, config.micropause_max, rng)
        } else {
            step_pause
        };
        steps.push(PathStep {
            point: Point::new(x.round() as i32, y.round() as i32),
            pause,
        });
    }

    let overshoot = rng.gen_bool(config.overshoot_chance);
    if overshoot {
        let (dir_x, dir_y) = (
            (p3.0 - p0.0) / distance,
            (p3.1 - p0.1) / distance,
        );
        let reach = rng.gen_range(config.overshoot_min..=config.overshoot_max);
        steps.push(PathStep {
            point: Point::new(
                (p3.0 + dir_x * reach).round() as i32,
                (p3.1 + dir_y * reach).round() as i32,
            ),
            pause: random_duration(
                config.overshoot_settle_min,
                config.overshoot_settle_max,
                rng,
            ),
        });
    }
    steps.push(PathStep {
        point: end,
        pause: Duration::ZERO,
    });

    PathPlan { steps, overshoot }
}

/// `2t²` up to the midpoint, mirrored afterwards.
pub fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

pub fn bezier(t: f64, p0: (f64, f64), p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)) -> (f64, f64) {
    let u = 1.0 - t;
    let (uu, tt) = (u * u, t * t);
    let (uuu, ttt) = (uu * u, tt * t);
    (
        uuu * p0.0 + 3.0 * uu * t * p1.0 + 3.0 * u * tt * p2.0 + ttt * p3.0,
        uuu * p0.1 + 3.0 * uu * t * p1.1 + 3.0 * u * tt * p2.1 + ttt * p3.1,
    )
}

/// Control points at one and two thirds of the way, each pushed off the
/// straight line by its own random signed offset.
fn control_points<R: Rng + ?Sized>(
    start: Point,
    end: Point,
    distance: f64,
    config: &MotionConfig,
    rng: &mut R,
) -> ((f64, f64), (f64, f64)) {
    let dx = (end.x - start.x) as f64;
    let dy = (end.y - start.y) as f64;
    let (perp_x, perp_y) = (-dy / distance, dx / distance);
    let variance = rng.gen_range(config.curve_variance_min..=config.curve_variance_max);

    let mut offset = || {
        let sign = *[-1.0, 1.0].choose(rng).unwrap_or(&1.0);
        distance * variance * sign * rng.gen_range(0.3..=1.0)
    };
    let (o1, o2) = (offset(), offset());

    let (sx, sy) = (start.x as f64, start.y as f64);
    (
        (sx + dx * 0.33 + perp_x * o1, sy + dy * 0.33 + perp_y * o1),
        (sx + dx * 0.66 + perp_x * o2, sy + dy * 0.66 + perp_y * o2),
    )
}

fn jitter<R: Rng + ?Sized>(pos: (f64, f64), config: &MotionConfig, rng: &mut R) -> (f64, f64) {
    if !rng.gen_bool(config.jitter_chance) {
        return pos;
    }
    let amount = rng.gen_range(config.jitter_min..=config.jitter_max);
    let angle = rng.gen_range(0.0..2.0 * PI);
    (pos.0 + amount * angle.cos(), pos.1 + amount * angle.sin())
}

fn random_duration<R: Rng + ?Sized>(min: Duration, max: Duration, rng: &mut R) -> Duration {
    if max <= min {
        return min;
    }
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
}
