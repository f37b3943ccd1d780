//! 3-D Gauss-Markov mobility.
//!
//! Position integrates every 100 ms; speed, heading, and pitch are redrawn
//! every 500 ms with memory `alpha` toward their per-drone means:
//!
//! ```text
//! s' = a*s + (1-a)*s_mean + sqrt(1-a^2) * N(0,1)
//! ```
//!
//! On a boundary breach (with a 1 m buffer) the offending velocity
//! component flips sign and the corresponding mean angle reflects, the
//! ns-3 rebound scheme. Positions are clamped into the buffered map.
//! `static_case` freezes positions while leaving the velocity process
//! running, so link-lifetime predictions stay meaningful.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::NodeId;
use crate::engine::{MILLIS, SimTime};
use crate::entities::Drone;
use crate::simulator::Ctx;
use crate::util::Vector3;

pub const POSITION_UPDATE_INTERVAL: SimTime = 100 * MILLIS;
pub const DIRECTION_UPDATE_INTERVAL: SimTime = 500 * MILLIS;

/// Memory factor of the Gauss-Markov process.
const ALPHA: f64 = 0.85;
/// Keep-out buffer from every map face, meters.
const BOUNDARY_BUFFER: f64 = 1.0;
/// Seed offset of the per-drone mobility random stream.
const MOBILITY_RNG_OFFSET: u64 = 1;

/// Map extents as `(min, max)` per axis.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub x: (f64, f64),
    pub y: (f64, f64),
    pub z: (f64, f64),
}

pub async fn mobility_process(ctx: Ctx, id: NodeId) {
    let mut rng =
        StdRng::seed_from_u64(ctx.config.seed + id as u64 + MOBILITY_RNG_OFFSET);
    let bounds = Bounds {
        x: (0.0, ctx.config.map_length),
        y: (0.0, ctx.config.map_width),
        z: (0.0, ctx.config.map_height),
    };
    loop {
        {
            let drone = ctx.drone(id);
            step(&ctx, &drone, &mut rng, &bounds);
        }
        ctx.clock.sleep(POSITION_UPDATE_INTERVAL).await;

        let drone = ctx.drone(id);
        let dt = POSITION_UPDATE_INTERVAL as f64 / 1e9;
        let consumed = dt * Drone::power_consumption(&ctx.config, drone.speed());
        drone
            .residual_energy
            .set(drone.residual_energy.get() - consumed);
    }
}

/// One position tick, with a direction redraw when the instant falls on the
/// direction interval.
fn step(ctx: &Ctx, drone: &Drone, rng: &mut StdRng, bounds: &Bounds) {
    let cur_position = drone.coords.get();
    let cur_velocity = drone.velocity.get();
    let dt = POSITION_UPDATE_INTERVAL as f64 / 1e9;

    let next_position = if ctx.config.static_case {
        cur_position
    } else {
        Vector3::new(
            cur_position.x + cur_velocity.x * dt,
            cur_position.y + cur_velocity.y * dt,
            cur_position.z + cur_velocity.z * dt,
        )
    };

    let cur_speed = cur_velocity.norm();
    let (next_velocity, next_direction, next_pitch) =
        if ctx.clock.now() % DIRECTION_UPDATE_INTERVAL == 0 {
            let alpha2 = 1.0 - ALPHA;
            let alpha3 = (1.0 - ALPHA * ALPHA).sqrt();
            let normal = Normal::new(0.0, 1.0).expect("unit normal");

            let next_speed = if cur_speed == 0.0 {
                0.0
            } else {
                ALPHA * cur_speed
                    + alpha2 * drone.velocity_mean.get()
                    + alpha3 * normal.sample(rng)
            };
            let next_direction = ALPHA * drone.direction.get()
                + alpha2 * drone.direction_mean.get()
                + alpha3 * normal.sample(rng);
            let next_pitch = ALPHA * drone.pitch.get()
                + alpha2 * drone.pitch_mean.get()
                + alpha3 * normal.sample(rng);

            let velocity = Vector3::new(
                next_speed * next_direction.cos() * next_pitch.cos(),
                next_speed * next_direction.sin() * next_pitch.cos(),
                next_speed * next_pitch.sin(),
            );
            (velocity, next_direction, next_pitch)
        } else {
            (cur_velocity, drone.direction.get(), drone.pitch.get())
        };

    let mut direction_mean = drone.direction_mean.get();
    let mut pitch_mean = drone.pitch_mean.get();
    let (position, velocity) = boundary_test(
        next_position,
        next_velocity,
        &mut direction_mean,
        &mut pitch_mean,
        bounds,
    );

    drone.coords.set(position);
    drone.velocity.set(velocity);
    drone.direction.set(next_direction);
    drone.pitch.set(next_pitch);
    drone.direction_mean.set(direction_mean);
    drone.pitch_mean.set(pitch_mean);
}

/// Wall rebound (ns-3 scheme): flip the breached velocity component,
/// reflect the corresponding mean angle, clamp into the buffered map.
pub fn boundary_test(
    mut position: Vector3,
    mut velocity: Vector3,
    direction_mean: &mut f64,
    pitch_mean: &mut f64,
    bounds: &Bounds,
) -> (Vector3, Vector3) {
    let b = BOUNDARY_BUFFER;

    if position.x < bounds.x.0 + b || position.x > bounds.x.1 - b {
        velocity.x = -velocity.x;
        *direction_mean = PI - *direction_mean;
    }
    if position.y < bounds.y.0 + b || position.y > bounds.y.1 - b {
        velocity.y = -velocity.y;
        *direction_mean = -*direction_mean;
    }
    if position.z < bounds.z.0 + b || position.z > bounds.z.1 - b {
        velocity.z = -velocity.z;
        *pitch_mean = -*pitch_mean;
    }

    position.x = position.x.clamp(bounds.x.0 + b, bounds.x.1 - b);
    position.y = position.y.clamp(bounds.y.0 + b, bounds.y.1 - b);
    position.z = position.z.clamp(bounds.z.0 + b, bounds.z.1 - b);

    (position, velocity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds {
            x: (0.0, 100.0),
            y: (0.0, 100.0),
            z: (0.0, 100.0),
        }
    }

    #[test]
    fn breach_flips_velocity_and_reflects_means() {
        let mut direction_mean = 0.3;
        let mut pitch_mean = 0.2;
        let (position, velocity) = boundary_test(
            Vector3::new(105.0, 50.0, 50.0),
            Vector3::new(5.0, 1.0, 0.0),
            &mut direction_mean,
            &mut pitch_mean,
            &bounds(),
        );
        assert_eq!(position.x, 99.0);
        assert_eq!(velocity.x, -5.0);
        assert_eq!(velocity.y, 1.0);
        assert!((direction_mean - (PI - 0.3)).abs() < 1e-12);
        assert_eq!(pitch_mean, 0.2);
    }

    #[test]
    fn z_breach_reflects_pitch_mean() {
        let mut direction_mean = 0.0;
        let mut pitch_mean = 0.4;
        let (position, velocity) = boundary_test(
            Vector3::new(50.0, 50.0, -3.0),
            Vector3::new(0.0, 0.0, -2.0),
            &mut direction_mean,
            &mut pitch_mean,
            &bounds(),
        );
        assert_eq!(position.z, 1.0);
        assert_eq!(velocity.z, 2.0);
        assert_eq!(pitch_mean, -0.4);
    }

    #[test]
    fn interior_positions_pass_through() {
        let mut direction_mean = 1.0;
        let mut pitch_mean = 0.1;
        let (position, velocity) = boundary_test(
            Vector3::new(50.0, 60.0, 70.0),
            Vector3::new(1.0, 2.0, 3.0),
            &mut direction_mean,
            &mut pitch_mean,
            &bounds(),
        );
        assert_eq!(position, Vector3::new(50.0, 60.0, 70.0));
        assert_eq!(velocity, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(direction_mean, 1.0);
        assert_eq!(pitch_mean, 0.1);
    }
}
