//! Start placement generators.
//!
//! Two seeded layouts: uniform random positions inside the map, and a
//! connected layout that grows the fleet outward from the cube center so
//! every drone starts within communication range of an earlier one.

use std::f64::consts::{PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::util::Vector3;

/// Minimum spacing between drones in the connected layout, meters.
const MIN_DISTANCE: f64 = 10.0;
/// Placement attempts per drone before falling back near the center.
const MAX_ATTEMPTS: usize = 100;

/// Uniform random positions, one seeded stream per drone.
pub fn random_start_points(config: &SimulationConfig) -> Vec<Vector3> {
    (0..config.number_of_drones)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(config.seed + i as u64);
            Vector3::new(
                rng.gen_range(1.0..config.map_length - 1.0),
                rng.gen_range(1.0..config.map_width - 1.0),
                rng.gen_range(1.0..config.map_height - 1.0),
            )
        })
        .collect()
}

/// Connected layout: the first drone sits at the cube center, every later
/// drone is placed within communication range of a random earlier one and
/// at least [`MIN_DISTANCE`] away from all others.
pub fn connected_start_points(config: &SimulationConfig) -> Vec<Vector3> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let cube = config.map_width;
    let center = cube / 2.0;
    let reach = config.broadcast_range.max(MIN_DISTANCE + 1.0);

    let mut positions = Vec::with_capacity(config.number_of_drones);
    positions.push(Vector3::new(center, center, center));

    for _ in 1..config.number_of_drones {
        let reference = positions[rng.gen_range(0..positions.len())];
        let mut placed = None;

        for _ in 0..MAX_ATTEMPTS {
            let theta = rng.gen_range(0.0..TAU);
            let phi = rng.gen_range(0.0..PI);
            let dist = rng.gen_range(MIN_DISTANCE..reach);

            let candidate = Vector3::new(
                (reference.x + dist * phi.sin() * theta.cos()).clamp(0.0, cube),
                (reference.y + dist * phi.sin() * theta.sin()).clamp(0.0, cube),
                (reference.z + dist * phi.cos()).clamp(0.0, cube),
            );

            let too_close = positions
                .iter()
                .any(|p| p.distance_to(&candidate) < MIN_DISTANCE);
            if !too_close {
                placed = Some(candidate);
                break;
            }
        }

        positions.push(placed.unwrap_or_else(|| {
            Vector3::new(
                center + rng.gen_range(-50.0..50.0),
                center + rng.gen_range(-50.0..50.0),
                center + rng.gen_range(-50.0..50.0),
            )
        }));
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_points_stay_inside_the_map() {
        let config = SimulationConfig::default();
        let points = random_start_points(&config);
        assert_eq!(points.len(), config.number_of_drones);
        for p in points {
            assert!(p.x >= 1.0 && p.x <= config.map_length - 1.0);
            assert!(p.y >= 1.0 && p.y <= config.map_width - 1.0);
            assert!(p.z >= 1.0 && p.z <= config.map_height - 1.0);
        }
    }

    #[test]
    fn placement_is_seed_deterministic() {
        let config = SimulationConfig::default();
        assert_eq!(random_start_points(&config), random_start_points(&config));
        assert_eq!(
            connected_start_points(&config),
            connected_start_points(&config)
        );
    }

    #[test]
    fn connected_layout_links_every_drone_to_an_earlier_one() {
        let config = SimulationConfig::default();
        let points = connected_start_points(&config);
        for (i, p) in points.iter().enumerate().skip(1) {
            let connected = points[..i]
                .iter()
                .any(|q| q.distance_to(p) <= config.broadcast_range + 1e-9);
            assert!(connected, "drone {} starts isolated", i);
        }
    }
}
