//! Drone mobility: the Gauss-Markov model and start placement generators.

pub mod gauss_markov;
pub mod start_coords;
