//! Large-scale fading: the link budget behind the communication range.
//!
//! Log-distance path loss anchored at a 1 m reference:
//!
//! ```text
//! PL(d) = PL(d0) + 10 * n * log10(d / d0)
//! ```
//!
//! A frame is decodable while the received power stays above
//! `noise_floor + snr_threshold`. Solving the budget for distance gives the
//! maximum communication range used by reception filtering, OPAR's link
//! model, and connectivity reasoning. Shadowing is intentionally not
//! sampled: the range must be one deterministic number per run.

use crate::config::SimulationConfig;

/// Path loss in dB at `distance` meters. Distances under the reference
/// anchor return the reference loss.
pub fn path_loss_db(distance: f64, config: &SimulationConfig) -> f64 {
    if distance < 1.0 {
        return config.path_loss_at_reference;
    }
    config.path_loss_at_reference + 10.0 * config.path_loss_exponent * distance.log10()
}

/// Maximum distance at which the received power still clears the SNR
/// threshold over the noise floor.
pub fn maximum_communication_range(config: &SimulationConfig) -> f64 {
    let receiving_limit = config.noise_floor_dbm + config.snr_threshold_db;
    let budget = config.transmit_power_dbm - receiving_limit - config.path_loss_at_reference;
    if budget <= 0.0 {
        return 1.0;
    }
    10f64.powf(budget / (10.0 * config.path_loss_exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_where_the_budget_runs_out() {
        let config = SimulationConfig::default();
        let range = maximum_communication_range(&config);
        let at_range = config.transmit_power_dbm - path_loss_db(range, &config);
        let limit = config.noise_floor_dbm + config.snr_threshold_db;
        assert!((at_range - limit).abs() < 1e-9);
    }

    #[test]
    fn steeper_exponent_shrinks_the_range() {
        let near = SimulationConfig {
            path_loss_exponent: 3.5,
            ..SimulationConfig::default()
        };
        let far = SimulationConfig {
            path_loss_exponent: 2.0,
            ..SimulationConfig::default()
        };
        assert!(maximum_communication_range(&near) < maximum_communication_range(&far));
    }
}
