//! Flat simulation configuration.
//!
//! Loaded from a TOML file (every field optional, falling back to the
//! defaults below), with CLI overrides applied by the binary. An optional
//! JSON scene file supplies explicit node placements for reproducible
//! topologies.
//!
//! Durations are configured in microseconds and converted to the engine's
//! nanosecond [`SimTime`] unit through the accessor methods; distances are
//! meters, packet lengths are bits.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::{MICROS, SimTime};
use crate::util::Vector3;

/// MAC protocol installed on every drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacProtocolKind {
    CsmaCa,
    PureAloha,
}

/// Routing protocol installed on every drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingProtocolKind {
    Dsdv,
    Greedy,
    Opar,
    PrudentCaster,
}

/// Application traffic shape for the unicast protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficPattern {
    Off,
    Poisson,
    Uniform,
}

/// Start placement of the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Uniform random positions within the map.
    Random,
    /// Every drone placed within communication range of an earlier one.
    Connected,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub seed: u64,
    pub number_of_drones: usize,
    /// Map extent along x, meters.
    pub map_length: f64,
    /// Map extent along y, meters.
    pub map_width: f64,
    /// Map extent along z, meters.
    pub map_height: f64,
    /// Total simulated time, microseconds.
    pub sim_time: u64,
    /// Channel bit rate, bits per second.
    pub bit_rate: u64,
    /// MAC slot, microseconds.
    pub slot_duration: u64,
    /// Distributed inter-frame space, microseconds.
    pub difs_duration: u64,
    /// Short inter-frame space, microseconds.
    pub sifs_duration: u64,
    /// ACK wait budget, microseconds.
    pub ack_timeout: u64,
    /// ACK frame length, bits.
    pub ack_packet_length: u64,
    /// Hello frame length, bits.
    pub hello_packet_length: u64,
    /// Data frame length, bits.
    pub data_packet_length: u64,
    /// Minimum contention window, slots.
    pub cw_min: u32,
    pub max_retransmission_attempt: u32,
    /// Carrier-sense radius, meters.
    pub sensing_range: f64,
    /// PrudentCaster broadcast radius, meters.
    pub broadcast_range: f64,
    /// Backbone hop count for connected placements.
    pub max_hop: u32,
    /// PrudentCaster TDMA slot, microseconds.
    pub broadcast_slot: u64,
    /// 0 = flood, 1 = random gossip, 2 = MLST prune.
    pub data_broadcast_type: u8,
    /// Freeze all positions.
    pub static_case: bool,
    /// Directory for the per-drone packet logs.
    pub log_path: PathBuf,
    /// Directory for `simulation_result.txt`.
    pub output_path: PathBuf,
    pub mac_protocol: MacProtocolKind,
    pub routing_protocol: RoutingProtocolKind,
    pub traffic_pattern: TrafficPattern,
    /// Poisson packet rate, packets per second per drone.
    pub traffic_rate: f64,
    /// Data packet deadline after creation, microseconds.
    pub packet_lifetime: u64,
    /// Transmit queue capacity enforced at relay reception.
    pub max_queue_size: usize,
    /// Initial drone speed, m/s.
    pub drone_speed: f64,
    pub placement: Placement,
    /// Explicit start positions (scene override); length must match
    /// `number_of_drones` when present.
    pub initial_positions: Option<Vec<[f64; 3]>>,

    // Link budget (log-distance path loss)
    pub transmit_power_dbm: f64,
    pub path_loss_exponent: f64,
    /// Path loss at the 1 m reference distance, dB.
    pub path_loss_at_reference: f64,
    pub noise_floor_dbm: f64,
    pub snr_threshold_db: f64,

    // Energy accounting
    /// Battery budget, joules.
    pub initial_energy: f64,
    /// Radio draw while on air, watts.
    pub transmit_power_w: f64,
    /// Hover draw, watts.
    pub hover_power: f64,
    /// Motion draw coefficient, watts per (m/s)^2.
    pub move_power_coeff: f64,
    /// Residual energy below which a drone goes to sleep, joules.
    pub energy_threshold: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 2024,
            number_of_drones: 10,
            map_length: 600.0,
            map_width: 600.0,
            map_height: 600.0,
            sim_time: 5_000_000,
            bit_rate: 1_000_000,
            slot_duration: 50,
            difs_duration: 128,
            sifs_duration: 28,
            ack_timeout: 2_000,
            ack_packet_length: 128,
            hello_packet_length: 1_024,
            data_packet_length: 8_192,
            cw_min: 31,
            max_retransmission_attempt: 5,
            sensing_range: 300.0,
            broadcast_range: 250.0,
            max_hop: 4,
            broadcast_slot: 50_000,
            data_broadcast_type: 2,
            static_case: false,
            log_path: PathBuf::from("packet_logs"),
            output_path: PathBuf::from("results"),
            mac_protocol: MacProtocolKind::CsmaCa,
            routing_protocol: RoutingProtocolKind::Greedy,
            traffic_pattern: TrafficPattern::Poisson,
            traffic_rate: 2.0,
            packet_lifetime: 10_000_000,
            max_queue_size: 200,
            drone_speed: 12.5,
            placement: Placement::Connected,
            initial_positions: None,
            transmit_power_dbm: 20.0,
            path_loss_exponent: 2.5,
            path_loss_at_reference: 40.0,
            noise_floor_dbm: -90.0,
            snr_threshold_db: 10.0,
            initial_energy: 20_000.0,
            transmit_power_w: 0.1,
            hover_power: 70.0,
            move_power_coeff: 0.3,
            energy_threshold: 2_000.0,
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| format!("failed to parse config file {}: {}", path.display(), e))
    }

    /// Reject configurations that would corrupt or stall a run.
    pub fn validate(&self) -> Result<(), String> {
        if self.number_of_drones == 0 {
            return Err("number_of_drones must be at least 1".to_string());
        }
        if self.sim_time == 0 {
            return Err("sim_time must be positive".to_string());
        }
        if self.bit_rate == 0 {
            return Err("bit_rate must be positive".to_string());
        }
        for (name, value) in [
            ("slot_duration", self.slot_duration),
            ("difs_duration", self.difs_duration),
            ("sifs_duration", self.sifs_duration),
            ("ack_timeout", self.ack_timeout),
            ("broadcast_slot", self.broadcast_slot),
            ("packet_lifetime", self.packet_lifetime),
        ] {
            if value == 0 {
                return Err(format!("{} must be positive", name));
            }
        }
        for (name, value) in [
            ("ack_packet_length", self.ack_packet_length),
            ("hello_packet_length", self.hello_packet_length),
            ("data_packet_length", self.data_packet_length),
        ] {
            if value == 0 {
                return Err(format!("{} must be positive", name));
            }
        }
        if self.cw_min == 0 {
            return Err("cw_min must be at least 1 slot".to_string());
        }
        if self.max_retransmission_attempt == 0 {
            return Err("max_retransmission_attempt must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be at least 1".to_string());
        }
        for (name, value) in [
            ("map_length", self.map_length),
            ("map_width", self.map_width),
            ("map_height", self.map_height),
        ] {
            if !(value > 2.0) {
                return Err(format!("{} must exceed the 1 m boundary buffer", name));
            }
        }
        if !(self.sensing_range > 0.0) || !(self.broadcast_range > 0.0) {
            return Err("sensing_range and broadcast_range must be positive".to_string());
        }
        if self.data_broadcast_type > 2 {
            return Err(format!(
                "data_broadcast_type {} out of range (0 flood, 1 gossip, 2 MLST prune)",
                self.data_broadcast_type
            ));
        }
        if self.traffic_pattern == TrafficPattern::Poisson && !(self.traffic_rate > 0.0) {
            return Err("traffic_rate must be positive for poisson traffic".to_string());
        }
        if !(self.path_loss_exponent > 0.0) {
            return Err("path_loss_exponent must be positive".to_string());
        }
        if self.drone_speed < 0.0 {
            return Err("drone_speed must be non-negative".to_string());
        }
        if let Some(positions) = &self.initial_positions {
            if positions.len() != self.number_of_drones {
                return Err(format!(
                    "initial_positions has {} entries for {} drones",
                    positions.len(),
                    self.number_of_drones
                ));
            }
        }
        Ok(())
    }

    /// On-air time of a frame of `bits` at the configured bit rate.
    pub fn airtime(&self, bits: u64) -> SimTime {
        bits * 1_000_000_000 / self.bit_rate
    }

    pub fn sim_time_ns(&self) -> SimTime {
        self.sim_time * MICROS
    }

    pub fn slot_ns(&self) -> SimTime {
        self.slot_duration * MICROS
    }

    pub fn difs_ns(&self) -> SimTime {
        self.difs_duration * MICROS
    }

    pub fn sifs_ns(&self) -> SimTime {
        self.sifs_duration * MICROS
    }

    pub fn ack_timeout_ns(&self) -> SimTime {
        self.ack_timeout * MICROS
    }

    pub fn packet_lifetime_ns(&self) -> SimTime {
        self.packet_lifetime * MICROS
    }

    pub fn broadcast_slot_ns(&self) -> SimTime {
        self.broadcast_slot * MICROS
    }

    /// PrudentCaster TDMA frame: one slot per drone.
    pub fn broadcast_frame_ns(&self) -> SimTime {
        self.broadcast_slot_ns() * self.number_of_drones as u64
    }
}

/// Node placement scene, the JSON companion of the TOML configuration.
#[derive(Debug, Deserialize)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
}

#[derive(Debug, Deserialize)]
pub struct SceneNode {
    pub position: Vector3,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read scene file {}: {}", path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse scene file {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_fleet_is_rejected() {
        let config = SimulationConfig {
            number_of_drones: 0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = SimulationConfig {
            slot_duration: 0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("slot_duration"));
    }

    #[test]
    fn mismatched_scene_is_rejected() {
        let config = SimulationConfig {
            number_of_drones: 3,
            initial_positions: Some(vec![[0.0, 0.0, 0.0]]),
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn airtime_matches_bit_rate() {
        let config = SimulationConfig::default();
        // 8192 bits at 1 Mbit/s is 8192 us
        assert_eq!(config.airtime(8_192), 8_192 * MICROS);
    }
}
