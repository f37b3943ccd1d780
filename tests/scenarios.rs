//! Seed-deterministic end-to-end scenarios.
//!
//! Every test pins the fleet to explicit static positions, disables
//! background traffic, and injects packets at fixed virtual instants, so a
//! run is exactly repeatable.

use std::path::PathBuf;

use uavnet_simulator::config::{RoutingProtocolKind, SimulationConfig, TrafficPattern};
use uavnet_simulator::engine::MICROS;
use uavnet_simulator::routing::RoutingProtocol;
use uavnet_simulator::simulator::Simulator;

fn scenario_config(
    positions: Vec<[f64; 3]>,
    routing: RoutingProtocolKind,
) -> SimulationConfig {
    SimulationConfig {
        seed: 7,
        number_of_drones: positions.len(),
        initial_positions: Some(positions),
        routing_protocol: routing,
        traffic_pattern: TrafficPattern::Off,
        static_case: true,
        drone_speed: 0.0,
        map_length: 1_000.0,
        map_width: 1_000.0,
        map_height: 1_000.0,
        ..SimulationConfig::default()
    }
}

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("uavnet-sim-{}-{}", tag, std::process::id()))
}

/// Two static drones 50 m apart exchange one 8192-bit packet: delivered in
/// one hop, end-to-end latency dominated by the 8192 us airtime, and every
/// MAC process concluded.
#[test]
fn two_node_ping() {
    let mut config = scenario_config(
        vec![[100.0, 100.0, 100.0], [150.0, 100.0, 100.0]],
        RoutingProtocolKind::Greedy,
    );
    config.sim_time = 2_700_000;
    config.output_path = temp_dir("two-node-ping");

    let mut sim = Simulator::new(config).unwrap();
    // inject after the first hello round has filled the neighbor tables
    sim.inject_data_packet(0, 1, 1_200_000 * MICROS);
    sim.run();

    let metrics = sim.ctx.metrics.borrow();
    assert_eq!(metrics.datapacket_generated_num, 1);
    assert!(metrics.datapacket_arrived.contains(&1));
    assert_eq!(metrics.hop_cnt[&(1, 1)], 1);

    let latency = metrics.deliver_time[&(1, 1)];
    let airtime = 8_192 * MICROS;
    assert!(latency >= airtime, "latency {} below the airtime", latency);
    assert!(
        latency <= 20_000 * MICROS,
        "latency {} implausibly high for an idle channel",
        latency
    );

    assert_eq!(metrics.summary(false).pdr, 100.0);
    // the ACK reception recorded the MAC service delay
    assert!(!metrics.mac_delay_ms.is_empty());
    drop(metrics);

    assert!(sim.ctx.registry.all_finished());

    let summary = sim.write_results().unwrap();
    assert_eq!(summary.pdr, 100.0);
    let written =
        std::fs::read_to_string(sim.ctx.config.output_path.join("simulation_result.txt")).unwrap();
    assert!(written.contains("Packet delivery ratio"));
}

/// Hidden terminal: A and C cannot sense each other but both reach B.
/// Their overlapping transmissions collide at B at least once, yet both
/// packets are delivered within the retransmission budget.
#[test]
fn hidden_terminal_collision() {
    let mut config = scenario_config(
        vec![
            [100.0, 100.0, 100.0],
            [300.0, 100.0, 100.0],
            [500.0, 100.0, 100.0],
        ],
        RoutingProtocolKind::Greedy,
    );
    config.sensing_range = 250.0;
    config.data_packet_length = 512;
    config.max_retransmission_attempt = 7;
    config.sim_time = 3_700_000;

    let mut sim = Simulator::new(config).unwrap();
    sim.inject_data_packet(0, 1, 1_500_000 * MICROS);
    sim.inject_data_packet(2, 1, 1_500_000 * MICROS);
    sim.run();

    let metrics = sim.ctx.metrics.borrow();
    assert!(metrics.collision_num >= 1, "no collision at the hidden pair");
    assert!(
        metrics.datapacket_arrived.contains(&1),
        "packet from UAV 0 never delivered"
    );
    assert!(
        metrics.datapacket_arrived.contains(&2),
        "packet from UAV 2 never delivered"
    );
    drop(metrics);
    assert!(sim.ctx.registry.all_finished());
}

/// Greedy void: the destination is out of range and no neighbor improves
/// on the own distance. The packet parks on the waiting list and expires
/// there; no route loop, no delivery.
#[test]
fn greedy_void_expires_on_the_waiting_list() {
    let mut config = scenario_config(
        vec![[100.0, 100.0, 100.0], [450.0, 100.0, 100.0]],
        RoutingProtocolKind::Greedy,
    );
    config.packet_lifetime = 600_000;
    config.sim_time = 2_500_000;

    let mut sim = Simulator::new(config).unwrap();
    sim.inject_data_packet(0, 1, 500_000 * MICROS);
    sim.run();

    let metrics = sim.ctx.metrics.borrow();
    assert_eq!(metrics.datapacket_generated_num, 1);
    assert!(metrics.datapacket_arrived.is_empty());
    assert_eq!(metrics.summary(false).pdr, 0.0);
    drop(metrics);

    // the sweep dropped the expired packet for good
    assert!(sim.ctx.drone(0).waiting_list.borrow().is_empty());
    assert!(sim.ctx.drone(0).queue_len() == 0);
}

/// DSDV purge and triggered update: once the silent drone's entries
/// expire, the remaining tables drop it while keeping each other, and own
/// sequence numbers stay even.
#[test]
fn dsdv_triggered_update_after_silence() {
    let mut config = scenario_config(
        vec![
            [100.0, 100.0, 100.0],
            [300.0, 100.0, 100.0],
            [500.0, 100.0, 100.0],
        ],
        RoutingProtocolKind::Dsdv,
    );
    config.sim_time = 9_700_000;

    let mut sim = Simulator::new(config).unwrap();
    sim.schedule_sleep(2, 2_500_000 * MICROS);
    sim.run();

    let drone_a = sim.ctx.drone(0);
    let router_a = drone_a.router.borrow();
    let RoutingProtocol::Dsdv(dsdv_a) = &*router_a else {
        panic!("expected dsdv");
    };
    // the chain converged before the silence: A still routes to B directly
    assert_eq!(dsdv_a.table.lookup(1), Some(1));
    // the silent drone was purged everywhere
    assert_eq!(dsdv_a.table.lookup(2), None);
    assert_eq!(dsdv_a.table.own_seq() % 2, 0);
    assert!(dsdv_a.table.own_seq() > 0);

    let drone_b = sim.ctx.drone(1);
    let router_b = drone_b.router.borrow();
    let RoutingProtocol::Dsdv(dsdv_b) = &*router_b else {
        panic!("expected dsdv");
    };
    assert_eq!(dsdv_b.table.lookup(2), None);
    assert_eq!(dsdv_b.table.lookup(0), Some(0));
    assert_eq!(dsdv_b.table.own_seq() % 2, 0);
}

/// PrudentCaster on a 5-drone chain in MLST-prune mode: the TDMA schedule
/// keeps the channel collision-free, interior drones re-broadcast, and at
/// least one envelope reaches every drone exactly once.
#[test]
fn prudent_chain_mlst_suppression() {
    let positions = vec![
        [100.0, 300.0, 300.0],
        [300.0, 300.0, 300.0],
        [500.0, 300.0, 300.0],
        [700.0, 300.0, 300.0],
        [900.0, 300.0, 300.0],
    ];
    let mut config = scenario_config(positions, RoutingProtocolKind::PrudentCaster);
    config.broadcast_slot = 20_000;
    config.data_broadcast_type = 2;
    config.sim_time = 3_000_000;
    config.log_path = temp_dir("prudent-logs");
    config.output_path = temp_dir("prudent-results");

    let mut sim = Simulator::new(config).unwrap();
    sim.run();

    let metrics = sim.ctx.metrics.borrow();
    assert_eq!(metrics.collision_num, 0, "TDMA slots must not collide");
    assert!(metrics.datapacket_generated_num > 0);

    // some envelope reached every single drone (each set also contains the
    // drone's own envelopes, so intersect across the fleet)
    let mut common: Option<std::collections::BTreeSet<u64>> = None;
    for id in 0..5 {
        let arrived = metrics
            .b_datapacket_arrived
            .get(&id)
            .cloned()
            .unwrap_or_default();
        common = Some(match common {
            None => arrived,
            Some(set) => set.intersection(&arrived).copied().collect(),
        });
    }
    assert!(
        !common.unwrap().is_empty(),
        "no envelope reached the whole chain"
    );

    let summary = metrics.summary(true);
    assert!(summary.pdr > 0.0);
    drop(metrics);

    // per-drone packet logs were written
    for id in 0..5 {
        let log = sim.ctx.config.log_path.join(id.to_string());
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(!content.is_empty());
    }
}

/// OPAR delivers over a relay chain using the attached source route.
#[test]
fn opar_delivers_over_a_relay() {
    let mut config = scenario_config(
        vec![
            [100.0, 100.0, 100.0],
            [300.0, 100.0, 100.0],
            [500.0, 100.0, 100.0],
        ],
        RoutingProtocolKind::Opar,
    );
    config.sim_time = 2_700_000;

    let mut sim = Simulator::new(config).unwrap();
    sim.inject_data_packet(0, 2, 1_000_000 * MICROS);
    sim.run();

    let metrics = sim.ctx.metrics.borrow();
    assert!(metrics.datapacket_arrived.contains(&1));
    assert_eq!(metrics.hop_cnt[&(2, 1)], 2);
    assert_eq!(metrics.summary(false).pdr, 100.0);
}
