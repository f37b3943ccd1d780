//! PrudentCaster: gossip broadcast with MLST pruning.
//!
//! Every drone broadcasts on a TDMA schedule (frame = slot x fleet size,
//! transmitting within the first half of its own slot): a hello carrying
//! its neighbor set and each neighbor's adjacency every slot, plus, once
//! the network has warmed up, an aggregated data broadcast every tenth
//! hello. Hellos and data go straight through the PHY to every drone in
//! broadcast range; the TDMA alignment replaces MAC contention.
//!
//! Re-broadcast pruning: for each pending item the drone extracts the
//! 2-hop subgraph around the most recent hop, builds a maximum-leaf
//! spanning tree rooted at the item's previous re-broadcaster, and forwards
//! the item only when the extended arrival path exists in that tree and the
//! drone itself is not one of its leaves. Leaves stay silent, which is what
//! keeps the broadcast storm down. Flooding and random gossip remain
//! selectable for comparison runs.
//!
//! The local graph is shared between the reception path and the TDMA
//! process of the same drone; all access goes through a blocking mutex to
//! pin down the consistency contract even under the cooperative scheduler.

pub mod graph;

pub use graph::Graph;

use std::collections::{BTreeMap, VecDeque};
use std::io::Write as _;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

use crate::NodeId;
use crate::PacketId;
use crate::config::SimulationConfig;
use crate::engine::SimTime;
use crate::entities::packet::{Packet, PacketKind, PrudentItem};
use crate::phy;
use crate::routing::RoutingProtocol;
use crate::simulator::{Ctx, SimContext};

/// A data broadcast rides along every tenth hello.
const DATA_EVERY_N_HELLOS: u64 = 10;
/// Seed offset of the per-drone routing random stream.
const ROUTING_RNG_OFFSET: u64 = 10;

/// What to do with a pending item at broadcast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBroadcastPolicy {
    /// Re-broadcast unconditionally.
    Flood,
    /// Re-broadcast with probability 1 / |neighbors(most recent hop)|.
    Gossip,
    /// Re-broadcast only as an internal node of the MLST.
    MlstPrune,
}

impl DataBroadcastPolicy {
    pub fn from_config(value: u8) -> Self {
        match value {
            0 => DataBroadcastPolicy::Flood,
            1 => DataBroadcastPolicy::Gossip,
            _ => DataBroadcastPolicy::MlstPrune,
        }
    }
}

type SharedGraph = Mutex<NoopRawMutex, RefCell<Graph>>;

pub struct PrudentCaster {
    node: NodeId,
    rng: StdRng,
    policy: DataBroadcastPolicy,
    hello_count: u64,
    local_graph: SharedGraph,
    /// Arrival paths per (origin, packet): each entry is
    /// `[previous re-broadcaster, neighbor heard from]`, or just
    /// `[neighbor]` for items lifted from a neighbor's envelope.
    drone_paths: BTreeMap<(NodeId, PacketId), VecDeque<Vec<NodeId>>>,
    /// Items awaiting the next data broadcast.
    pending: BTreeMap<(NodeId, PacketId), PrudentItem>,
}

impl PrudentCaster {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        Self {
            node: id,
            rng: StdRng::seed_from_u64(config.seed + id as u64 + ROUTING_RNG_OFFSET),
            policy: DataBroadcastPolicy::from_config(config.data_broadcast_type),
            hello_count: 0,
            local_graph: Mutex::new(RefCell::new(Graph::new())),
            drone_paths: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Handle a PrudentCaster frame at the network layer.
    pub fn packet_reception(&mut self, ctx: &SimContext, packet: Packet) {
        let now = ctx.clock.now();
        match packet.kind {
            PacketKind::PrudentHello { src, neighbors } => {
                self.local_graph.lock(|cell| {
                    let mut graph = cell.borrow_mut();
                    graph.add_edge(self.node, src);
                    graph.touch_node(src, now);
                    for (&neighbor, adjacency) in &neighbors {
                        graph.add_edge(src, neighbor);
                        for &two_hop in adjacency {
                            graph.add_edge(neighbor, two_hop);
                        }
                    }
                });
            }
            PacketKind::PrudentData { src, items } => {
                if src == self.node {
                    return;
                }
                self.local_graph.lock(|cell| {
                    let mut graph = cell.borrow_mut();
                    graph.add_edge(self.node, src);
                    graph.touch_node(src, now);
                });

                // the envelope itself is a data item originated by the neighbor
                let envelope_item = PrudentItem {
                    origin: src,
                    prev_drone: src,
                    packet_id: packet.packet_id,
                    creation_time: packet.creation_time,
                    ttl: packet.ttl,
                };
                self.record_arrival(ctx, &envelope_item);
                self.store_item(ctx, envelope_item, vec![src]);

                for item in items {
                    self.record_arrival(ctx, &item);
                    if item.origin != self.node {
                        let path = vec![item.prev_drone, src];
                        self.store_item(ctx, item, path);
                    }
                }
            }
            _ => {}
        }
    }

    /// Per-receiver delivery accounting, deduplicated by the arrived set.
    fn record_arrival(&self, ctx: &SimContext, item: &PrudentItem) {
        let latency = ctx.clock.now() - item.creation_time;
        ctx.metrics.borrow_mut().record_broadcast_delivery(
            self.node,
            item.packet_id,
            latency,
            ctx.config.data_packet_length,
            item.ttl,
        );
    }

    fn store_item(&mut self, ctx: &SimContext, item: PrudentItem, path: Vec<NodeId>) {
        let key = (item.origin, item.packet_id);
        self.drone_paths.entry(key).or_default().push_back(path);
        self.write_packet_log(ctx, item.packet_id, item.creation_time);
        self.pending.insert(key, item);
    }

    /// Drop edges from self to nodes silent for more than two TDMA frames.
    fn update_local_graph(&mut self, ctx: &SimContext) {
        let now = ctx.clock.now();
        let stale_after = 2 * ctx.config.broadcast_frame_ns();
        let own = self.node;
        self.local_graph.lock(|cell| {
            let mut graph = cell.borrow_mut();
            let stale: Vec<NodeId> = graph
                .node_times()
                .filter(|&(_, seen)| now.saturating_sub(seen) > stale_after)
                .map(|(node, _)| node)
                .collect();
            for node in stale {
                graph.remove_edge(own, node);
            }
        });
    }

    /// Hello carrying the neighbor set and each neighbor's adjacency.
    fn build_hello(&mut self, ctx: &SimContext) -> Packet {
        let id = ctx.counters.next_hello();
        self.hello_count += 1;
        self.update_local_graph(ctx);

        let own = self.node;
        let neighbors = self.local_graph.lock(|cell| {
            let graph = cell.borrow();
            let mut map = BTreeMap::new();
            for &neighbor in graph.neighbors(own) {
                map.insert(neighbor, graph.neighbors(neighbor).to_vec());
            }
            map
        });

        Packet::new(
            id,
            ctx.config.hello_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::PrudentHello {
                src: self.node,
                neighbors,
            },
        )
    }

    /// Aggregate the pending items into one outgoing envelope, applying the
    /// configured re-broadcast policy. Clears the pending stores.
    fn generate_data_broadcast(&mut self, ctx: &SimContext) -> Packet {
        self.update_local_graph(ctx);
        let id = ctx.counters.next_prudent_data();

        let mut items = Vec::new();
        let keys: Vec<(NodeId, PacketId)> = self.drone_paths.keys().copied().collect();
        for key in keys {
            let paths = self.drone_paths.remove(&key).unwrap_or_default();
            let Some(mut item) = self.pending.remove(&key) else {
                continue;
            };
            match self.policy {
                DataBroadcastPolicy::Flood => {
                    item.increase_ttl();
                    items.push(item);
                }
                DataBroadcastPolicy::Gossip => {
                    if self.check_random_send(&paths) {
                        item.increase_ttl();
                        items.push(item);
                    }
                }
                DataBroadcastPolicy::MlstPrune => {
                    if let Some(recent) = self.check_mlst_include(&paths) {
                        item.prev_drone = recent;
                        item.increase_ttl();
                        items.push(item);
                    }
                }
            }
        }

        Packet::new(
            id,
            ctx.config.data_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::PrudentData {
                src: self.node,
                items,
            },
        )
    }

    /// MLST pruning: forward only when the extended arrival path exists in
    /// the tree and self is not one of its leaves. Returns the most recent
    /// hop to record as the item's previous re-broadcaster.
    fn check_mlst_include(&self, paths: &VecDeque<Vec<NodeId>>) -> Option<NodeId> {
        self.local_graph.lock(|cell| {
            let graph = cell.borrow();
            for path in paths {
                let Some(&recent) = path.last() else {
                    continue;
                };
                let root = path[0];
                if root == self.node {
                    // the item came back around, never forward it again
                    continue;
                }
                let mut subgraph = graph.subgraph_within_hops(recent, 2);
                let (tree, _leaves) = subgraph.mlst(root);
                let mut extended = path.clone();
                extended.push(self.node);
                if !tree.is_leaf(self.node) && tree.path_exists(&extended) {
                    return Some(recent);
                }
            }
            None
        })
    }

    /// Random gossip: forward with the best probability
    /// `1 / |neighbors(most recent hop)|` over the recorded paths.
    fn check_random_send(&mut self, paths: &VecDeque<Vec<NodeId>>) -> bool {
        let mut most_prob = 0.0f64;
        self.local_graph.lock(|cell| {
            let graph = cell.borrow();
            for path in paths {
                if let Some(&recent) = path.last() {
                    let degree = graph.neighbors(recent).len();
                    if degree > 0 {
                        most_prob = most_prob.max(1.0 / degree as f64);
                    }
                }
            }
        });
        self.rng.gen_range(0.0..1.0) < most_prob
    }

    /// Append `"<packet_id> <latency_us>"` to this drone's packet log.
    fn write_packet_log(&self, ctx: &SimContext, packet_id: PacketId, creation_time: SimTime) {
        let latency_us = (ctx.clock.now() - creation_time) / 1_000;
        let path = ctx.config.log_path.join(self.node.to_string());
        let line = format!("{} {}\n", packet_id, latency_us);
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result {
            log::error!(
                "failed to append packet log {}: {}",
                path.display(),
                error
            );
        }
    }
}

/// TDMA broadcast schedule: align into the first half of the own slot,
/// then fire once per frame, keeping the offset.
pub async fn broadcast_process(ctx: Ctx, id: NodeId) {
    let slot = ctx.config.broadcast_slot_ns();
    let frame_size = ctx.config.broadcast_frame_ns();
    let max_delay = slot / 2;

    let now = ctx.clock.now();
    let frame_start = (now / frame_size) * frame_size;
    let mut my_slot_start = frame_start + id as u64 * slot;
    if now > my_slot_start + max_delay {
        // the first half of this slot is already gone, take the next frame
        my_slot_start += frame_size;
    }

    let offset = {
        let drone = ctx.drone(id);
        let mut router = drone.router.borrow_mut();
        let RoutingProtocol::PrudentCaster(r) = &mut *router else {
            unreachable!("prudent broadcast process on a non-prudent drone");
        };
        r.rng.gen_range(0..max_delay.max(1))
    };
    let mut broadcast_time = my_slot_start + offset;
    ctx.clock
        .sleep(broadcast_time.saturating_sub(now))
        .await;
    broadcast_round(&ctx, id).await;

    loop {
        let next_broadcast = broadcast_time + frame_size;
        let now = ctx.clock.now();
        if now < next_broadcast {
            ctx.clock.sleep(next_broadcast - now).await;
        }
        {
            let drone = ctx.drone(id);
            if drone.sleep.get() {
                break;
            }
        }
        broadcast_round(&ctx, id).await;
        broadcast_time = next_broadcast;
    }
}

/// One TDMA round: the hello, then, when due, the aggregated data envelope
/// serialized behind it on air.
async fn broadcast_round(ctx: &Ctx, id: NodeId) {
    let (hello, data_due) = {
        let drone = ctx.drone(id);
        let mut router = drone.router.borrow_mut();
        let RoutingProtocol::PrudentCaster(r) = &mut *router else {
            unreachable!("prudent broadcast round on a non-prudent drone");
        };
        let hello = r.build_hello(ctx);
        let warmed_up =
            ctx.counters.hellos_generated() > ctx.config.number_of_drones as u64 + 1;
        let data_due = warmed_up && r.hello_count % DATA_EVERY_N_HELLOS == 0;
        (hello, data_due)
    };
    ctx.metrics.borrow_mut().control_packet_num += 1;
    send_in_range(ctx, id, hello);

    if data_due {
        // one radio per drone: the data frame follows the hello on air
        ctx.clock
            .sleep(ctx.config.airtime(ctx.config.hello_packet_length))
            .await;

        let data = {
            let drone = ctx.drone(id);
            let mut router = drone.router.borrow_mut();
            let RoutingProtocol::PrudentCaster(r) = &mut *router else {
                unreachable!("prudent broadcast round on a non-prudent drone");
            };
            let data = r.generate_data_broadcast(ctx);
            r.write_packet_log(ctx, data.packet_id, data.creation_time);
            data
        };

        let item_count = match &data.kind {
            PacketKind::PrudentData { items, .. } => items.len() as u64,
            _ => 0,
        };
        {
            let mut metrics = ctx.metrics.borrow_mut();
            metrics.datapacket_generated_num += 1;
            metrics.b_datapacket_sent += item_count + 1;
            metrics
                .b_datapacket_arrived
                .entry(id)
                .or_default()
                .insert(data.packet_id);
        }
        log::debug!(
            "at {} UAV {} broadcasts data envelope {} with {} items",
            ctx.clock.now(),
            id,
            data.packet_id,
            item_count
        );
        send_in_range(ctx, id, data);
    }
}

/// Multicast straight through the PHY to every drone within broadcast
/// range.
fn send_in_range(ctx: &Ctx, id: NodeId, packet: Packet) {
    let positions = ctx.positions();
    let targets: Vec<NodeId> = (0..positions.len())
        .filter(|&other| {
            other != id
                && positions[id].distance_to(&positions[other]) <= ctx.config.broadcast_range
        })
        .collect();
    phy::multicast(ctx, id, packet, &targets);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_decoding_matches_the_config_values() {
        assert_eq!(DataBroadcastPolicy::from_config(0), DataBroadcastPolicy::Flood);
        assert_eq!(DataBroadcastPolicy::from_config(1), DataBroadcastPolicy::Gossip);
        assert_eq!(
            DataBroadcastPolicy::from_config(2),
            DataBroadcastPolicy::MlstPrune
        );
    }

    #[test]
    fn mlst_include_skips_looped_items() {
        let config = SimulationConfig::default();
        let caster = PrudentCaster::new(&config, 2);
        // the recorded previous re-broadcaster is self: never forward
        let mut paths = VecDeque::new();
        paths.push_back(vec![2, 1]);
        assert_eq!(caster.check_mlst_include(&paths), None);
    }

    #[test]
    fn mlst_include_forwards_internal_chain_nodes_only() {
        let config = SimulationConfig::default();

        // chain 0-1-2-3-4 known to everyone via hellos
        let build = |node: NodeId| {
            let mut caster = PrudentCaster::new(&config, node);
            caster.local_graph.lock(|cell| {
                let mut graph = cell.borrow_mut();
                for i in 0..4 {
                    graph.add_edge(i, i + 1);
                }
            });
            caster
        };

        // item originated at 0, arrived at 1 directly: 1 is internal
        let relay = build(1);
        let mut paths = VecDeque::new();
        paths.push_back(vec![0]);
        assert_eq!(relay.check_mlst_include(&paths), Some(0));

        // same item at the far end of the chain: 4 is a leaf and suppresses
        let end = build(4);
        let mut paths = VecDeque::new();
        paths.push_back(vec![2, 3]);
        assert_eq!(end.check_mlst_include(&paths), None);
    }
}
