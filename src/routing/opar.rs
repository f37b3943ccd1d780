//! OPAR: optimized predictive and adaptive routing.
//!
//! The source builds an N x N cost matrix (1 for links within communication
//! range, infinite otherwise), runs Dijkstra, and predicts the lifetime of
//! every link on the found path from current positions and velocities. The
//! objective
//!
//! ```text
//! obj = w1 * total_cost + w2 * max(1/lifetime over links)
//! ```
//!
//! is minimized: among equal-cost paths the one whose weakest link lives
//! longest wins. Edges no better than the current minimum lifetime are
//! removed and Dijkstra re-runs until no path remains; the best path is
//! attached to the packet and relays simply pop their next hop from it.

use crate::NodeId;
use crate::entities::packet::{Packet, PacketKind};
use crate::simulator::SimContext;

/// Stand-in lifetime for links with no relative motion.
const INFINITE_LINK_LIFETIME: f64 = 1e11;

pub struct Opar {
    node: NodeId,
    /// Weight of the path cost term.
    w1: f64,
    /// Weight of the link-lifetime term.
    w2: f64,
}

impl Opar {
    pub fn new(id: NodeId) -> Self {
        Self {
            node: id,
            w1: 0.5,
            w2: 0.5,
        }
    }

    pub fn next_hop_selection(
        &mut self,
        ctx: &SimContext,
        packet: &mut Packet,
    ) -> (bool, bool) {
        let (origin, dst) = match &packet.kind {
            PacketKind::Data { src, dst } => (*src, *dst),
            _ => return (false, false),
        };

        let best_next_hop = if origin == self.node {
            // source: run the optimization and attach the path
            match self.plan_route(ctx, self.node, dst) {
                Some(path) if !path.is_empty() => {
                    let next_hop = path[0];
                    packet.routing_path = path;
                    next_hop
                }
                _ => return (false, false),
            }
        } else {
            // relay: pop the next hop from the attached path
            if packet.routing_path.len() > 1 {
                packet.routing_path.remove(0);
                packet.routing_path[0]
            } else {
                return (false, false);
            }
        };

        if best_next_hop == self.node {
            return (false, false);
        }
        packet.next_hop_id = Some(best_next_hop);
        (true, false)
    }

    /// Iterative lifetime-pruned Dijkstra. Returns the best path without
    /// the source itself.
    fn plan_route(&self, ctx: &SimContext, src: NodeId, dst: NodeId) -> Option<Vec<NodeId>> {
        let range = ctx.max_comm_range;
        let mut cost = cost_matrix(ctx, range);

        let mut best_obj = f64::INFINITY;
        let mut best_path: Option<Vec<NodeId>> = None;

        let mut path = dijkstra(ctx, &mut cost, src, dst, 0.0);
        while !path.is_empty() {
            let total_cost = (path.len() - 1) as f64;
            let mut min_lifetime = INFINITE_LINK_LIFETIME;
            for pair in path.windows(2) {
                let lifetime = link_lifetime_predictor(ctx, pair[0], pair[1], range);
                if lifetime < min_lifetime {
                    min_lifetime = lifetime;
                }
            }

            let obj = self.w1 * total_cost + self.w2 * (1.0 / min_lifetime);
            if obj < best_obj {
                best_obj = obj;
                best_path = Some(path[1..].to_vec());
            }

            path = dijkstra(ctx, &mut cost, src, dst, min_lifetime);
        }

        best_path
    }
}

/// 1 for links within communication range, infinity otherwise.
fn cost_matrix(ctx: &SimContext, range: f64) -> Vec<Vec<f64>> {
    let positions = ctx.positions();
    let n = positions.len();
    let mut cost = vec![vec![f64::INFINITY; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if positions[i].distance_to(&positions[j]) < range {
                cost[i][j] = 1.0;
                cost[j][i] = 1.0;
            }
        }
    }
    cost
}

/// Dijkstra with embedded pruning: while scanning, every edge whose
/// predicted lifetime is no better than `minimum_link_lifetime` is removed
/// from the matrix for this and later iterations. Ties on distance resolve
/// to the lowest node id. Returns `[src, ..., dst]`, or empty when
/// unreachable.
fn dijkstra(
    ctx: &SimContext,
    cost: &mut [Vec<f64>],
    src: NodeId,
    dst: NodeId,
    minimum_link_lifetime: f64,
) -> Vec<NodeId> {
    let n = cost.len();
    let range = ctx.max_comm_range;
    let mut dist = vec![f64::INFINITY; n];
    dist[src] = 0.0;
    let mut prev: Vec<Option<NodeId>> = vec![None; n];
    let mut visited = vec![false; n];

    for _ in 0..n {
        let mut u = None;
        let mut best = f64::INFINITY;
        for i in 0..n {
            if !visited[i] && (u.is_none() || dist[i] < best) {
                u = Some(i);
                best = dist[i];
            }
        }
        let Some(u) = u else { break };
        visited[u] = true;

        for v in 0..n {
            if visited[v] || !cost[u][v].is_finite() {
                continue;
            }
            let lifetime = link_lifetime_predictor(ctx, u, v, range);
            if lifetime <= minimum_link_lifetime {
                cost[u][v] = f64::INFINITY;
                cost[v][u] = f64::INFINITY;
            }
            let alt = dist[u] + cost[u][v];
            if alt < dist[v] {
                dist[v] = alt;
                prev[v] = Some(u);
            }
        }
    }

    let mut path = vec![dst];
    let mut current = dst;
    while current != src {
        match prev[current] {
            Some(p) => {
                path.push(p);
                current = p;
            }
            None => return Vec::new(),
        }
    }
    path.reverse();
    path
}

/// Time until the distance between two drones reaches the communication
/// range, from current positions and velocities: the larger positive root
/// of `|dp + dv*t| = range`.
pub fn link_lifetime_predictor(
    ctx: &SimContext,
    a: NodeId,
    b: NodeId,
    max_comm_range: f64,
) -> f64 {
    let drone_a = ctx.drone(a);
    let drone_b = ctx.drone(b);
    let pa = drone_a.coords.get();
    let pb = drone_b.coords.get();
    let va = drone_a.velocity.get();
    let vb = drone_b.velocity.get();

    let dvx = va.x - vb.x;
    let dvy = va.y - vb.y;
    let dvz = va.z - vb.z;
    let dpx = pa.x - pb.x;
    let dpy = pa.y - pb.y;
    let dpz = pa.z - pb.z;

    let quad_a = dvx * dvx + dvy * dvy + dvz * dvz;
    let quad_b = 2.0 * (dvx * dpx + dvy * dpy + dvz * dpz);
    let quad_c = dpx * dpx + dpy * dpy + dpz * dpz - max_comm_range * max_comm_range;

    if quad_a < 1e-12 {
        // no relative motion: the link never expires on its own
        return INFINITE_LINK_LIFETIME;
    }

    let discriminant = (quad_b * quad_b - 4.0 * quad_a * quad_c).max(0.0);
    let sqrt_d = discriminant.sqrt();
    let t1 = (-quad_b + sqrt_d) / (2.0 * quad_a);
    let t2 = (-quad_b - sqrt_d) / (2.0 * quad_a);
    t1.max(t2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoutingProtocolKind, SimulationConfig, TrafficPattern};
    use crate::entities::packet::TransmissionMode;
    use crate::routing::RoutingProtocol;
    use crate::simulator::Simulator;
    use crate::util::Vector3;

    fn build_sim(positions: Vec<[f64; 3]>) -> Simulator {
        let config = SimulationConfig {
            number_of_drones: positions.len(),
            initial_positions: Some(positions),
            routing_protocol: RoutingProtocolKind::Opar,
            traffic_pattern: TrafficPattern::Off,
            static_case: true,
            drone_speed: 0.0,
            map_length: 1_000.0,
            map_width: 1_000.0,
            map_height: 1_000.0,
            ..SimulationConfig::default()
        };
        Simulator::new(config).unwrap()
    }

    fn data_packet(ctx: &SimContext, src: NodeId, dst: NodeId) -> Packet {
        let mut packet = crate::simulator::new_data_packet(ctx, src, dst);
        packet.transmission_mode = TransmissionMode::Unicast;
        packet
    }

    #[test]
    fn link_lifetime_matches_the_closed_form() {
        let sim = build_sim(vec![[0.0, 0.0, 0.0], [100.0, 0.0, 0.0]]);
        let ctx = &sim.ctx;
        // drone 0 flees along x at 1 m/s; drone 1 static
        ctx.drone(0).velocity.set(Vector3::new(-1.0, 0.0, 0.0));
        let range = ctx.max_comm_range;
        let lifetime = link_lifetime_predictor(ctx, 0, 1, range);
        // separation grows as 100 + t, reaching the range at t = range - 100
        assert!((lifetime - (range - 100.0)).abs() < 1e-6);
    }

    #[test]
    fn static_links_never_expire() {
        let sim = build_sim(vec![[0.0, 0.0, 0.0], [100.0, 0.0, 0.0]]);
        let lifetime = link_lifetime_predictor(&sim.ctx, 0, 1, sim.ctx.max_comm_range);
        assert_eq!(lifetime, INFINITE_LINK_LIFETIME);
    }

    #[test]
    fn larger_minimum_lifetime_wins_between_equal_cost_paths() {
        // S(0) can reach D(3) via A(1) or B(2), both in two hops. A drifts
        // away, so the S-A and A-D links are mortal while S-B-D is static.
        let sim = build_sim(vec![
            [100.0, 100.0, 100.0],
            [300.0, 100.0, 100.0],
            [100.0, 300.0, 100.0],
            [300.0, 300.0, 100.0],
        ]);
        let ctx = &sim.ctx;
        ctx.drone(1).velocity.set(Vector3::new(10.0, 0.0, 0.0));

        let mut packet = data_packet(ctx, 0, 3);
        let drone = ctx.drone(0);
        let mut router = drone.router.borrow_mut();
        let (has_route, enquire) = router.next_hop_selection(ctx, &mut packet);

        assert!(has_route);
        assert!(!enquire);
        assert_eq!(packet.next_hop_id, Some(2));
        assert_eq!(packet.routing_path, vec![2, 3]);
    }

    #[test]
    fn relays_pop_the_attached_path() {
        let sim = build_sim(vec![
            [100.0, 100.0, 100.0],
            [300.0, 100.0, 100.0],
            [500.0, 100.0, 100.0],
        ]);
        let ctx = &sim.ctx;
        let mut packet = data_packet(ctx, 0, 2);
        packet.routing_path = vec![1, 2];

        let drone = ctx.drone(1);
        let mut router = drone.router.borrow_mut();
        let (has_route, _) = router.next_hop_selection(ctx, &mut packet);
        assert!(has_route);
        assert_eq!(packet.next_hop_id, Some(2));
        assert_eq!(packet.routing_path, vec![2]);
    }

    #[test]
    fn unreachable_destination_reports_no_route() {
        // far beyond communication range
        let sim = build_sim(vec![[0.0, 0.0, 0.0], [900.0, 900.0, 900.0]]);
        let ctx = &sim.ctx;
        let mut packet = data_packet(ctx, 0, 1);
        let drone = ctx.drone(0);
        let mut router = drone.router.borrow_mut();
        let (has_route, _) = router.next_hop_selection(ctx, &mut packet);
        assert!(!has_route);
        assert_eq!(packet.next_hop_id, None);
    }
}
