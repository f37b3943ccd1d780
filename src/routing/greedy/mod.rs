//! Greedy geographic forwarding.
//!
//! Neighbors are learned from periodic position hellos and expire after a
//! fixed lifetime. Each data packet goes to the neighbor closest to the
//! destination; when no neighbor improves on the own distance the packet
//! has hit a void area and is reported unroutable.

pub mod neighbor_table;

pub use neighbor_table::GreedyNeighborTable;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::NodeId;
use crate::config::SimulationConfig;
use crate::engine::{MICROS, MILLIS, SimTime};
use crate::entities::packet::{Packet, PacketKind};
use crate::routing::RoutingProtocol;
use crate::simulator::{Ctx, SimContext};

/// Hello broadcast period, before jitter.
const HELLO_INTERVAL: SimTime = 500 * MILLIS;
/// Seed offset of the per-drone routing random stream.
const ROUTING_RNG_OFFSET: u64 = 10;

pub struct Greedy {
    node: NodeId,
    rng: StdRng,
    pub neighbor_table: GreedyNeighborTable,
}

impl Greedy {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        Self {
            node: id,
            rng: StdRng::seed_from_u64(config.seed + id as u64 + ROUTING_RNG_OFFSET),
            neighbor_table: GreedyNeighborTable::new(),
        }
    }

    pub fn next_hop_selection(
        &mut self,
        ctx: &SimContext,
        packet: &mut Packet,
    ) -> (bool, bool) {
        let dst = match &packet.kind {
            PacketKind::Data { dst, .. } => *dst,
            _ => return (false, false),
        };
        self.neighbor_table.purge(ctx.clock.now());

        let my_position = ctx.drone(self.node).coords.get();
        let dst_position = ctx.drone(dst).coords.get();
        match self
            .neighbor_table
            .best_neighbor(&my_position, &dst_position)
        {
            Some(next_hop) => {
                packet.next_hop_id = Some(next_hop);
                (true, false)
            }
            None => {
                log::debug!(
                    "UAV {} sees a void area toward UAV {}",
                    self.node,
                    dst
                );
                (false, false)
            }
        }
    }

    fn jitter(&mut self) -> SimTime {
        self.rng.gen_range(1_000..=2_000) * MICROS
    }
}

/// Broadcast the own position every [`HELLO_INTERVAL`] plus 1-2 ms jitter.
pub async fn hello_process(ctx: Ctx, id: NodeId) {
    loop {
        let drone = ctx.drone(id);
        if drone.sleep.get() {
            break;
        }
        let jitter = {
            let mut router = drone.router.borrow_mut();
            let RoutingProtocol::Greedy(r) = &mut *router else {
                unreachable!("greedy hello process on a non-greedy drone");
            };
            r.jitter()
        };
        let hello_id = ctx.counters.next_hello();
        let packet = Packet::new(
            hello_id,
            ctx.config.hello_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::GreedyHello {
                src: id,
                position: drone.coords.get(),
            },
        );
        log::debug!(
            "at {} UAV {} has hello packet to broadcast",
            ctx.clock.now(),
            id
        );
        ctx.metrics.borrow_mut().control_packet_num += 1;
        drone.transmitting_queue.borrow_mut().push_back(packet);

        ctx.clock.sleep(HELLO_INTERVAL + jitter).await;
    }
}
