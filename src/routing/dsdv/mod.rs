//! DSDV: destination-sequenced distance-vector routing.
//!
//! Periodic hellos carry the full routing table; the own entry's sequence
//! number is bumped by 2 before every snapshot, so it stays even and
//! strictly increasing. A separate link-detect process purges entries that
//! went a full lifetime without refresh and, whenever a purge removed
//! something, broadcasts a triggered update immediately.

pub mod table;

pub use table::DsdvRoutingTable;

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
/// Broken-link detection period.
const LINK_DETECT_INTERVAL: SimTime = 500 * MILLIS;
/// Seed offset of the per-drone routing random stream.
const ROUTING_RNG_OFFSET: u64 = 10;

pub struct Dsdv {
    node: NodeId,
    rng: StdRng,
    pub table: DsdvRoutingTable,
}

impl Dsdv {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        Self {
            node: id,
            rng: StdRng::seed_from_u64(config.seed + id as u64 + ROUTING_RNG_OFFSET),
            table: DsdvRoutingTable::new(id),
        }
    }

    pub fn next_hop_selection(
        &mut self,
        _ctx: &SimContext,
        packet: &mut Packet,
    ) -> (bool, bool) {
        let dst = match &packet.kind {
            PacketKind::Data { dst, .. } => *dst,
            _ => return (false, false),
        };
        match self.table.lookup(dst) {
            Some(next_hop) => {
                packet.next_hop_id = Some(next_hop);
                (true, false)
            }
            None => (false, false),
        }
    }

    /// Advance the own sequence number and snapshot the table into a hello.
    fn build_hello(&mut self, ctx: &SimContext) -> Packet {
        self.table.bump_own_seq();
        let id = ctx.counters.next_hello();
        Packet::new(
            id,
            ctx.config.hello_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::DsdvHello {
                src: self.node,
                table: self.table.snapshot(),
            },
        )
    }

    fn jitter(&mut self) -> SimTime {
        self.rng.gen_range(1_000..=2_000) * MICROS
    }
}

/// Broadcast the full table every [`HELLO_INTERVAL`] plus 1-2 ms jitter.
pub async fn hello_process(ctx: Ctx, id: NodeId) {
    loop {
        let drone = ctx.drone(id);
        if drone.sleep.get() {
            break;
        }
        let (packet, jitter) = {
            let mut router = drone.router.borrow_mut();
            let RoutingProtocol::Dsdv(r) = &mut *router else {
                unreachable!("dsdv hello process on a non-dsdv drone");
            };
            (r.build_hello(&ctx), r.jitter())
        };
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

/// Purge stale entries every [`LINK_DETECT_INTERVAL`]; a purge that removed
/// anything triggers an immediate full-table update.
pub async fn link_detect_process(ctx: Ctx, id: NodeId) {
    loop {
        {
            let drone = ctx.drone(id);
            if drone.sleep.get() {
                break;
            }
        }
        ctx.clock.sleep(LINK_DETECT_INTERVAL).await;

        let drone = ctx.drone(id);
        let triggered = {
            let mut router = drone.router.borrow_mut();
            let RoutingProtocol::Dsdv(r) = &mut *router else {
                unreachable!("dsdv link detect on a non-dsdv drone");
            };
            if r.table.purge(ctx.clock.now()) {
                Some(r.build_hello(&ctx))
            } else {
                None
            }
        };
        if let Some(packet) = triggered {
            log::info!(
                "at {} UAV {} broadcasts a triggered update to announce broken links",
                ctx.clock.now(),
                id
            );
            ctx.metrics.borrow_mut().control_packet_num += 1;
            drone.transmitting_queue.borrow_mut().push_back(packet);
        }
    }
}
