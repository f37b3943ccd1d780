//! Network layer: next-hop selection and packet reception.
//!
//! Every protocol exposes the same two operations. `next_hop_selection`
//! writes the chosen relay into the packet and reports `(has_route,
//! enquire)`; `enquire` stays false for the proactive protocols implemented
//! here. `packet_reception` dispatches a frame that survived the channel to
//! the protocol-specific handler; data and ACK handling is shared by the
//! unicast protocols.

pub mod dsdv;
pub mod greedy;
pub mod opar;
pub mod prudent;

use std::rc::Rc;

use crate::NodeId;
use crate::config::{RoutingProtocolKind, SimulationConfig};
use crate::engine::{MILLIS, ProcessKey, SimTime};
use crate::entities::packet::{Packet, PacketKind, TransmissionMode, VfStage};
use crate::phy;
use crate::simulator::{Ctx, SimContext};
use crate::util::Vector3;

/// Interval of the waiting-list sweep.
const WAITING_LIST_CHECK_INTERVAL: SimTime = 600 * MILLIS;

pub enum RoutingProtocol {
    Dsdv(dsdv::Dsdv),
    Greedy(greedy::Greedy),
    Opar(opar::Opar),
    PrudentCaster(prudent::PrudentCaster),
}

impl RoutingProtocol {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        match config.routing_protocol {
            RoutingProtocolKind::Dsdv => RoutingProtocol::Dsdv(dsdv::Dsdv::new(config, id)),
            RoutingProtocolKind::Greedy => RoutingProtocol::Greedy(greedy::Greedy::new(config, id)),
            RoutingProtocolKind::Opar => RoutingProtocol::Opar(opar::Opar::new(id)),
            RoutingProtocolKind::PrudentCaster => {
                RoutingProtocol::PrudentCaster(prudent::PrudentCaster::new(config, id))
            }
        }
    }

    /// Pick the next hop for a data packet, writing it into
    /// `packet.next_hop_id`. Returns `(has_route, enquire)`.
    pub fn next_hop_selection(
        &mut self,
        ctx: &SimContext,
        packet: &mut Packet,
    ) -> (bool, bool) {
        match self {
            RoutingProtocol::Dsdv(r) => r.next_hop_selection(ctx, packet),
            RoutingProtocol::Greedy(r) => r.next_hop_selection(ctx, packet),
            RoutingProtocol::Opar(r) => r.next_hop_selection(ctx, packet),
            // PrudentCaster never forwards unicast data
            RoutingProtocol::PrudentCaster(_) => (false, false),
        }
    }
}

/// Spawn the periodic processes of the protocol installed on drone `id`.
pub fn start(ctx: &Ctx, id: NodeId) {
    match ctx.config.routing_protocol {
        RoutingProtocolKind::Dsdv => {
            ctx.spawn(dsdv::hello_process(Rc::clone(ctx), id));
            ctx.spawn(dsdv::link_detect_process(Rc::clone(ctx), id));
            ctx.spawn(check_waiting_list(Rc::clone(ctx), id));
        }
        RoutingProtocolKind::Greedy => {
            ctx.spawn(greedy::hello_process(Rc::clone(ctx), id));
            ctx.spawn(check_waiting_list(Rc::clone(ctx), id));
        }
        RoutingProtocolKind::Opar => {
            ctx.spawn(check_waiting_list(Rc::clone(ctx), id));
        }
        RoutingProtocolKind::PrudentCaster => {
            ctx.spawn(prudent::broadcast_process(Rc::clone(ctx), id));
        }
    }
}

/// Handle a frame delivered to drone `id` at the network layer.
pub async fn packet_reception(ctx: &Ctx, id: NodeId, packet: Packet, src: NodeId) {
    let now = ctx.clock.now();
    match packet.kind {
        PacketKind::Data { .. } => handle_data(ctx, id, packet, src).await,
        PacketKind::Ack { .. } => handle_ack(ctx, id, packet, src),
        PacketKind::PrudentHello { .. } | PacketKind::PrudentData { .. } => {
            let drone = ctx.drone(id);
            let mut router = drone.router.borrow_mut();
            if let RoutingProtocol::PrudentCaster(r) = &mut *router {
                r.packet_reception(ctx, packet);
            }
        }
        PacketKind::DsdvHello {
            src: hello_src,
            table,
        } => {
            let drone = ctx.drone(id);
            let mut router = drone.router.borrow_mut();
            if let RoutingProtocol::Dsdv(r) = &mut *router {
                r.table.update_from_hello(hello_src, &table, now);
            }
        }
        PacketKind::GreedyHello {
            src: hello_src,
            position,
        } => {
            let drone = ctx.drone(id);
            let mut router = drone.router.borrow_mut();
            if let RoutingProtocol::Greedy(r) = &mut *router {
                r.neighbor_table.add_neighbor(hello_src, position, now);
            }
        }
        PacketKind::VfPacket {
            src: vf_src,
            position,
            stage,
        } => handle_vf(ctx, id, vf_src, position, stage),
    }
}

/// Shared data-packet handling: deliver at the destination, relay
/// otherwise, answer with an ACK after SIFS in both cases. A full transmit
/// queue drops the packet silently, without an ACK.
async fn handle_data(ctx: &Ctx, id: NodeId, packet: Packet, src: NodeId) {
    let dst = match &packet.kind {
        PacketKind::Data { dst, .. } => *dst,
        _ => unreachable!("handle_data on a non-data packet"),
    };
    log::debug!(
        "at {} UAV {} receives data packet {} from UAV {}",
        ctx.clock.now(),
        id,
        packet.packet_id,
        src
    );

    if dst == id {
        {
            let latency = ctx.clock.now() - packet.creation_time;
            ctx.metrics.borrow_mut().record_delivery(
                id,
                packet.packet_id,
                latency,
                ctx.config.data_packet_length,
                packet.ttl,
            );
        }
        log::info!(
            "packet {} delivered to UAV {} after {} hops",
            packet.packet_id,
            id,
            packet.ttl
        );
        reply_ack(ctx, id, src, &packet).await;
    } else {
        let drone = ctx.drone(id);
        if drone.queue_len() < ctx.config.max_queue_size {
            drone.transmitting_queue.borrow_mut().push_back(packet.clone());
            reply_ack(ctx, id, src, &packet).await;
        } else {
            // resource exhaustion: silent drop, the sender will retransmit
            ctx.metrics.borrow_mut().queue_overflow_num += 1;
        }
    }
}

/// Answer a received data frame: wait SIFS, then push the ACK straight
/// through the PHY. The original sender still occupies the channel for the
/// SIFS+ACK window, so no contention round is needed.
async fn reply_ack(ctx: &Ctx, id: NodeId, src: NodeId, acked: &Packet) {
    let ack_id = ctx.counters.next_ack();
    let mut ack = Packet::new(
        ack_id,
        ctx.config.ack_packet_length,
        ctx.clock.now(),
        ctx.config.packet_lifetime_ns(),
        PacketKind::Ack {
            acked: Box::new(acked.clone()),
        },
    );
    ack.transmission_mode = TransmissionMode::Unicast;
    ack.next_hop_id = Some(src);

    // turnaround from receiving to transmitting
    ctx.clock.sleep(ctx.config.sifs_ns()).await;
    let drone = ctx.drone(id);
    if drone.sleep.get() {
        return;
    }
    ack.increase_ttl();
    phy::unicast(ctx, id, ack.clone(), src);
    ctx.clock.sleep(ctx.config.airtime(ack.packet_length)).await;
}

/// ACK reception: account the MAC service delay, purge the acknowledged
/// packet, and cancel the pending `wait_ack`.
fn handle_ack(ctx: &Ctx, id: NodeId, packet: Packet, src: NodeId) {
    let acked = match packet.kind {
        PacketKind::Ack { acked } => *acked,
        _ => unreachable!("handle_ack on a non-ack packet"),
    };

    if let Some(first) = acked.first_attempt_time {
        ctx.metrics
            .borrow_mut()
            .mac_delay_ms
            .push((ctx.clock.now() - first) as f64 / 1e6);
    }
    let drone = ctx.drone(id);
    drone.remove_from_queue(acked.packet_id);

    let key = ProcessKey::WaitAck {
        node: id,
        packet: acked.packet_id,
    };
    if let Some(slot) = ctx.registry.get(key) {
        if !slot.is_finished() {
            log::debug!(
                "at {} the wait_ack of packet {} at UAV {} is cancelled by UAV {}",
                ctx.clock.now(),
                acked.packet_id,
                id,
                src
            );
            slot.mark_finished();
            slot.interrupt();
        }
    }
}

/// Topology hello/ack: remember the sender position, answer hellos.
fn handle_vf(ctx: &Ctx, id: NodeId, vf_src: NodeId, position: Vector3, stage: VfStage) {
    let drone = ctx.drone(id);
    drone
        .topology_neighbors
        .borrow_mut()
        .insert(vf_src, (position, ctx.clock.now()));

    if stage == VfStage::Hello {
        let reply_id = ctx.counters.next_vf();
        let reply = Packet::new(
            reply_id,
            ctx.config.hello_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::VfPacket {
                src: id,
                position: drone.coords.get(),
                stage: VfStage::Ack,
            },
        );
        drone.transmitting_queue.borrow_mut().push_back(reply);
    }
}

/// Periodic sweep over the waiting list: expired packets are dropped for
/// good, the rest re-enter the transmit queue once a route exists.
async fn check_waiting_list(ctx: Ctx, id: NodeId) {
    loop {
        {
            let drone = ctx.drone(id);
            if drone.sleep.get() {
                break;
            }
        }
        ctx.clock.sleep(WAITING_LIST_CHECK_INTERVAL).await;

        let drone = ctx.drone(id);
        let pending: Vec<Packet> = drone.waiting_list.borrow_mut().drain(..).collect();
        let mut still_waiting = Vec::new();
        for mut packet in pending {
            if ctx.clock.now() > packet.creation_time + packet.deadline {
                log::debug!(
                    "UAV {} abandons waiting packet {} past its deadline",
                    id,
                    packet.packet_id
                );
                continue;
            }
            let (has_route, _enquire) = drone
                .router
                .borrow_mut()
                .next_hop_selection(&ctx, &mut packet);
            if has_route {
                drone.transmitting_queue.borrow_mut().push_back(packet);
            } else {
                still_waiting.push(packet);
            }
        }
        drone.waiting_list.borrow_mut().extend(still_waiting);
    }
}
