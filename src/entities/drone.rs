//! Per-drone state and lifecycle processes.
//!
//! Each drone runs, on the shared virtual timeline: an application traffic
//! generator, a transmit-queue feeder, an inbox receive loop with per-frame
//! airtime evaluation (interference detection), and an energy monitor. The
//! routing and mobility modules spawn their own per-drone processes on top.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use crate::config::{SimulationConfig, TrafficPattern};
use crate::engine::{MICROS, SECONDS, ProcessKey, SimTime};
use crate::entities::packet::{Packet, PacketKind, VfStage};
use crate::mac::{self, MacProtocol};
use crate::phy::channel::Frame;
use crate::routing::{self, RoutingProtocol};
use crate::simulator::{Ctx, SimContext};
use crate::util::{Vector3, intervals_overlap};
use crate::NodeId;

/// Poll period of the transmit-queue feeder.
const FEED_INTERVAL: SimTime = 10 * MICROS;
/// Poll period of the energy monitor.
const ENERGY_CHECK_INTERVAL: SimTime = SECONDS;

/// A frame currently on the air toward this receiver. `collided` is set by
/// any overlapping in-range frame during evaluation.
pub struct InFlight {
    pub frame: Frame,
    pub collided: Cell<bool>,
}

pub struct Drone {
    pub identifier: NodeId,
    pub coords: Cell<Vector3>,
    pub velocity: Cell<Vector3>,
    /// Heading angle in the horizontal plane, radians.
    pub direction: Cell<f64>,
    /// Elevation angle, radians.
    pub pitch: Cell<f64>,
    pub velocity_mean: Cell<f64>,
    pub direction_mean: Cell<f64>,
    pub pitch_mean: Cell<f64>,
    /// Remaining battery, joules.
    pub residual_energy: Cell<f64>,
    pub sleep: Cell<bool>,
    pub transmitting_queue: RefCell<VecDeque<Packet>>,
    /// Packets that had no viable next hop when fed.
    pub waiting_list: RefCell<Vec<Packet>>,
    /// Frames whose airtime has started and not yet been evaluated.
    pub inflight: RefCell<Vec<Rc<InFlight>>>,
    /// Positions learned from topology (VfPacket) exchanges.
    pub topology_neighbors: RefCell<BTreeMap<NodeId, (Vector3, SimTime)>>,
    pub router: RefCell<RoutingProtocol>,
    pub mac: MacProtocol,
    rng: RefCell<StdRng>,
}

impl Drone {
    pub fn new(config: &SimulationConfig, id: NodeId, position: Vector3) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed + id as u64);
        let speed = config.drone_speed;
        let direction = rng.gen_range(0.0..std::f64::consts::TAU);
        let pitch: f64 = 0.0;
        let velocity = Vector3::new(
            speed * direction.cos() * pitch.cos(),
            speed * direction.sin() * pitch.cos(),
            speed * pitch.sin(),
        );
        Self {
            identifier: id,
            coords: Cell::new(position),
            velocity: Cell::new(velocity),
            direction: Cell::new(direction),
            pitch: Cell::new(pitch),
            velocity_mean: Cell::new(speed),
            direction_mean: Cell::new(direction),
            pitch_mean: Cell::new(pitch),
            residual_energy: Cell::new(config.initial_energy),
            sleep: Cell::new(false),
            transmitting_queue: RefCell::new(VecDeque::new()),
            waiting_list: RefCell::new(Vec::new()),
            inflight: RefCell::new(Vec::new()),
            topology_neighbors: RefCell::new(BTreeMap::new()),
            router: RefCell::new(RoutingProtocol::new(config, id)),
            mac: MacProtocol::new(config, id),
            rng: RefCell::new(rng),
        }
    }

    pub fn speed(&self) -> f64 {
        self.velocity.get().norm()
    }

    pub fn queue_len(&self) -> usize {
        self.transmitting_queue.borrow().len()
    }

    /// Drop the acknowledged packet from the transmit queue, if a copy is
    /// still waiting there.
    pub fn remove_from_queue(&self, packet_id: crate::PacketId) {
        self.transmitting_queue
            .borrow_mut()
            .retain(|p| p.packet_id != packet_id);
    }

    /// Motor draw at `speed`: hover baseline plus a quadratic motion term.
    pub fn power_consumption(config: &SimulationConfig, speed: f64) -> f64 {
        config.hover_power + config.move_power_coeff * speed * speed
    }
}

/// Spawn every lifecycle process of drone `id`.
pub fn start_processes(ctx: &Ctx, id: NodeId) {
    if crate::simulator::unicast_traffic_enabled(&ctx.config) {
        ctx.spawn(traffic_process(Rc::clone(ctx), id));
    }
    ctx.spawn(feed_process(Rc::clone(ctx), id));
    ctx.spawn(receive_process(Rc::clone(ctx), id));
    ctx.spawn(energy_monitor(Rc::clone(ctx), id));

    // announce presence to the topology layer once at startup; PrudentCaster
    // discovers topology through its own hellos and keeps the TDMA channel
    // free of contention traffic
    if ctx.config.routing_protocol != crate::config::RoutingProtocolKind::PrudentCaster {
        let drone = ctx.drone(id);
        let vf_id = ctx.counters.next_vf();
        let hello = Packet::new(
            vf_id,
            ctx.config.hello_packet_length,
            ctx.clock.now(),
            ctx.config.packet_lifetime_ns(),
            PacketKind::VfPacket {
                src: id,
                position: drone.coords.get(),
                stage: VfStage::Hello,
            },
        );
        drone.transmitting_queue.borrow_mut().push_back(hello);
    }
}

/// Create one unicast data packet `src -> dst` and enqueue it at the source.
pub fn generate_data_packet(ctx: &SimContext, src: NodeId, dst: NodeId) {
    let packet = crate::simulator::new_data_packet(ctx, src, dst);
    {
        let mut metrics = ctx.metrics.borrow_mut();
        metrics.datapacket_generated_num += 1;
        metrics.datapacket_generated.insert(packet.packet_id);
    }
    log::debug!(
        "at {} UAV {} generates data packet {} for UAV {}",
        ctx.clock.now(),
        src,
        packet.packet_id,
        dst
    );
    ctx.drone(src).transmitting_queue.borrow_mut().push_back(packet);
}

/// Application traffic source: Poisson or uniform inter-arrival times with a
/// uniformly random destination.
async fn traffic_process(ctx: Ctx, id: NodeId) {
    let n_drones = ctx.n_drones();
    if n_drones < 2 {
        return;
    }
    loop {
        let drone = ctx.drone(id);
        if drone.sleep.get() {
            break;
        }
        let wait = {
            let mut rng = drone.rng.borrow_mut();
            match ctx.config.traffic_pattern {
                TrafficPattern::Poisson => {
                    let exp = Exp::new(ctx.config.traffic_rate).expect("validated traffic rate");
                    (exp.sample(&mut *rng) * 1e9) as SimTime
                }
                TrafficPattern::Uniform => rng.gen_range(500_000..=505_000) * MICROS,
                TrafficPattern::Off => return,
            }
        };
        ctx.clock.sleep(wait).await;

        let drone = ctx.drone(id);
        if drone.sleep.get() {
            break;
        }
        let dst = {
            let mut rng = drone.rng.borrow_mut();
            loop {
                let candidate = rng.gen_range(0..n_drones);
                if candidate != id {
                    break candidate;
                }
            }
        };
        generate_data_packet(&ctx, id, dst);
    }
}

/// Drain the transmit queue: route fresh data packets, re-dispatch retries
/// and control packets, park un-routable packets on the waiting list.
async fn feed_process(ctx: Ctx, id: NodeId) {
    loop {
        {
            let drone = ctx.drone(id);
            if drone.sleep.get() {
                break;
            }
        }
        ctx.clock.sleep(FEED_INTERVAL).await;

        let drone = ctx.drone(id);
        let Some(mut packet) = drone.transmitting_queue.borrow_mut().pop_front() else {
            continue;
        };

        if packet.is_data() {
            if ctx.clock.now() > packet.creation_time + packet.deadline {
                log::debug!(
                    "UAV {} drops expired data packet {}",
                    id,
                    packet.packet_id
                );
                continue;
            }
            if packet.attempts(id) == 0 {
                let (has_route, _enquire) = drone
                    .router
                    .borrow_mut()
                    .next_hop_selection(&ctx, &mut packet);
                if has_route {
                    packet_coming(&ctx, id, packet);
                } else {
                    log::debug!(
                        "UAV {} has no route for data packet {}, parking it",
                        id,
                        packet.packet_id
                    );
                    drone.waiting_list.borrow_mut().push(packet);
                }
            } else {
                packet_coming(&ctx, id, packet);
            }
        } else {
            packet_coming(&ctx, id, packet);
        }
    }
}

/// Hand a packet to the MAC: bump the attempt counter, register a fresh
/// send-process slot, and spawn the MAC send process.
pub fn packet_coming(ctx: &Ctx, id: NodeId, mut packet: Packet) {
    let drone = ctx.drone(id);
    if drone.sleep.get() {
        return;
    }
    packet.bump_attempts(id);
    if packet.attempts(id) == 1 {
        // a relayed copy starts its own service-time accounting
        packet.first_attempt_time = None;
    }
    let key = ProcessKey::MacSend {
        node: id,
        packet: packet.packet_id,
    };
    ctx.registry.register(key);
    ctx.spawn(mac::mac_send(Rc::clone(ctx), id, packet));
}

/// Accept frames from the inbox and evaluate each at the end of its airtime.
async fn receive_process(ctx: Ctx, id: NodeId) {
    let inbox = ctx.channel.inbox(id);
    loop {
        let frame = inbox.get().await;
        let drone = ctx.drone(id);
        if drone.sleep.get() {
            continue;
        }
        let entry = Rc::new(InFlight {
            frame,
            collided: Cell::new(false),
        });
        drone.inflight.borrow_mut().push(Rc::clone(&entry));
        ctx.spawn(evaluate_frame(Rc::clone(&ctx), id, entry));
    }
}

/// Wait out a frame's airtime, then decide its fate: out of range, destroyed
/// by interference, or delivered up to the routing layer.
async fn evaluate_frame(ctx: Ctx, id: NodeId, entry: Rc<InFlight>) {
    ctx.clock.sleep(entry.frame.airtime).await;

    let drone = ctx.drone(id);
    let my_position = drone.coords.get();
    let tx_position = ctx.drone(entry.frame.transmitter).coords.get();
    let in_range = tx_position.distance_to(&my_position) <= ctx.max_comm_range;

    let mut collided = entry.collided.get();
    if in_range {
        let inflight = drone.inflight.borrow();
        for other in inflight.iter().filter(|o| !Rc::ptr_eq(o, &entry)) {
            if intervals_overlap(
                entry.frame.start_time,
                entry.frame.end_time(),
                other.frame.start_time,
                other.frame.end_time(),
            ) {
                // this frame reaches the receiver, so it destroys the overlap
                other.collided.set(true);
                let other_position = ctx.drone(other.frame.transmitter).coords.get();
                if other_position.distance_to(&my_position) <= ctx.max_comm_range {
                    collided = true;
                }
            }
        }
    }
    drone
        .inflight
        .borrow_mut()
        .retain(|o| !Rc::ptr_eq(o, &entry));

    if !in_range {
        log::trace!(
            "UAV {} misses packet {} from UAV {}: out of range",
            id,
            entry.frame.packet.packet_id,
            entry.frame.transmitter
        );
        return;
    }
    if collided {
        ctx.metrics.borrow_mut().collision_num += 1;
        log::debug!(
            "at {} packet {} collides at UAV {}",
            ctx.clock.now(),
            entry.frame.packet.packet_id,
            id
        );
        return;
    }
    if drone.sleep.get() {
        return;
    }
    routing::packet_reception(
        &ctx,
        id,
        entry.frame.packet.clone(),
        entry.frame.transmitter,
    )
    .await;
}

/// Put the drone to sleep once its battery drains below the threshold.
async fn energy_monitor(ctx: Ctx, id: NodeId) {
    loop {
        ctx.clock.sleep(ENERGY_CHECK_INTERVAL).await;
        let drone = ctx.drone(id);
        if drone.sleep.get() {
            break;
        }
        if drone.residual_energy.get() <= ctx.config.energy_threshold {
            log::warn!(
                "UAV {} battery depleted ({:.1} J), going to sleep",
                id,
                drone.residual_energy.get()
            );
            drone.sleep.set(true);
            break;
        }
    }
}
