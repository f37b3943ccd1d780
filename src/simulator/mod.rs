//! Simulation bootstrap and shared context.
//!
//! [`SimContext`] is the registry every process reaches through: the clock,
//! the channel, the drone table, metrics, and the global id counters.
//! Drones hold plain identifiers and look each other up here, so no
//! reference cycles exist (the context owns the drones, nothing owns the
//! context back).

pub mod metrics;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use anyhow::Context as _;
use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;

use crate::config::{Placement, RoutingProtocolKind, SimulationConfig, TrafficPattern};
use crate::engine::{MILLIS, ProcessRegistry, SimClock, SimExecutor, SimTime};
use crate::entities::drone::{self, Drone};
use crate::entities::packet::{Packet, PacketKind, TransmissionMode};
use crate::phy::channel::Channel;
use crate::phy::fading;
use crate::util::Vector3;
use crate::{NodeId, PacketId, mobility, routing};

use metrics::Metrics;

const DATA_ID_BASE: u64 = 0;
const HELLO_ID_BASE: u64 = 10_000;
const ACK_ID_BASE: u64 = 20_000;
const VF_ID_BASE: u64 = 30_000;
const PRUDENT_DATA_ID_BASE: u64 = 40_000;

/// Global packet id generators, one disjoint range per family.
pub struct IdCounters {
    data: Cell<u64>,
    hello: Cell<u64>,
    ack: Cell<u64>,
    vf: Cell<u64>,
    prudent_data: Cell<u64>,
}

impl IdCounters {
    fn new() -> Self {
        Self {
            data: Cell::new(DATA_ID_BASE),
            hello: Cell::new(HELLO_ID_BASE),
            ack: Cell::new(ACK_ID_BASE),
            vf: Cell::new(VF_ID_BASE),
            prudent_data: Cell::new(PRUDENT_DATA_ID_BASE),
        }
    }

    fn bump(cell: &Cell<u64>) -> PacketId {
        let next = cell.get() + 1;
        cell.set(next);
        next
    }

    pub fn next_data(&self) -> PacketId {
        Self::bump(&self.data)
    }

    pub fn next_hello(&self) -> PacketId {
        Self::bump(&self.hello)
    }

    pub fn next_ack(&self) -> PacketId {
        Self::bump(&self.ack)
    }

    pub fn next_vf(&self) -> PacketId {
        Self::bump(&self.vf)
    }

    pub fn next_prudent_data(&self) -> PacketId {
        Self::bump(&self.prudent_data)
    }

    /// Hello packets generated network-wide since bootstrap.
    pub fn hellos_generated(&self) -> u64 {
        self.hello.get() - HELLO_ID_BASE
    }
}

/// Everything a process needs to observe or mutate the simulated world.
pub struct SimContext {
    pub clock: Rc<SimClock>,
    spawner: LocalSpawner,
    pub config: Rc<SimulationConfig>,
    /// Maximum communication range from the link budget, meters.
    pub max_comm_range: f64,
    pub channel: Channel,
    pub registry: ProcessRegistry,
    pub metrics: RefCell<Metrics>,
    pub counters: IdCounters,
    drones: RefCell<Vec<Rc<Drone>>>,
}

pub type Ctx = Rc<SimContext>;

impl SimContext {
    /// Schedule a process at the current instant.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.spawner
            .spawn_local(future)
            .expect("spawn on a stopped executor");
    }

    pub fn drone(&self, id: NodeId) -> Rc<Drone> {
        Rc::clone(&self.drones.borrow()[id])
    }

    pub fn n_drones(&self) -> usize {
        self.drones.borrow().len()
    }

    /// Snapshot of every drone position at the current instant.
    pub fn positions(&self) -> Vec<Vector3> {
        self.drones
            .borrow()
            .iter()
            .map(|d| d.coords.get())
            .collect()
    }

    /// Carrier sense for `sender`: idle unless another drone within the
    /// sensing range is on air.
    pub fn channel_idle(&self, sender: NodeId) -> bool {
        self.channel
            .check_channel_availability(sender, &self.positions(), self.config.sensing_range)
    }
}

pub struct Simulator {
    executor: SimExecutor,
    pub ctx: Ctx,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let config = Rc::new(config);

        let executor = SimExecutor::new();
        let max_comm_range = fading::maximum_communication_range(&config);
        log::info!(
            "bootstrapping {} drones, sim time {} us, max communication range {:.1} m",
            config.number_of_drones,
            config.sim_time,
            max_comm_range
        );

        if config.routing_protocol == RoutingProtocolKind::PrudentCaster {
            std::fs::create_dir_all(&config.log_path).with_context(|| {
                format!("creating packet log directory {}", config.log_path.display())
            })?;
        }

        let ctx: Ctx = Rc::new(SimContext {
            clock: executor.clock(),
            spawner: executor.spawner(),
            config: Rc::clone(&config),
            max_comm_range,
            channel: Channel::new(config.number_of_drones),
            registry: ProcessRegistry::new(),
            metrics: RefCell::new(Metrics::new()),
            counters: IdCounters::new(),
            drones: RefCell::new(Vec::new()),
        });

        let positions = start_positions(&config);
        for (id, position) in positions.into_iter().enumerate() {
            log::info!(
                "UAV {} starts at ({:.1}, {:.1}, {:.1})",
                id,
                position.x,
                position.y,
                position.z
            );
            let drone = Rc::new(Drone::new(&config, id, position));
            ctx.drones.borrow_mut().push(drone);
        }

        for id in 0..config.number_of_drones {
            drone::start_processes(&ctx, id);
            routing::start(&ctx, id);
            ctx.spawn(mobility::gauss_markov::mobility_process(Rc::clone(&ctx), id));
        }
        ctx.spawn(progress_process(Rc::clone(&ctx)));

        Ok(Self { executor, ctx })
    }

    /// Drive the run to `sim_time`.
    pub fn run(&mut self) {
        let horizon = self.ctx.config.sim_time_ns();
        self.executor.run_until(horizon);
        log::info!(
            "simulation finished at {:.3} s",
            self.ctx.clock.now() as f64 / 1e9
        );
    }

    /// Queue one unicast data packet from `src` to `dst` at virtual instant
    /// `at`. Used by experiments and the scenario tests.
    pub fn inject_data_packet(&self, src: NodeId, dst: NodeId, at: SimTime) {
        let ctx = Rc::clone(&self.ctx);
        self.ctx.spawn(async move {
            let wait = at.saturating_sub(ctx.clock.now());
            ctx.clock.sleep(wait).await;
            drone::generate_data_packet(&ctx, src, dst);
        });
    }

    /// Put `node` to sleep at virtual instant `at` (silences all of its
    /// processes, as happens on energy depletion).
    pub fn schedule_sleep(&self, node: NodeId, at: SimTime) {
        let ctx = Rc::clone(&self.ctx);
        self.ctx.spawn(async move {
            let wait = at.saturating_sub(ctx.clock.now());
            ctx.clock.sleep(wait).await;
            log::info!("UAV {} goes to sleep", node);
            ctx.drone(node).sleep.set(true);
        });
    }

    /// Compute the summary and write `simulation_result.txt`.
    pub fn write_results(&self) -> anyhow::Result<metrics::MetricsSummary> {
        let broadcast_mode =
            self.ctx.config.routing_protocol == RoutingProtocolKind::PrudentCaster;
        let summary = self.ctx.metrics.borrow().summary(broadcast_mode);
        for line in summary.to_string().lines() {
            log::info!("{}", line);
        }

        let output = &self.ctx.config.output_path;
        std::fs::create_dir_all(output)
            .with_context(|| format!("creating output directory {}", output.display()))?;
        let path = output.join("simulation_result.txt");
        std::fs::write(&path, summary.to_string())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(summary)
    }
}

fn start_positions(config: &SimulationConfig) -> Vec<Vector3> {
    if let Some(positions) = &config.initial_positions {
        return positions
            .iter()
            .map(|p| Vector3::new(p[0], p[1], p[2]))
            .collect();
    }
    match config.placement {
        Placement::Random => mobility::start_coords::random_start_points(config),
        Placement::Connected => mobility::start_coords::connected_start_points(config),
    }
}

/// Log the simulated time every half second of virtual time.
async fn progress_process(ctx: Ctx) {
    loop {
        log::info!("at time: {:.1} s", ctx.clock.now() as f64 / 1e9);
        ctx.clock.sleep(500 * MILLIS).await;
    }
}

/// True when this routing protocol drives unicast application traffic.
pub fn unicast_traffic_enabled(config: &SimulationConfig) -> bool {
    config.traffic_pattern != TrafficPattern::Off
        && config.routing_protocol != RoutingProtocolKind::PrudentCaster
}

/// Build a data packet header for `src -> dst` created now.
pub fn new_data_packet(ctx: &SimContext, src: NodeId, dst: NodeId) -> Packet {
    let id = ctx.counters.next_data();
    let mut packet = Packet::new(
        id,
        ctx.config.data_packet_length,
        ctx.clock.now(),
        ctx.config.packet_lifetime_ns(),
        PacketKind::Data { src, dst },
    );
    packet.transmission_mode = TransmissionMode::Unicast;
    packet
}
