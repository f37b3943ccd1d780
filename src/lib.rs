//! # UAVNet Simulator
//!
//! A discrete-event simulator for mobile ad-hoc networks of airborne nodes
//! ("drones"), used to evaluate MAC and routing protocols under mobility,
//! channel contention, and link churn.
//!
//! ## Architecture Overview
//!
//! The simulator is a layered per-node protocol stack driven by one global
//! virtual-time executor:
//!
//! - [`engine`]: a deterministic single-threaded virtual-time engine. Every
//!   per-drone activity (traffic generation, queue feeding, MAC attempts,
//!   mobility ticks, routing timers, frame reception) is an async task
//!   suspended on virtual timers, mailboxes, or exclusive resources.
//! - [`phy`]: the shared wireless channel. Per-receiver inboxes, per-drone
//!   "on air" resources for carrier sensing, and interference-aware frame
//!   evaluation at the end of each airtime window.
//! - [`mac`]: CSMA/CA with DIFS/backoff/ACK and interruption on channel-busy,
//!   plus a pure-ALOHA variant.
//! - [`routing`]: DSDV, geographic greedy forwarding, OPAR predictive source
//!   routing, and the PrudentCaster gossip broadcast protocol with MLST
//!   pruning over local topology graphs.
//! - [`mobility`]: 3-D Gauss-Markov position/velocity updates with boundary
//!   rebound, feeding positions back into routing decisions.
//! - [`simulator`]: bootstrap, per-drone process spawning, and network
//!   performance metrics.
//!
//! ## Determinism
//!
//! All randomness flows through seeded `StdRng` streams (one per drone and
//! concern), timers at equal virtual instants fire in FIFO arm order, and no
//! OS-thread parallelism exists on the simulated timeline. A run is exactly
//! repeatable for a given seed and configuration.

pub mod config;
pub mod engine;
pub mod entities;
pub mod mac;
pub mod mobility;
pub mod phy;
pub mod routing;
pub mod simulator;
pub mod util;

/// Identifier of a drone (dense, `0..number_of_drones`).
pub type NodeId = usize;

/// Globally unique packet identifier. Each packet family draws from a
/// disjoint id range (see `simulator::IdCounters`).
pub type PacketId = u64;
