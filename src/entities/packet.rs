//! Packet model.
//!
//! One `Packet` struct carries the header fields common to every frame; the
//! [`PacketKind`] sum type distinguishes the families. Every hop operates on
//! its own copy: cloning at reception keeps TTL and retransmission
//! accounting local to each holder.

use std::collections::BTreeMap;

use crate::engine::SimTime;
use crate::util::Vector3;
use crate::{NodeId, PacketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    Unicast,
    Broadcast,
}

/// DSDV routing-table row as carried inside a hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub next_hop: NodeId,
    pub hop_count: u32,
    pub seq: u64,
}

/// Stage of a topology (virtual-force) exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfStage {
    Hello,
    Ack,
}

/// One aggregated data item inside a PrudentCaster broadcast. Carries its
/// own TTL and creation time so per-receiver latency and hop accounting
/// survive aggregation.
#[derive(Debug, Clone)]
pub struct PrudentItem {
    /// Drone whose broadcast originated the item.
    pub origin: NodeId,
    /// The node that last re-broadcast the item before the current carrier.
    pub prev_drone: NodeId,
    pub packet_id: PacketId,
    pub creation_time: SimTime,
    pub ttl: u32,
}

impl PrudentItem {
    pub fn increase_ttl(&mut self) {
        self.ttl += 1;
    }
}

#[derive(Debug, Clone)]
pub enum PacketKind {
    Data {
        src: NodeId,
        dst: NodeId,
    },
    /// Link-layer acknowledgement, echoing the acknowledged data copy.
    Ack {
        acked: Box<Packet>,
    },
    /// Full routing-table snapshot with destination sequence numbers.
    DsdvHello {
        src: NodeId,
        table: BTreeMap<NodeId, RouteSnapshot>,
    },
    /// Sender position for geographic forwarding.
    GreedyHello {
        src: NodeId,
        position: Vector3,
    },
    /// Neighbors-of-neighbors adjacency for the local topology graph.
    PrudentHello {
        src: NodeId,
        neighbors: BTreeMap<NodeId, Vec<NodeId>>,
    },
    /// Aggregated multi-origin data broadcast.
    PrudentData {
        src: NodeId,
        items: Vec<PrudentItem>,
    },
    /// Topology hello/ack carrying the sender position.
    VfPacket {
        src: NodeId,
        position: Vector3,
        stage: VfStage,
    },
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_id: PacketId,
    /// Frame length in bits.
    pub packet_length: u64,
    pub creation_time: SimTime,
    /// Drop deadline relative to `creation_time`.
    pub deadline: SimTime,
    /// Incremented on every transmission; doubles as the hop count at the
    /// destination.
    pub ttl: u32,
    pub transmission_mode: TransmissionMode,
    pub next_hop_id: Option<NodeId>,
    /// Source-routed path attached by OPAR.
    pub routing_path: Vec<NodeId>,
    /// Per-sender transmission attempt counters. Shallow-copied with the
    /// packet; each drone only touches its own entry.
    pub retransmission_attempts: BTreeMap<NodeId, u32>,
    /// Stamped on the first transmission attempt only, never reset.
    pub first_attempt_time: Option<SimTime>,
    pub transmitting_start_time: SimTime,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new(
        packet_id: PacketId,
        packet_length: u64,
        creation_time: SimTime,
        deadline: SimTime,
        kind: PacketKind,
    ) -> Self {
        Self {
            packet_id,
            packet_length,
            creation_time,
            deadline,
            ttl: 0,
            transmission_mode: TransmissionMode::Broadcast,
            next_hop_id: None,
            routing_path: Vec::new(),
            retransmission_attempts: BTreeMap::new(),
            first_attempt_time: None,
            transmitting_start_time: 0,
            kind,
        }
    }

    /// Transmission attempts made by `node` for this packet.
    pub fn attempts(&self, node: NodeId) -> u32 {
        self.retransmission_attempts.get(&node).copied().unwrap_or(0)
    }

    pub fn bump_attempts(&mut self, node: NodeId) {
        *self.retransmission_attempts.entry(node).or_insert(0) += 1;
    }

    pub fn increase_ttl(&mut self) {
        self.ttl += 1;
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, PacketKind::Data { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_counters_are_per_sender() {
        let mut packet = Packet::new(1, 8_192, 0, 1_000, PacketKind::Data { src: 0, dst: 2 });
        packet.bump_attempts(0);
        packet.bump_attempts(0);
        packet.bump_attempts(1);
        assert_eq!(packet.attempts(0), 2);
        assert_eq!(packet.attempts(1), 1);
        assert_eq!(packet.attempts(2), 0);

        // a receiver copy keeps the sender's history but owns its own counters
        let mut copy = packet.clone();
        copy.bump_attempts(1);
        assert_eq!(copy.attempts(1), 2);
        assert_eq!(packet.attempts(1), 1);
    }

    #[test]
    fn ttl_counts_transmissions() {
        let mut packet = Packet::new(1, 128, 0, 1_000, PacketKind::Data { src: 0, dst: 1 });
        assert_eq!(packet.ttl, 0);
        packet.increase_ttl();
        packet.increase_ttl();
        assert_eq!(packet.ttl, 2);
    }
}
