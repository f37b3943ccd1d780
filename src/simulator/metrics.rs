//! Network performance accounting.
//!
//! Tracks, over one run: packet delivery ratio, end-to-end delay,
//! throughput, hop counts, MAC service delays, collision and queue-overflow
//! counts. Unicast protocols account per destination
//! (`datapacket_arrived`); PrudentCaster accounts per (receiver, packet)
//! since every broadcast has many intended receivers.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::SimTime;
use crate::{NodeId, PacketId};

#[derive(Default)]
pub struct Metrics {
    pub control_packet_num: u64,
    pub datapacket_generated_num: u64,
    pub datapacket_generated: BTreeSet<PacketId>,
    pub datapacket_arrived: BTreeSet<PacketId>,
    /// End-to-end latency per (receiver, packet), nanoseconds.
    pub deliver_time: BTreeMap<(NodeId, PacketId), SimTime>,
    /// Bits per second per (receiver, packet).
    pub throughput: BTreeMap<(NodeId, PacketId), f64>,
    pub hop_cnt: BTreeMap<(NodeId, PacketId), u32>,
    /// MAC service delay (first attempt to ACK or drop), milliseconds.
    pub mac_delay_ms: Vec<f64>,
    pub collision_num: u64,
    pub queue_overflow_num: u64,
    /// Per-receiver arrived sets for broadcast protocols.
    pub b_datapacket_arrived: BTreeMap<NodeId, BTreeSet<PacketId>>,
    /// Data broadcasts put on air (envelopes plus aggregated items).
    pub b_datapacket_sent: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a unicast delivery at its destination. Idempotent: duplicate
    /// receptions of the same packet change nothing.
    pub fn record_delivery(
        &mut self,
        receiver: NodeId,
        packet_id: PacketId,
        latency: SimTime,
        data_bits: u64,
        hop_count: u32,
    ) {
        if !self.datapacket_arrived.insert(packet_id) {
            return;
        }
        self.deliver_time.insert((receiver, packet_id), latency);
        self.throughput.insert(
            (receiver, packet_id),
            data_bits as f64 / (latency as f64 / 1e9),
        );
        self.hop_cnt.insert((receiver, packet_id), hop_count);
    }

    /// Record a broadcast item arriving at one receiver. Idempotent per
    /// (receiver, packet).
    pub fn record_broadcast_delivery(
        &mut self,
        receiver: NodeId,
        packet_id: PacketId,
        latency: SimTime,
        data_bits: u64,
        hop_count: u32,
    ) {
        let arrived = self.b_datapacket_arrived.entry(receiver).or_default();
        if !arrived.insert(packet_id) {
            return;
        }
        self.deliver_time.insert((receiver, packet_id), latency);
        self.throughput.insert(
            (receiver, packet_id),
            data_bits as f64 / (latency as f64 / 1e9),
        );
        self.hop_cnt.insert((receiver, packet_id), hop_count);
    }

    pub fn summary(&self, broadcast_mode: bool) -> MetricsSummary {
        let mean =
            |values: &mut dyn Iterator<Item = f64>| -> f64 {
                let collected: Vec<f64> = values.collect();
                if collected.is_empty() {
                    0.0
                } else {
                    collected.iter().sum::<f64>() / collected.len() as f64
                }
            };

        let e2e_delay_ms = mean(&mut self.deliver_time.values().map(|&ns| ns as f64 / 1e6));
        let throughput_kbps = mean(&mut self.throughput.values().map(|&bps| bps / 1e3));
        let hop_count = mean(&mut self.hop_cnt.values().map(|&h| h as f64));

        let (arrived, receiver_count, pdr) = if broadcast_mode {
            let arrived: u64 = self
                .b_datapacket_arrived
                .values()
                .map(|set| set.len() as u64)
                .sum();
            let receivers = self.b_datapacket_arrived.len();
            let pdr = if self.datapacket_generated_num > 0 && receivers > 0 {
                arrived as f64 / self.datapacket_generated_num as f64 / receivers as f64 * 100.0
            } else {
                0.0
            };
            (arrived, receivers, pdr)
        } else {
            let arrived = self.datapacket_arrived.len() as u64;
            let pdr = if self.datapacket_generated_num > 0 {
                arrived as f64 / self.datapacket_generated_num as f64 * 100.0
            } else {
                0.0
            };
            (arrived, 0, pdr)
        };

        MetricsSummary {
            generated: self.datapacket_generated_num,
            sent: self.b_datapacket_sent,
            arrived,
            receiver_count,
            pdr,
            e2e_delay_ms,
            throughput_kbps,
            hop_count,
            collisions: self.collision_num,
            broadcast_mode,
        }
    }
}

/// Aggregated results written to `simulation_result.txt`.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub generated: u64,
    pub sent: u64,
    pub arrived: u64,
    pub receiver_count: usize,
    pub pdr: f64,
    pub e2e_delay_ms: f64,
    pub throughput_kbps: f64,
    pub hop_count: f64,
    pub collisions: u64,
    pub broadcast_mode: bool,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Totally generated: {} data packets", self.generated)?;
        if self.broadcast_mode {
            writeln!(f, "Totally sent: {} data packets", self.sent)?;
            writeln!(f, "Totally receive: {} data packets", self.arrived)?;
            writeln!(f, "Totally drone num: {}", self.receiver_count)?;
        } else {
            writeln!(f, "Totally receive: {} data packets", self.arrived)?;
        }
        writeln!(f, "Packet delivery ratio is: {} %", self.pdr)?;
        writeln!(f, "Average end-to-end delay is: {} ms", self.e2e_delay_ms)?;
        writeln!(f, "Average throughput is: {} Kbps", self.throughput_kbps)?;
        writeln!(f, "Average hop count is: {}", self.hop_count)?;
        writeln!(f, "Collision num is: {}", self.collisions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_unicast_delivery_is_idempotent() {
        let mut metrics = Metrics::new();
        metrics.datapacket_generated_num = 1;
        metrics.record_delivery(2, 7, 1_000_000, 8_192, 1);
        metrics.record_delivery(2, 7, 9_999_999, 8_192, 3);
        assert_eq!(metrics.datapacket_arrived.len(), 1);
        assert_eq!(metrics.deliver_time[&(2, 7)], 1_000_000);
        assert_eq!(metrics.hop_cnt[&(2, 7)], 1);
        assert_eq!(metrics.summary(false).pdr, 100.0);
    }

    #[test]
    fn broadcast_pdr_divides_by_receiver_count() {
        let mut metrics = Metrics::new();
        metrics.datapacket_generated_num = 2;
        // two receivers, each got one of the two packets
        metrics.record_broadcast_delivery(0, 1, 1_000, 8_192, 1);
        metrics.record_broadcast_delivery(1, 2, 1_000, 8_192, 1);
        let summary = metrics.summary(true);
        assert_eq!(summary.arrived, 2);
        assert_eq!(summary.receiver_count, 2);
        assert_eq!(summary.pdr, 50.0);
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let metrics = Metrics::new();
        let summary = metrics.summary(false);
        assert_eq!(summary.pdr, 0.0);
        assert_eq!(summary.e2e_delay_ms, 0.0);
        assert_eq!(summary.hop_count, 0.0);
    }
}
