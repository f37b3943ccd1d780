//! The DSDV routing table.
//!
//! One row per known destination: next hop, hop count, destination
//! sequence number, refresh time. The update rule prefers strictly greater
//! sequence numbers, then fewer hops on equal sequence; an equal
//! advertisement from the installed next hop only refreshes the timestamp.
//! A stored sequence number therefore never decreases.

use std::collections::BTreeMap;

use crate::NodeId;
use crate::engine::{SECONDS, SimTime};
use crate::entities::packet::RouteSnapshot;

/// A row expires after this long without refresh.
pub const ENTRY_LIFETIME: SimTime = 2 * SECONDS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub next_hop: NodeId,
    pub hop_count: u32,
    pub seq: u64,
    pub updated_at: SimTime,
}

pub struct DsdvRoutingTable {
    own: NodeId,
    entries: BTreeMap<NodeId, RouteEntry>,
}

impl DsdvRoutingTable {
    pub fn new(own: NodeId) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            own,
            RouteEntry {
                next_hop: own,
                hop_count: 0,
                seq: 0,
                updated_at: 0,
            },
        );
        Self { own, entries }
    }

    /// Advance the own sequence number by 2 (even numbers mark entries
    /// originated by the destination itself).
    pub fn bump_own_seq(&mut self) {
        let own = self
            .entries
            .get_mut(&self.own)
            .expect("own entry always present");
        own.seq += 2;
    }

    pub fn own_seq(&self) -> u64 {
        self.entries[&self.own].seq
    }

    /// Installed next hop toward `dst`, if any.
    pub fn lookup(&self, dst: NodeId) -> Option<NodeId> {
        if dst == self.own {
            return None;
        }
        self.entries.get(&dst).map(|entry| entry.next_hop)
    }

    pub fn entry(&self, dst: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&dst)
    }

    /// The table as carried inside a hello packet.
    pub fn snapshot(&self) -> BTreeMap<NodeId, RouteSnapshot> {
        self.entries
            .iter()
            .map(|(&dst, entry)| {
                (
                    dst,
                    RouteSnapshot {
                        next_hop: entry.next_hop,
                        hop_count: entry.hop_count,
                        seq: entry.seq,
                    },
                )
            })
            .collect()
    }

    /// Apply the destination-sequenced update rule to a neighbor's full
    /// table advertisement.
    pub fn update_from_hello(
        &mut self,
        src: NodeId,
        table: &BTreeMap<NodeId, RouteSnapshot>,
        now: SimTime,
    ) {
        for (&dst, snapshot) in table {
            if dst == self.own {
                continue;
            }
            let candidate = RouteEntry {
                next_hop: src,
                hop_count: snapshot.hop_count + 1,
                seq: snapshot.seq,
                updated_at: now,
            };
            match self.entries.get_mut(&dst) {
                None => {
                    self.entries.insert(dst, candidate);
                }
                Some(current) => {
                    let newer = candidate.seq > current.seq;
                    let shorter =
                        candidate.seq == current.seq && candidate.hop_count < current.hop_count;
                    if newer || shorter {
                        *current = candidate;
                    } else if candidate.seq == current.seq && candidate.next_hop == current.next_hop
                    {
                        // same route re-advertised: keep it alive
                        current.updated_at = now;
                    }
                }
            }
        }
    }

    /// Remove rows that went [`ENTRY_LIFETIME`] without refresh. Returns
    /// true when anything was removed (which triggers an update broadcast).
    pub fn purge(&mut self, now: SimTime) -> bool {
        let own = self.own;
        let before = self.entries.len();
        self.entries
            .retain(|&dst, entry| dst == own || entry.updated_at + ENTRY_LIFETIME >= now);
        self.entries.len() != before
    }
}
