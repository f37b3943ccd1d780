//! Neighbor table for geographic forwarding: position plus refresh time per
//! neighbor, entries expiring after a fixed lifetime.

use std::collections::BTreeMap;

use crate::NodeId;
use crate::engine::{SECONDS, SimTime};
use crate::util::Vector3;

/// A neighbor that stayed silent this long has left communication range.
pub const ENTRY_LIFETIME: SimTime = SECONDS;

pub struct GreedyNeighborTable {
    neighbors: BTreeMap<NodeId, (Vector3, SimTime)>,
}

impl GreedyNeighborTable {
    pub fn new() -> Self {
        Self {
            neighbors: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn add_neighbor(&mut self, id: NodeId, position: Vector3, now: SimTime) {
        self.neighbors.insert(id, (position, now));
    }

    pub fn position_of(&self, id: NodeId) -> Option<Vector3> {
        self.neighbors.get(&id).map(|(position, _)| *position)
    }

    /// Drop entries that outlived [`ENTRY_LIFETIME`]. Idempotent while the
    /// clock stands still.
    pub fn purge(&mut self, now: SimTime) {
        self.neighbors
            .retain(|_, (_, updated_at)| *updated_at + ENTRY_LIFETIME >= now);
    }

    /// Neighbor strictly closer to the destination than the own position,
    /// minimizing the remaining distance. `None` flags a void area.
    pub fn best_neighbor(&self, own: &Vector3, destination: &Vector3) -> Option<NodeId> {
        let mut best_distance = own.distance_to(destination);
        let mut best = None;
        for (&id, (position, _)) in &self.neighbors {
            let distance = position.distance_to(destination);
            if distance < best_distance {
                best_distance = distance;
                best = Some(id);
            }
        }
        best
    }
}

impl Default for GreedyNeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_neighbor_wins() {
        let mut table = GreedyNeighborTable::new();
        table.add_neighbor(1, Vector3::new(100.0, 0.0, 0.0), 0);
        table.add_neighbor(2, Vector3::new(200.0, 0.0, 0.0), 0);
        let own = Vector3::new(0.0, 0.0, 0.0);
        let dst = Vector3::new(300.0, 0.0, 0.0);
        assert_eq!(table.best_neighbor(&own, &dst), Some(2));
    }

    #[test]
    fn void_area_when_no_neighbor_improves() {
        let mut table = GreedyNeighborTable::new();
        table.add_neighbor(1, Vector3::new(-100.0, 0.0, 0.0), 0);
        let own = Vector3::new(0.0, 0.0, 0.0);
        let dst = Vector3::new(300.0, 0.0, 0.0);
        assert_eq!(table.best_neighbor(&own, &dst), None);
    }

    #[test]
    fn purge_drops_only_expired_entries_and_is_idempotent() {
        let mut table = GreedyNeighborTable::new();
        table.add_neighbor(1, Vector3::new(1.0, 0.0, 0.0), 0);
        table.add_neighbor(2, Vector3::new(2.0, 0.0, 0.0), ENTRY_LIFETIME);
        let now = ENTRY_LIFETIME + 1;
        table.purge(now);
        assert!(table.position_of(1).is_none());
        assert!(table.position_of(2).is_some());
        table.purge(now);
        assert!(table.position_of(2).is_some());
    }
}
