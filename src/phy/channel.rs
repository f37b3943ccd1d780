//! Shared wireless channel.
//!
//! One inbox per receiver (frames in flight toward that drone) plus one
//! exclusive `channel_states` resource per drone modeling "this drone is on
//! air". Carrier sensing asks whether any other drone inside the sensing
//! radius currently holds its resource.

use std::rc::Rc;

use crate::NodeId;
use crate::engine::{Resource, SimTime, Store};
use crate::entities::Packet;
use crate::util::Vector3;

/// A packet copy in flight toward one receiver.
#[derive(Clone)]
pub struct Frame {
    pub packet: Packet,
    pub transmitter: NodeId,
    pub start_time: SimTime,
    pub airtime: SimTime,
}

impl Frame {
    pub fn end_time(&self) -> SimTime {
        self.start_time + self.airtime
    }
}

pub struct Channel {
    inboxes: Vec<Rc<Store<Frame>>>,
    channel_states: Vec<Rc<Resource>>,
}

impl Channel {
    pub fn new(n_drones: usize) -> Self {
        Self {
            inboxes: (0..n_drones).map(|_| Rc::new(Store::new())).collect(),
            channel_states: (0..n_drones).map(|_| Rc::new(Resource::new())).collect(),
        }
    }

    pub fn inbox(&self, id: NodeId) -> Rc<Store<Frame>> {
        Rc::clone(&self.inboxes[id])
    }

    /// The exclusive "on air" resource of `id`.
    pub fn state(&self, id: NodeId) -> Rc<Resource> {
        Rc::clone(&self.channel_states[id])
    }

    pub fn unicast_put(&self, frame: Frame, dst: NodeId) {
        self.inboxes[dst].put(frame);
    }

    pub fn broadcast_put(&self, frame: Frame, sender: NodeId) {
        for (id, inbox) in self.inboxes.iter().enumerate() {
            if id != sender {
                inbox.put(frame.clone());
            }
        }
    }

    pub fn multicast_put(&self, frame: Frame, targets: &[NodeId]) {
        for &id in targets {
            self.inboxes[id].put(frame.clone());
        }
    }

    /// True when `sender` may transmit: no other drone within
    /// `sensing_range` holds its channel resource.
    pub fn check_channel_availability(
        &self,
        sender: NodeId,
        positions: &[Vector3],
        sensing_range: f64,
    ) -> bool {
        for (id, state) in self.channel_states.iter().enumerate() {
            if id != sender
                && state.occupied()
                && positions[sender].distance_to(&positions[id]) < sensing_range
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PacketKind;

    fn frame(id: u64) -> Frame {
        Frame {
            packet: Packet::new(id, 128, 0, 1_000, PacketKind::Data { src: 0, dst: 1 }),
            transmitter: 0,
            start_time: 0,
            airtime: 128_000,
        }
    }

    #[test]
    fn broadcast_skips_the_transmitter() {
        let channel = Channel::new(3);
        channel.broadcast_put(frame(1), 0);
        assert!(channel.inbox(0).is_empty());
        assert_eq!(channel.inbox(1).len(), 1);
        assert_eq!(channel.inbox(2).len(), 1);
    }

    #[test]
    fn sensing_only_sees_holders_in_range() {
        let channel = Channel::new(3);
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(100.0, 0.0, 0.0),
            Vector3::new(1_000.0, 0.0, 0.0),
        ];
        // nobody on air: idle everywhere
        assert!(channel.check_channel_availability(0, &positions, 300.0));

        // drone 2 on air but out of range of drone 0
        channel.state(2).set_held_for_test(true);
        assert!(channel.check_channel_availability(0, &positions, 300.0));
        // drone 1 on air, in range of both 0 and 2
        channel.state(1).set_held_for_test(true);
        assert!(!channel.check_channel_availability(0, &positions, 300.0));
        assert!(!channel.check_channel_availability(2, &positions, 300.0));
        // a drone's own occupancy never blocks itself
        channel.state(2).set_held_for_test(false);
        assert!(channel.check_channel_availability(1, &positions, 1.0));
    }
}
