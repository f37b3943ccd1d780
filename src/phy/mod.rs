//! Physical layer: frame emission onto the shared channel.
//!
//! The PHY deposits a frame into the target inboxes at transmission start
//! and debits the transmitter's radio energy. The caller (MAC or a direct
//! broadcaster) is responsible for sleeping the transmission delay *after*
//! the deposit so receivers observe the frame for its whole airtime window.

pub mod channel;
pub mod fading;

pub use channel::{Channel, Frame};

use crate::NodeId;
use crate::entities::Packet;
use crate::simulator::SimContext;

fn make_frame(ctx: &SimContext, sender: NodeId, packet: Packet) -> Frame {
    let airtime = ctx.config.airtime(packet.packet_length);
    debit_tx_energy(ctx, sender, airtime);
    Frame {
        packet,
        transmitter: sender,
        start_time: ctx.clock.now(),
        airtime,
    }
}

fn debit_tx_energy(ctx: &SimContext, sender: NodeId, airtime: u64) {
    let drone = ctx.drone(sender);
    let joules = ctx.config.transmit_power_w * airtime as f64 / 1e9;
    drone
        .residual_energy
        .set(drone.residual_energy.get() - joules);
}

/// Deliver a copy of `packet` to `dst`'s inbox.
pub fn unicast(ctx: &SimContext, sender: NodeId, packet: Packet, dst: NodeId) {
    let frame = make_frame(ctx, sender, packet);
    log::trace!(
        "at {} UAV {} unicasts packet {} to UAV {}",
        ctx.clock.now(),
        sender,
        frame.packet.packet_id,
        dst
    );
    ctx.channel.unicast_put(frame, dst);
}

/// Deliver a copy of `packet` to every other drone's inbox.
pub fn broadcast(ctx: &SimContext, sender: NodeId, packet: Packet) {
    let frame = make_frame(ctx, sender, packet);
    log::trace!(
        "at {} UAV {} broadcasts packet {}",
        ctx.clock.now(),
        sender,
        frame.packet.packet_id
    );
    ctx.channel.broadcast_put(frame, sender);
}

/// Deliver a copy of `packet` to a selected set of inboxes.
pub fn multicast(ctx: &SimContext, sender: NodeId, packet: Packet, targets: &[NodeId]) {
    let frame = make_frame(ctx, sender, packet);
    log::trace!(
        "at {} UAV {} multicasts packet {} to {:?}",
        ctx.clock.now(),
        sender,
        frame.packet.packet_id,
        targets
    );
    ctx.channel.multicast_put(frame, targets);
}
