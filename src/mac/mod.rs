//! Medium access control.
//!
//! Two protocols share one entry point: [`mac_send`] dispatches a packet
//! handed over by `packet_coming` to the protocol installed on the drone.
//! Both variants stamp `first_attempt_time` exactly once per packet, spawn a
//! `wait_ack` process for unicast frames, and hand timed-out packets back to
//! the drone for re-dispatch until the retransmission budget is exhausted.

pub mod csma_ca;
pub mod pure_aloha;

pub use csma_ca::CsmaCa;
pub use pure_aloha::PureAloha;

use crate::NodeId;
use crate::config::{MacProtocolKind, SimulationConfig};
use crate::entities::Packet;
use crate::simulator::Ctx;

pub enum MacProtocol {
    CsmaCa(CsmaCa),
    PureAloha(PureAloha),
}

impl MacProtocol {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        match config.mac_protocol {
            MacProtocolKind::CsmaCa => MacProtocol::CsmaCa(CsmaCa::new(config, id)),
            MacProtocolKind::PureAloha => MacProtocol::PureAloha(PureAloha::new(config, id)),
        }
    }
}

/// Run one MAC transmission attempt for `packet` on drone `id`.
pub async fn mac_send(ctx: Ctx, id: NodeId, packet: Packet) {
    let drone = ctx.drone(id);
    match &drone.mac {
        MacProtocol::CsmaCa(mac) => mac.mac_send(&ctx, id, packet).await,
        MacProtocol::PureAloha(mac) => mac.mac_send(&ctx, id, packet).await,
    }
}
