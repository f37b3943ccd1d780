//! Pure ALOHA.
//!
//! No carrier sensing and no backoff before the first transmission: a
//! packet goes on air after a vanishing turnaround delay. Collisions are
//! discovered through the missing ACK; the sender then waits a random
//! multiple of 500 us, growing with the attempt count, before re-dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::NodeId;
use crate::config::SimulationConfig;
use crate::engine::{MICROS, ProcessKey, SimTime, WaitOutcome};
use crate::entities::drone;
use crate::entities::packet::{Packet, TransmissionMode};
use crate::phy;
use crate::simulator::Ctx;

/// Seed offset of the per-drone MAC random stream.
const MAC_RNG_OFFSET: u64 = 5;
/// Turnaround before the frame hits the air: 0.01 us.
const TRANSMIT_DELAY: SimTime = 10;
/// Unit of the post-timeout random wait.
const RETRY_WAIT_UNIT: SimTime = 500 * MICROS;

pub struct PureAloha {
    rng: RefCell<StdRng>,
    enable_ack: bool,
}

impl PureAloha {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(config.seed + id as u64 + MAC_RNG_OFFSET)),
            enable_ack: true,
        }
    }

    pub async fn mac_send(&self, ctx: &Ctx, id: NodeId, mut packet: Packet) {
        ctx.clock.sleep(TRANSMIT_DELAY).await;

        if packet.attempts(id) == 1 && packet.first_attempt_time.is_none() {
            packet.first_attempt_time = Some(ctx.clock.now());
        }
        let key = ProcessKey::MacSend {
            node: id,
            packet: packet.packet_id,
        };
        ctx.registry.finish(key);
        packet.transmitting_start_time = ctx.clock.now();

        match packet.transmission_mode {
            TransmissionMode::Unicast => {
                let Some(next_hop) = packet.next_hop_id else {
                    log::error!(
                        "unicast packet {} has no next hop, discarding",
                        packet.packet_id
                    );
                    return;
                };
                packet.increase_ttl();
                // the delivery call must precede the airtime timeout
                phy::unicast(ctx, id, packet.clone(), next_hop);
                ctx.clock
                    .sleep(ctx.config.airtime(packet.packet_length))
                    .await;

                if self.enable_ack {
                    let ack_key = ProcessKey::WaitAck {
                        node: id,
                        packet: packet.packet_id,
                    };
                    ctx.registry.register(ack_key);
                    ctx.spawn(wait_ack(Rc::clone(ctx), id, packet.clone()));
                    let protect =
                        ctx.config.sifs_ns() + ctx.config.airtime(ctx.config.ack_packet_length);
                    ctx.clock.sleep(protect).await;
                }
            }
            TransmissionMode::Broadcast => {
                packet.increase_ttl();
                phy::broadcast(ctx, id, packet.clone());
                ctx.clock
                    .sleep(ctx.config.airtime(packet.packet_length))
                    .await;
            }
        }
    }
}

/// ACK wait with the ALOHA retry rule: on timeout sleep `r * 500 us`,
/// `r` uniform in `[0, 2^attempt]`, then re-dispatch.
async fn wait_ack(ctx: Ctx, id: NodeId, packet: Packet) {
    let key = ProcessKey::WaitAck {
        node: id,
        packet: packet.packet_id,
    };
    let slot = ctx
        .registry
        .get(key)
        .expect("wait_ack slot registered before spawn");

    match slot
        .interruptible_sleep(&ctx.clock, ctx.config.ack_timeout_ns())
        .await
    {
        WaitOutcome::Completed => {
            ctx.registry.finish(key);
            let attempt = packet.attempts(id);
            if attempt < ctx.config.max_retransmission_attempt {
                let r = {
                    let drone = ctx.drone(id);
                    let crate::mac::MacProtocol::PureAloha(mac) = &drone.mac else {
                        unreachable!("aloha wait_ack on a non-aloha drone");
                    };
                    let bound = 1u64 << attempt.min(16);
                    mac.rng.borrow_mut().gen_range(0..=bound)
                };
                ctx.clock.sleep(r * RETRY_WAIT_UNIT).await;
                drone::packet_coming(&ctx, id, packet);
            } else {
                if let Some(first) = packet.first_attempt_time {
                    ctx.metrics
                        .borrow_mut()
                        .mac_delay_ms
                        .push((ctx.clock.now() - first) as f64 / 1e6);
                }
                log::info!(
                    "packet {} dropped after {} attempts",
                    packet.packet_id,
                    attempt
                );
            }
        }
        WaitOutcome::Interrupted { .. } => {
            log::debug!(
                "at {} UAV {} received the ACK for packet {}",
                ctx.clock.now(),
                id,
                packet.packet_id
            );
        }
    }
}
