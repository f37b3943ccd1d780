//! CSMA/CA without RTS/CTS.
//!
//! Flow of one transmission attempt:
//!
//! 1. wait until the channel is idle within the sensing range,
//! 2. count down `DIFS + backoff` while a listener process watches the
//!    channel and interrupts the countdown if it turns busy,
//! 3. on an uninterrupted countdown, occupy the own channel resource and
//!    transmit; unicast frames then hold the channel for `SIFS + ACK
//!    airtime` so the returning ACK cannot be contended away,
//! 4. on an interrupt: a countdown still inside DIFS restarts with the full
//!    backoff, a countdown inside the backoff segment freezes the remaining
//!    backoff (IEEE 802.11 style) and retries from step 1.
//!
//! The contention window doubles per retransmission attempt:
//! `CW = (CW_MIN + 1) * 2^(attempt-1) - 1`.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::NodeId;
use crate::config::SimulationConfig;
use crate::engine::{MICROS, ProcessKey, WaitOutcome};
use crate::entities::packet::{Packet, TransmissionMode};
use crate::entities::drone;
use crate::phy;
use crate::simulator::Ctx;

/// Seed offset of the per-drone MAC random stream.
const MAC_RNG_OFFSET: u64 = 5;

pub struct CsmaCa {
    rng: RefCell<StdRng>,
    enable_ack: bool,
}

impl CsmaCa {
    pub fn new(config: &SimulationConfig, id: NodeId) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(config.seed + id as u64 + MAC_RNG_OFFSET)),
            enable_ack: true,
        }
    }

    pub async fn mac_send(&self, ctx: &Ctx, id: NodeId, mut packet: Packet) {
        let attempt = packet.attempts(id).max(1);
        let contention_window = contention_window(ctx.config.cw_min, attempt);
        let mut backoff =
            self.rng.borrow_mut().gen_range(0..contention_window) as u64 * ctx.config.slot_ns();
        let mut to_wait = ctx.config.difs_ns() + backoff;
        let key = ProcessKey::MacSend {
            node: id,
            packet: packet.packet_id,
        };

        log::debug!(
            "UAV {} backs off {} ns for packet {} (attempt {})",
            id,
            backoff,
            packet.packet_id,
            attempt
        );

        while to_wait > 0 {
            wait_idle_channel(ctx, id).await;

            if packet.attempts(id) == 1 && packet.first_attempt_time.is_none() {
                // service time runs from the very first countdown
                packet.first_attempt_time = Some(ctx.clock.now());
            }

            ctx.spawn(listen(Rc::clone(ctx), id, key));
            let slot = ctx
                .registry
                .get(key)
                .expect("mac_send slot registered by packet_coming");

            match slot.interruptible_sleep(&ctx.clock, to_wait).await {
                WaitOutcome::Completed => {
                    to_wait = 0;
                    ctx.registry.finish(key);

                    let state = ctx.channel.state(id);
                    let _guard = state.request().await;
                    log::debug!(
                        "at {} UAV {} occupies the channel for packet {}",
                        ctx.clock.now(),
                        id,
                        packet.packet_id
                    );
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
                                // keep the channel so the ACK is not contended away
                                let protect = ctx.config.sifs_ns()
                                    + ctx.config.airtime(ctx.config.ack_packet_length);
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
                WaitOutcome::Interrupted { elapsed } => {
                    let remaining = to_wait.saturating_sub(elapsed);
                    if remaining > backoff {
                        // lost the channel during DIFS: restart with the full backoff
                    } else {
                        // freeze the backoff at its remaining value
                        backoff = remaining;
                    }
                    to_wait = ctx.config.difs_ns() + backoff;
                    log::debug!(
                        "at {} UAV {} countdown interrupted, {} ns left for packet {}",
                        ctx.clock.now(),
                        id,
                        to_wait,
                        packet.packet_id
                    );
                }
            }
        }
    }
}

/// `CW = (CW_MIN + 1) * 2^(attempt-1) - 1`, in slots.
pub(crate) fn contention_window(cw_min: u32, attempt: u32) -> u32 {
    let shift = (attempt - 1).min(16);
    (cw_min + 1) * (1 << shift) - 1
}

/// Poll at slot granularity until the channel turns idle.
async fn wait_idle_channel(ctx: &Ctx, id: NodeId) {
    while !ctx.channel_idle(id) {
        ctx.clock.sleep(ctx.config.slot_ns()).await;
    }
}

/// Watch the channel during a countdown and interrupt the sender the moment
/// it turns busy. Exits once the countdown concluded.
async fn listen(ctx: Ctx, id: NodeId, key: ProcessKey) {
    while !ctx.registry.is_finished(key) {
        if !ctx.channel_idle(id) {
            ctx.registry.interrupt(key);
            break;
        }
        ctx.clock.sleep(MICROS).await;
    }
}

/// Wait for the link-layer ACK of `packet`. On timeout, re-dispatch until
/// the retransmission budget runs out, then record the MAC delay and drop.
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
            log::debug!(
                "at {} UAV {} saw no ACK for packet {}",
                ctx.clock.now(),
                id,
                packet.packet_id
            );
            if packet.attempts(id) < ctx.config.max_retransmission_attempt {
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
                    packet.attempts(id)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_window_doubles_per_attempt() {
        assert_eq!(contention_window(31, 1), 31);
        assert_eq!(contention_window(31, 2), 63);
        assert_eq!(contention_window(31, 3), 127);
        assert_eq!(contention_window(1, 1), 1);
    }
}
