//! Simulated entities: packets and drones.

pub mod drone;
pub mod packet;

pub use drone::{Drone, InFlight};
pub use packet::{Packet, PacketKind, PrudentItem, RouteSnapshot, TransmissionMode, VfStage};
