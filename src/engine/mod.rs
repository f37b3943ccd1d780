//! Deterministic single-threaded virtual-time engine.
//!
//! The unit of scheduling is a *process*: an async task spawned onto one
//! `futures` `LocalPool` and suspended on virtual timers ([`clock::Sleep`]),
//! mailboxes ([`store::Store`]), or exclusive resources
//! ([`resource::Resource`]). Between suspension points a process runs
//! atomically with respect to every other process.
//!
//! Ordering rules:
//! - virtual time is monotone non-decreasing,
//! - timers armed at the same instant fire in FIFO arm order,
//! - zero-length timeouts are legal and run in the same instant after the
//!   currently runnable processes yield.
//!
//! Cancellable operations (MAC backoff countdowns, ACK waits) are tracked in
//! a [`process::ProcessRegistry`] under typed keys and interrupted through
//! one-shot signals; an interrupted wait reports the virtual time already
//! spent waiting.

pub mod clock;
pub mod executor;
pub mod process;
pub mod resource;
pub mod store;

pub use clock::{MICROS, MILLIS, SECONDS, SimClock, SimTime};
pub use executor::SimExecutor;
pub use process::{ProcessKey, ProcessRegistry, ProcessSlot, WaitOutcome};
pub use resource::{Resource, ResourceGuard};
pub use store::Store;
