//! Bookkeeping for cancellable processes.
//!
//! The MAC spawns two kinds of cancellable waits per packet: the
//! DIFS+backoff countdown (`MacSend`) and the ACK wait (`WaitAck`). Each is
//! registered under a typed key, and carries a one-shot interrupt signal plus
//! a `finished` flag. The contract:
//!
//! - a slot is interrupted only while `finished == false`,
//! - after the wait concludes, normally or through an interrupt,
//!   `finished == true`,
//! - interrupting a finished or unknown key is a no-op.
//!
//! Re-registering a key (retransmissions reuse the packet id) installs a
//! fresh slot, discarding any stale interrupt.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;

use super::clock::{SimClock, SimTime};
use crate::{NodeId, PacketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKey {
    /// DIFS+backoff countdown of `packet` at `node`.
    MacSend { node: NodeId, packet: PacketId },
    /// ACK wait for `packet` at `node`.
    WaitAck { node: NodeId, packet: PacketId },
}

/// Result of an interruptible wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay elapsed.
    Completed,
    /// The wait was interrupted after `elapsed` virtual time.
    Interrupted { elapsed: SimTime },
}

pub struct ProcessSlot {
    interrupt: Signal<NoopRawMutex, ()>,
    finished: Cell<bool>,
}

impl ProcessSlot {
    fn new() -> Self {
        Self {
            interrupt: Signal::new(),
            finished: Cell::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    pub fn mark_finished(&self) {
        self.finished.set(true);
    }

    /// Deliver an interrupt to whatever wait currently races this slot.
    pub fn interrupt(&self) {
        self.interrupt.signal(());
    }

    /// Sleep for `delay`, racing the slot's interrupt signal. An interrupt
    /// wins with the virtual time already spent waiting.
    pub async fn interruptible_sleep(&self, clock: &SimClock, delay: SimTime) -> WaitOutcome {
        let started = clock.now();
        match select(clock.sleep(delay), self.interrupt.wait()).await {
            Either::First(()) => WaitOutcome::Completed,
            Either::Second(()) => WaitOutcome::Interrupted {
                elapsed: clock.now() - started,
            },
        }
    }
}

pub struct ProcessRegistry {
    slots: RefCell<HashMap<ProcessKey, Rc<ProcessSlot>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
        }
    }

    /// Install a fresh slot for `key`, replacing any previous registration.
    pub fn register(&self, key: ProcessKey) -> Rc<ProcessSlot> {
        let slot = Rc::new(ProcessSlot::new());
        self.slots.borrow_mut().insert(key, Rc::clone(&slot));
        slot
    }

    pub fn get(&self, key: ProcessKey) -> Option<Rc<ProcessSlot>> {
        self.slots.borrow().get(&key).cloned()
    }

    pub fn finish(&self, key: ProcessKey) {
        if let Some(slot) = self.get(key) {
            slot.mark_finished();
        }
    }

    /// Unknown keys count as finished.
    pub fn is_finished(&self, key: ProcessKey) -> bool {
        self.get(key).map(|slot| slot.is_finished()).unwrap_or(true)
    }

    /// Interrupt the process registered under `key` unless it has already
    /// finished.
    pub fn interrupt(&self, key: ProcessKey) {
        if let Some(slot) = self.get(key) {
            if !slot.is_finished() {
                slot.interrupt();
            }
        }
    }

    /// True when every registered slot has concluded. Checked at the end of
    /// a simulation.
    pub fn all_finished(&self) -> bool {
        self.slots.borrow().values().all(|slot| slot.is_finished())
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimExecutor;

    #[test]
    fn interrupt_reports_elapsed_wait() {
        let mut exec = SimExecutor::new();
        let clock = exec.clock();
        let registry = Rc::new(ProcessRegistry::new());
        let key = ProcessKey::MacSend { node: 0, packet: 7 };
        let slot = registry.register(key);
        let outcome = Rc::new(Cell::new(None));

        {
            let clock = Rc::clone(&clock);
            let slot = Rc::clone(&slot);
            let outcome = Rc::clone(&outcome);
            exec.spawn(async move {
                let result = slot.interruptible_sleep(&clock, 1_000).await;
                outcome.set(Some(result));
            });
        }
        {
            let clock = Rc::clone(&clock);
            let registry = Rc::clone(&registry);
            exec.spawn(async move {
                clock.sleep(400).await;
                registry.interrupt(key);
            });
        }

        exec.run_until(10_000);
        assert_eq!(
            outcome.get(),
            Some(WaitOutcome::Interrupted { elapsed: 400 })
        );
    }

    #[test]
    fn finished_slots_ignore_interrupts() {
        let mut exec = SimExecutor::new();
        let clock = exec.clock();
        let registry = Rc::new(ProcessRegistry::new());
        let key = ProcessKey::WaitAck { node: 3, packet: 9 };
        let slot = registry.register(key);
        registry.finish(key);
        registry.interrupt(key); // no-op

        let outcome = Rc::new(Cell::new(None));
        {
            let clock = Rc::clone(&clock);
            let outcome = Rc::clone(&outcome);
            exec.spawn(async move {
                let result = slot.interruptible_sleep(&clock, 200).await;
                outcome.set(Some(result));
            });
        }

        exec.run_until(10_000);
        assert_eq!(outcome.get(), Some(WaitOutcome::Completed));
        assert!(registry.all_finished());
    }

    #[test]
    fn reregistering_discards_stale_interrupts() {
        let registry = ProcessRegistry::new();
        let key = ProcessKey::MacSend { node: 1, packet: 1 };
        registry.register(key);
        registry.interrupt(key); // latched on the old slot
        let fresh = registry.register(key);
        assert!(!fresh.is_finished());
        assert!(!registry.is_finished(key));
    }
}
