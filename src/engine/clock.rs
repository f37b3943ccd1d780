//! Virtual clock and timer queue.
//!
//! Timers are kept in a min-heap keyed by `(deadline, sequence)`. The
//! sequence number is assigned when the timer is armed, so two timers due at
//! the same virtual instant fire in the order they were created. The
//! executor pops one due timer at a time and runs all woken processes to
//! their next suspension before popping the next, which preserves FIFO
//! semantics for zero-length timeouts armed while handling an event.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Virtual simulation time in nanoseconds.
pub type SimTime = u64;

/// One microsecond in [`SimTime`] units.
pub const MICROS: SimTime = 1_000;
/// One millisecond in [`SimTime`] units.
pub const MILLIS: SimTime = 1_000_000;
/// One second in [`SimTime`] units.
pub const SECONDS: SimTime = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed,
    Fired,
    Cancelled,
}

/// State shared between an armed heap slot and its [`Sleep`] future.
pub(crate) struct TimerShared {
    state: Cell<TimerState>,
    waker: RefCell<Option<Waker>>,
}

impl TimerShared {
    /// Mark the timer as elapsed and wake the waiting process, if any.
    pub(crate) fn fire(&self) {
        self.state.set(TimerState::Fired);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

struct TimerSlot {
    deadline: SimTime,
    seq: u64,
    shared: Rc<TimerShared>,
}

impl PartialEq for TimerSlot {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerSlot {}

impl PartialOrd for TimerSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// The global virtual clock: current instant plus the queue of armed timers.
pub struct SimClock {
    now: Cell<SimTime>,
    seq: Cell<u64>,
    queue: RefCell<BinaryHeap<Reverse<TimerSlot>>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            seq: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
        }
    }

    /// Current virtual instant.
    pub fn now(&self) -> SimTime {
        self.now.get()
    }

    /// Arm a timer `delay` from now. The timer is registered immediately,
    /// not on first poll, so arm order defines same-instant fire order.
    pub fn sleep(&self, delay: SimTime) -> Sleep {
        self.sleep_until(self.now.get() + delay)
    }

    /// Arm a timer for an absolute deadline. A deadline in the past fires at
    /// the current instant.
    pub fn sleep_until(&self, deadline: SimTime) -> Sleep {
        let deadline = deadline.max(self.now.get());
        let shared = Rc::new(TimerShared {
            state: Cell::new(TimerState::Armed),
            waker: RefCell::new(None),
        });
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.queue.borrow_mut().push(Reverse(TimerSlot {
            deadline,
            seq,
            shared: Rc::clone(&shared),
        }));
        Sleep { shared }
    }

    pub(crate) fn set_now(&self, t: SimTime) {
        debug_assert!(t >= self.now.get(), "virtual time must not run backwards");
        self.now.set(t);
    }

    /// Pop the earliest armed timer due at or before `horizon`, discarding
    /// cancelled slots along the way.
    pub(crate) fn pop_due(&self, horizon: SimTime) -> Option<(SimTime, Rc<TimerShared>)> {
        let mut queue = self.queue.borrow_mut();
        loop {
            let (deadline, cancelled) = match queue.peek() {
                None => return None,
                Some(Reverse(slot)) => (
                    slot.deadline,
                    slot.shared.state.get() == TimerState::Cancelled,
                ),
            };
            if cancelled {
                queue.pop();
                continue;
            }
            if deadline > horizon {
                return None;
            }
            let Reverse(slot) = queue.pop().expect("peeked slot vanished");
            return Some((slot.deadline, slot.shared));
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Future resolving when its timer fires. Dropping it cancels the timer.
pub struct Sleep {
    shared: Rc<TimerShared>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.shared.state.get() {
            TimerState::Fired => Poll::Ready(()),
            _ => {
                *self.shared.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if self.shared.state.get() == TimerState::Armed {
            self.shared.state.set(TimerState::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_pop_in_deadline_then_arm_order() {
        let clock = SimClock::new();
        let _a = clock.sleep(200);
        let _b = clock.sleep(100);
        let _c = clock.sleep(100);

        let (d1, _) = clock.pop_due(SimTime::MAX).unwrap();
        assert_eq!(d1, 100);
        let (d2, _) = clock.pop_due(SimTime::MAX).unwrap();
        assert_eq!(d2, 100);
        let (d3, _) = clock.pop_due(SimTime::MAX).unwrap();
        assert_eq!(d3, 200);
        assert!(clock.pop_due(SimTime::MAX).is_none());
    }

    #[test]
    fn dropped_sleep_is_discarded() {
        let clock = SimClock::new();
        let a = clock.sleep(50);
        let _b = clock.sleep(80);
        drop(a);
        let (deadline, _) = clock.pop_due(SimTime::MAX).unwrap();
        assert_eq!(deadline, 80);
    }

    #[test]
    fn pop_due_respects_horizon() {
        let clock = SimClock::new();
        let _a = clock.sleep(500);
        assert!(clock.pop_due(400).is_none());
        assert!(clock.pop_due(500).is_some());
    }
}
