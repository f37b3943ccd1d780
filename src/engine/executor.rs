//! Single-threaded executor driving processes over virtual time.
//!
//! The run loop alternates two phases: run every runnable process until it
//! suspends (`run_until_stalled`), then pop the single earliest due timer,
//! advance the clock to its deadline, and fire it. Firing one timer at a
//! time keeps same-instant events in FIFO order even when handling one event
//! arms new zero-length timeouts.

use std::future::Future;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;

use super::clock::{SimClock, SimTime};

pub struct SimExecutor {
    pool: LocalPool,
    clock: Rc<SimClock>,
}

impl SimExecutor {
    pub fn new() -> Self {
        Self {
            pool: LocalPool::new(),
            clock: Rc::new(SimClock::new()),
        }
    }

    pub fn clock(&self) -> Rc<SimClock> {
        Rc::clone(&self.clock)
    }

    pub fn spawner(&self) -> LocalSpawner {
        self.pool.spawner()
    }

    /// Spawn a process at the current instant.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.pool
            .spawner()
            .spawn_local(future)
            .expect("spawn on a stopped executor");
    }

    /// Drive the simulation until `horizon` (inclusive). Returns when every
    /// process is suspended past the horizon or no armed timer remains.
    pub fn run_until(&mut self, horizon: SimTime) {
        loop {
            self.pool.run_until_stalled();
            match self.clock.pop_due(horizon) {
                Some((deadline, timer)) => {
                    self.clock.set_now(deadline);
                    timer.fire();
                }
                None => break,
            }
        }
        if self.clock.now() < horizon {
            self.clock.set_now(horizon);
        }
    }
}

impl Default for SimExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn equal_instant_events_run_in_arm_order() {
        let mut exec = SimExecutor::new();
        let clock = exec.clock();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in 0..3u32 {
            let clock = Rc::clone(&clock);
            let order = Rc::clone(&order);
            exec.spawn(async move {
                clock.sleep(1000).await;
                order.borrow_mut().push(tag);
            });
        }

        exec.run_until(10_000);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(clock.now(), 10_000);
    }

    #[test]
    fn zero_timeout_runs_in_same_instant_after_current_yields() {
        let mut exec = SimExecutor::new();
        let clock = exec.clock();
        let order = Rc::new(RefCell::new(Vec::new()));

        {
            let clock = Rc::clone(&clock);
            let order = Rc::clone(&order);
            exec.spawn(async move {
                clock.sleep(500).await;
                order.borrow_mut().push("first");
                clock.sleep(0).await;
                assert_eq!(clock.now(), 500);
                order.borrow_mut().push("zero");
            });
        }
        {
            let clock = Rc::clone(&clock);
            let order = Rc::clone(&order);
            exec.spawn(async move {
                clock.sleep(500).await;
                order.borrow_mut().push("second");
            });
        }

        exec.run_until(1_000);
        // the zero-length timeout yields to the other process armed earlier
        assert_eq!(*order.borrow(), vec!["first", "second", "zero"]);
    }

    #[test]
    fn nested_spawns_advance_time_monotonically() {
        let mut exec = SimExecutor::new();
        let clock = exec.clock();
        let spawner = exec.spawner();
        let seen = Rc::new(RefCell::new(Vec::new()));

        {
            let clock = Rc::clone(&clock);
            let seen = Rc::clone(&seen);
            exec.spawn(async move {
                clock.sleep(100).await;
                let inner_clock = Rc::clone(&clock);
                let inner_seen = Rc::clone(&seen);
                spawner
                    .spawn_local(async move {
                        inner_clock.sleep(100).await;
                        inner_seen.borrow_mut().push(inner_clock.now());
                    })
                    .unwrap();
                clock.sleep(300).await;
                seen.borrow_mut().push(clock.now());
            });
        }

        exec.run_until(1_000);
        assert_eq!(*seen.borrow(), vec![200, 400]);
    }
}
