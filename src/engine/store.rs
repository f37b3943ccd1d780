//! FIFO mailbox with non-suspending `put` and suspending `get`.
//!
//! Used for the per-receiver channel inboxes: the PHY deposits frames
//! without yielding (so a transmission call and its airtime timeout stay in
//! the same instant), while each drone's receive process suspends on `get`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

pub struct Store<T> {
    items: RefCell<VecDeque<T>>,
    waiters: RefCell<VecDeque<Waker>>,
}

impl<T> Store<T> {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(VecDeque::new()),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Deposit an item and wake the oldest waiting getter.
    pub fn put(&self, item: T) {
        self.items.borrow_mut().push_back(item);
        if let Some(waker) = self.waiters.borrow_mut().pop_front() {
            waker.wake();
        }
    }

    /// Suspend until an item is available, then take it.
    pub fn get(&self) -> Get<'_, T> {
        Get { store: self }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Get<'a, T> {
    store: &'a Store<T>,
}

impl<T> Future for Get<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(item) = self.store.items.borrow_mut().pop_front() {
            return Poll::Ready(item);
        }
        self.store.waiters.borrow_mut().push_back(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimExecutor;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn items_drain_in_fifo_order() {
        let mut exec = SimExecutor::new();
        let store: Rc<Store<u32>> = Rc::new(Store::new());
        let seen = Rc::new(StdRefCell::new(Vec::new()));

        store.put(1);
        store.put(2);

        {
            let store = Rc::clone(&store);
            let seen = Rc::clone(&seen);
            exec.spawn(async move {
                for _ in 0..3 {
                    let item = store.get().await;
                    seen.borrow_mut().push(item);
                }
            });
        }
        {
            let store = Rc::clone(&store);
            let clock = exec.clock();
            exec.spawn(async move {
                clock.sleep(100).await;
                store.put(3);
            });
        }

        exec.run_until(1_000);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }
}
