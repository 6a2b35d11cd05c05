//! A small bounded FIFO built on `Mutex` + `Condvar`.
//!
//! Three queues in this crate need slightly different failure behavior
//! on a full queue — the dispatcher's event queue drops and logs, a
//! channel's tx_queue blocks the submitter up to a timeout, and a
//! channel's rx_queue drops the reassembled block and logs — so rather
//! than hide that policy inside the queue, [`BoundedQueue`] exposes both
//! a non-blocking and a bounded-wait push and lets each caller pick.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            capacity,
            state: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push without blocking. Returns the item back if the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut queue = self.state.lock().unwrap();
        if queue.len() >= self.capacity {
            return Err(item);
        }
        queue.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push, waiting up to `timeout` for room. Returns the item back on
    /// timeout — this is the "bounded wait" submit policy, never an
    /// unbounded block.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.state.lock().unwrap();
        loop {
            if queue.len() < self.capacity {
                queue.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(item);
            }
            let (guard, result) = self.not_full.wait_timeout(queue, deadline - now).unwrap();
            queue = guard;
            if result.timed_out() && queue.len() >= self.capacity {
                return Err(item);
            }
        }
    }

    /// Pop without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut queue = self.state.lock().unwrap();
        let item = queue.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Pop, waiting up to `timeout` for an item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.state.lock().unwrap();
        loop {
            if let Some(item) = queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.not_empty.wait_timeout(queue, deadline - now).unwrap();
            queue = guard;
        }
    }
}
