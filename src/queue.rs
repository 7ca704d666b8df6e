//! Bounded blocking queue (spec §4.1, component C1).
//!
//! The sole back-pressure mechanism in the pipeline: when full, producers
//! block, which is the intended flow-control signal to the demuxer and
//! decode workers. Generalizes the mutex+condvar bounded-queue pattern used
//! for audio sample buffering elsewhere in this codebase's corpus to a
//! generic, item-at-a-time queue with a `reset()` that atomically drains
//! and releases every pending item and wakes blocked callers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of a blocking push. `Full` and `Reset` hand the item back to the
/// caller — it was never moved into the queue, so ownership (and the
/// caller's "release exactly once" obligation for packets/frames) stays
/// with whoever called `push`.
#[derive(Debug, PartialEq)]
pub enum PushResult<T> {
    Ok,
    Full(T),
    Reset(T),
}

/// Outcome of a blocking pop.
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    Item(T),
    Empty,
    Reset,
}

struct Inner<T> {
    items: VecDeque<T>,
    /// Bumped on every `reset()`; blocked callers compare against the value
    /// they saw on entry so they can tell "woke up after a reset" apart
    /// from "woke up because the condition is now true".
    generation: u64,
    closed: bool,
}

/// A fixed-capacity, multi-producer/multi-consumer blocking queue.
///
/// FIFO for items; no fairness guarantee among blocked producers/consumers
/// (spec §4.1).
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                generation: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the queue permanently closed: a sentinel state distinct from
    /// `reset()` used by the demux worker to signal normal end-of-stream
    /// (spec §4.14 "demux worker ... on EOF, close the queues"). Blocked
    /// pops drain remaining items before observing closure; blocked pushes
    /// return `Reset` immediately since nothing will ever consume them.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.generation = inner.generation.wrapping_add(1);
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Blocking push with timeout. Blocks while full; returns `Full` if the
    /// timeout elapses first, `Reset` if a `reset()`/`close()` happened
    /// while waiting, `Ok` once the item is enqueued.
    pub fn push(&self, item: T, timeout: Duration) -> PushResult<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let generation_on_entry = inner.generation;

        loop {
            if inner.generation != generation_on_entry {
                return PushResult::Reset(item);
            }
            if inner.closed {
                return PushResult::Reset(item);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                drop(inner);
                self.not_empty.notify_all();
                return PushResult::Ok;
            }
            let now = Instant::now();
            if now >= deadline {
                return PushResult::Full(item);
            }
            let wait_for = deadline - now;
            let timed_out = self.not_full.wait_for(&mut inner, wait_for).timed_out();
            if timed_out && inner.items.len() >= self.capacity && inner.generation == generation_on_entry
            {
                return PushResult::Full(item);
            }
        }
    }

    /// Blocking pop with timeout. FIFO order preserved.
    pub fn pop(&self, timeout: Duration) -> PopResult<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let generation_on_entry = inner.generation;

        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_all();
                return PopResult::Item(item);
            }
            if inner.generation != generation_on_entry {
                return PopResult::Reset;
            }
            if inner.closed {
                return PopResult::Reset;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopResult::Empty;
            }
            let wait_for = deadline - now;
            let timed_out = self.not_empty.wait_for(&mut inner, wait_for).timed_out();
            if timed_out && inner.items.is_empty() {
                return PopResult::Empty;
            }
        }
    }

    /// Atomically drains every pending item through `releaser`, bumps the
    /// generation counter so blocked producers/consumers wake with `Reset`
    /// within one wake cycle, and leaves the queue open for further use
    /// (unlike `close()`). This is the seek hook: packet/frame queues are
    /// reset, not closed, because playback continues after the seek.
    pub fn reset(&self, mut releaser: impl FnMut(T)) {
        let mut inner = self.inner.lock();
        while let Some(item) = inner.items.pop_front() {
            releaser(item);
        }
        inner.generation = inner.generation.wrapping_add(1);
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_preserves_order() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        for i in 0..4 {
            assert_eq!(q.push(i, Duration::from_millis(50)), PushResult::Ok);
        }
        for i in 0..4 {
            assert_eq!(q.pop(Duration::from_millis(50)), PopResult::Item(i));
        }
    }

    #[test]
    fn push_blocks_until_full_timeout() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        assert_eq!(q.push(1, Duration::from_millis(10)), PushResult::Ok);
        let start = Instant::now();
        assert_eq!(q.push(2, Duration::from_millis(30)), PushResult::Full(2));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn pop_blocks_until_empty_timeout() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        let start = Instant::now();
        assert_eq!(q.pop(Duration::from_millis(30)), PopResult::Empty);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn reset_releases_every_pending_item_exactly_once() {
        let q: BoundedQueue<i32> = BoundedQueue::new(8);
        for i in 0..5 {
            q.push(i, Duration::from_millis(10));
        }
        let mut released = Vec::new();
        q.reset(|item| released.push(item));
        assert_eq!(released, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
        assert!(!q.is_closed());
    }

    #[test]
    fn reset_wakes_blocked_pop_within_one_cycle() {
        let q = Arc::new(BoundedQueue::<i32>::new(2));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        q.reset(|_| {});
        let result = handle.join().unwrap();
        assert_eq!(result, PopResult::Reset);
    }

    #[test]
    fn reset_wakes_blocked_push_within_one_cycle() {
        let q = Arc::new(BoundedQueue::<i32>::new(1));
        q.push(0, Duration::from_millis(10));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        q.reset(|_| {});
        let result = handle.join().unwrap();
        assert_eq!(result, PushResult::Reset(1));
    }

    #[test]
    fn reset_on_empty_queue_is_a_no_op() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        let mut count = 0;
        q.reset(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn close_wakes_blocked_pop_with_reset() {
        let q = Arc::new(BoundedQueue::<i32>::new(2));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(handle.join().unwrap(), PopResult::Reset);
    }

    #[test]
    fn close_lets_pending_items_drain_before_reset_is_observed() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        q.push(1, Duration::from_millis(10));
        q.push(2, Duration::from_millis(10));
        q.close();
        assert_eq!(q.pop(Duration::from_millis(10)), PopResult::Item(1));
        assert_eq!(q.pop(Duration::from_millis(10)), PopResult::Item(2));
        assert_eq!(q.pop(Duration::from_millis(10)), PopResult::Reset);
    }
}
