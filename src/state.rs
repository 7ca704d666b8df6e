//! Player state machine (spec §4.2, component C2).
//!
//! A whitelisted transition table serialized on a mutex, with synchronous
//! post-commit subscriber notification and a `wait_for_resume` barrier used
//! by worker loops.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    Idle,
    Opening,
    Stopped,
    Playing,
    Paused,
    Seeking,
    Error,
    Closing,
}

impl PlayerState {
    /// Spec §4.2 transition table. Rows are current, columns are requested.
    fn allows(self, to: PlayerState) -> bool {
        use PlayerState::*;
        matches!(
            (self, to),
            (Idle, Opening)
                | (Idle, Error)
                | (Idle, Closing)
                | (Opening, Stopped)
                | (Opening, Error)
                | (Opening, Closing)
                | (Stopped, Opening)
                | (Stopped, Playing)
                | (Stopped, Seeking)
                | (Stopped, Error)
                | (Stopped, Closing)
                | (Playing, Stopped)
                | (Playing, Paused)
                | (Playing, Seeking)
                | (Playing, Error)
                | (Playing, Closing)
                | (Paused, Stopped)
                | (Paused, Playing)
                | (Paused, Seeking)
                | (Paused, Error)
                | (Paused, Closing)
                | (Seeking, Playing)
                | (Seeking, Paused)
                | (Seeking, Error)
                | (Seeking, Closing)
                | (Error, Opening)
                | (Error, Stopped)
                | (Error, Closing)
        )
    }
}

type Subscriber = Arc<dyn Fn(PlayerState, PlayerState) + Send + Sync>;

struct Inner {
    state: PlayerState,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber_id: u64,
}

/// Thread-safe state machine shared (via `Arc`) by every worker in the
/// pipeline. Cloning the handle is cheap; all instances refer to the same
/// underlying state.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Mutex<Inner>>,
    resume_cv: Arc<Condvar>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: PlayerState::Idle,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            })),
            resume_cv: Arc::new(Condvar::new()),
        }
    }

    pub fn get(&self) -> PlayerState {
        self.inner.lock().state
    }

    /// Requests a transition. Returns `true` if accepted and committed,
    /// `false` if rejected by the table (current state unchanged).
    /// Concurrent requesters serialize on the internal mutex; subscribers
    /// run synchronously, on the thread that committed the transition,
    /// after the mutex is released (so a subscriber may itself request a
    /// further transition without deadlocking).
    pub fn request(&self, to: PlayerState) -> bool {
        let (from, callbacks) = {
            let mut inner = self.inner.lock();
            if !inner.state.allows(to) {
                return false;
            }
            let from = inner.state;
            inner.state = to;
            let callbacks: Vec<Subscriber> =
                inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (from, callbacks)
        };

        for cb in callbacks {
            cb(from, to);
        }

        // Any transition away from Paused (or into it, which is a no-op for
        // waiters) should re-check the resume condition.
        self.resume_cv.notify_all();
        true
    }

    pub fn should_stop(&self) -> bool {
        matches!(self.get(), PlayerState::Closing)
    }

    pub fn should_pause(&self) -> bool {
        matches!(self.get(), PlayerState::Paused)
    }

    /// Blocks until the state leaves `Paused`, or enters `Closing`/`Stopped`
    /// (spec §4.2). Workers call this from their loop body; it never blocks
    /// while holding another component's lock.
    pub fn wait_for_resume(&self) {
        let mut inner = self.inner.lock();
        while matches!(inner.state, PlayerState::Paused) {
            self.resume_cv.wait(&mut inner);
        }
    }

    /// Registers a non-blocking callback invoked synchronously after every
    /// accepted transition, in commit order. Returns a subscription id for
    /// `unsubscribe`.
    pub fn subscribe(
        &self,
        callback: impl Fn(PlayerState, PlayerState) + Send + Sync + 'static,
    ) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|(sid, _)| *sid != id);
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn allowed_transitions_commit() {
        let sm = StateMachine::new();
        assert!(sm.request(PlayerState::Opening));
        assert!(sm.request(PlayerState::Stopped));
        assert!(sm.request(PlayerState::Playing));
        assert_eq!(sm.get(), PlayerState::Playing);
    }

    #[test]
    fn disallowed_transitions_are_rejected() {
        let sm = StateMachine::new();
        // Idle -> Playing is not in the table.
        assert!(!sm.request(PlayerState::Playing));
        assert_eq!(sm.get(), PlayerState::Idle);
    }

    #[test]
    fn subscribers_see_every_accepted_transition_in_commit_order() {
        let sm = StateMachine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        sm.subscribe(move |from, to| seen2.lock().push((from, to)));

        sm.request(PlayerState::Opening);
        sm.request(PlayerState::Stopped);
        sm.request(PlayerState::Playing); // accepted
        assert!(!sm.request(PlayerState::Opening)); // rejected, no notification

        let log = seen.lock();
        assert_eq!(
            *log,
            vec![
                (PlayerState::Idle, PlayerState::Opening),
                (PlayerState::Opening, PlayerState::Stopped),
                (PlayerState::Stopped, PlayerState::Playing),
            ]
        );
    }

    #[test]
    fn wait_for_resume_unblocks_on_playing() {
        let sm = StateMachine::new();
        sm.request(PlayerState::Opening);
        sm.request(PlayerState::Stopped);
        sm.request(PlayerState::Playing);
        sm.request(PlayerState::Paused);

        let sm2 = sm.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let handle = std::thread::spawn(move || {
            sm2.wait_for_resume();
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        sm.request(PlayerState::Playing);
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let sm = StateMachine::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = sm.subscribe(move |_, _| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        sm.request(PlayerState::Opening);
        sm.unsubscribe(id);
        sm.request(PlayerState::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
