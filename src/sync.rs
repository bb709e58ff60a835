//! Deadline-bounded waiting on shared state
//!
//! Every blocking point in the controller (connection readiness, stream
//! readiness, stream disconnect, control confirmation) is a [`Signal::wait_until`]
//! call with a predicate. The dispatcher thread mutates the state through
//! [`Signal::update`], which wakes all waiters. The lock is released while a
//! waiter sleeps so the notification being awaited can always be applied.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// Lower bound on the re-check interval
const MIN_POLL: Duration = Duration::from_millis(1);

/// Returned when the deadline passes before the condition holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline elapsed after {:?}", self.0)
    }
}

impl std::error::Error for Elapsed {}

/// State guarded by a mutex with change notification
pub struct Signal<T> {
    state: Mutex<T>,
    changed: Condvar,
}

impl<T> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    /// Lock without notifying; for reads
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Mutate the state and wake every waiter
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.state.lock();
            f(&mut *guard)
        };
        self.changed.notify_all();
        result
    }

    /// Wait up to `timeout` for `check` to yield a value.
    ///
    /// `check` runs with the lock held, first immediately and then after every
    /// notification or every `poll` interval, whichever comes first. The poll
    /// lets predicates that look outside the guarded state make progress.
    pub fn wait_for<R>(
        &self,
        timeout: Duration,
        poll: Duration,
        check: impl FnMut(&mut T) -> Option<R>,
    ) -> Result<R, Elapsed> {
        let started = Instant::now();
        self.wait_until(started + timeout, poll, check)
            .map_err(|_| Elapsed(timeout))
    }

    /// Like [`Signal::wait_for`] with an absolute deadline
    pub fn wait_until<R>(
        &self,
        deadline: Instant,
        poll: Duration,
        mut check: impl FnMut(&mut T) -> Option<R>,
    ) -> Result<R, Elapsed> {
        let started = Instant::now();
        let poll = poll.max(MIN_POLL);
        let mut guard = self.state.lock();
        loop {
            if let Some(value) = check(&mut *guard) {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Elapsed(now - started));
            }
            let wake = (now + poll).min(deadline);
            self.changed.wait_until(&mut guard, wake);
        }
    }
}

impl<T: Default> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
