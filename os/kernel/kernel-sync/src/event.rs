//! Waitable events.
//!
//! An [`Event`] is a signaled/non-signaled flag that waiters poll until it
//! becomes signaled or their [`Timeout`] runs out. There is no scheduler
//! underneath, so waiting means spinning; the timeout decides how to relax
//! between polls (a hosted test may yield the thread, a kernel may halt).
//!
//! Each event counts how often it was set. A waiter that timed out can
//! compare the count with the value observed before waiting to tell a
//! genuine starvation apart from a signal that raced with the timeout.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// How a satisfied wait affects the event.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EventKind {
    /// Stays signaled until explicitly cleared; releases every waiter.
    Notification,
    /// Auto-clears when a waiter consumes the signal; releases one waiter.
    Synchronization,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// Deadline policy for [`Event::wait`].
pub trait Timeout {
    /// Whether the wait should give up.
    fn expired(&self) -> bool;

    /// Called between polls.
    #[inline]
    fn relax(&self) {
        spin_loop();
    }
}

/// Wait forever.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoTimeout;

impl Timeout for NoTimeout {
    #[inline]
    fn expired(&self) -> bool {
        false
    }
}

pub struct Event {
    kind: EventKind,
    signaled: AtomicBool,
    sets: AtomicU32,
}

impl Event {
    #[must_use]
    pub const fn new(kind: EventKind, signaled: bool) -> Self {
        Self {
            kind,
            signaled: AtomicBool::new(signaled),
            sets: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn notification(signaled: bool) -> Self {
        Self::new(EventKind::Notification, signaled)
    }

    #[must_use]
    pub const fn synchronization(signaled: bool) -> Self {
        Self::new(EventKind::Synchronization, signaled)
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Signals the event. Returns the previous state.
    #[inline]
    pub fn set(&self) -> bool {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.signaled.swap(true, Ordering::Release)
    }

    #[inline]
    pub fn clear(&self) {
        self.signaled.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Number of [`set`](Self::set) calls so far. Wraps.
    #[inline]
    pub fn set_count(&self) -> u32 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Consume the signal if there is one.
    #[inline]
    pub fn try_wait(&self) -> bool {
        match self.kind {
            EventKind::Notification => self.signaled.load(Ordering::Acquire),
            EventKind::Synchronization => self
                .signaled
                .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
        }
    }

    /// Polls until signaled or `timeout` expires.
    pub fn wait<T: Timeout + ?Sized>(&self, timeout: &T) -> WaitStatus {
        loop {
            if self.try_wait() {
                return WaitStatus::Signaled;
            }
            if timeout.expired() {
                return WaitStatus::TimedOut;
            }
            timeout.relax();
        }
    }
}

impl core::fmt::Debug for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("signaled", &self.is_set())
            .field("sets", &self.set_count())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Polls(core::cell::Cell<u32>);

    impl Timeout for Polls {
        fn expired(&self) -> bool {
            let left = self.0.get();
            self.0.set(left.saturating_sub(1));
            left == 0
        }
    }

    #[test]
    fn synchronization_event_auto_clears() {
        let e = Event::synchronization(true);
        assert!(e.try_wait());
        assert!(!e.try_wait());
        assert!(!e.is_set());
    }

    #[test]
    fn notification_event_stays_set() {
        let e = Event::notification(false);
        e.set();
        assert!(e.try_wait());
        assert!(e.try_wait());
        e.clear();
        assert!(!e.try_wait());
    }

    #[test]
    fn wait_times_out() {
        let e = Event::notification(false);
        assert_eq!(e.wait(&Polls(core::cell::Cell::new(3))), WaitStatus::TimedOut);
    }

    #[test]
    fn set_count_counts_every_set() {
        let e = Event::notification(false);
        assert!(!e.set());
        assert!(e.set());
        assert_eq!(e.set_count(), 2);
    }
}
