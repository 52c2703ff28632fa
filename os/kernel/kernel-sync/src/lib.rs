//! # Kernel synchronization primitives
//!
//! A FIFO ticket mutex for hot global locks plus the waitable [`Event`]
//! used to park threads until a condition is signaled.
//!
//! | Type              | Use                                                  |
//! |-------------------|------------------------------------------------------|
//! | [`TicketMutex`]   | locks shared by all CPUs, served in arrival order    |
//! | [`MutexGuard`]    | RAII ownership; can drop the lock around a closure   |
//! | [`Event`]         | waiting for a signaled condition, with a deadline    |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod event;
mod mutex;
mod raw_ticket;

pub use event::{Event, EventKind, NoTimeout, Timeout, WaitStatus};
pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;

pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    unsafe fn raw_unlock(&self);
}
