use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

const OWNER_MASK: u32 = 0xFFFF;
const NEXT_ONE: u32 = 1 << 16;

/// FIFO ticket lock: contending processors are served in arrival order.
///
/// The ticket dispenser and the now-serving counter share one word
/// (`next << 16 | owner`), so holders and waiters can be read in a single
/// load. Both halves wrap at 16 bits.
pub struct RawTicket {
    word: AtomicU32,
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn next_of(word: u32) -> u32 {
    word >> 16
}

#[inline]
const fn owner_of(word: u32) -> u32 {
    word & OWNER_MASK
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn lock(&self) {
        let ticket = next_of(self.word.fetch_add(NEXT_ONE, Ordering::Relaxed));
        while owner_of(self.word.load(Ordering::Acquire)) != ticket {
            spin_loop();
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let word = self.word.load(Ordering::Relaxed);
        next_of(word) == owner_of(word)
            && self
                .word
                .compare_exchange(
                    word,
                    word.wrapping_add(NEXT_ONE),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    /// Some ticket has been handed out and not yet returned.
    #[inline]
    pub fn is_locked(&self) -> bool {
        let word = self.word.load(Ordering::Relaxed);
        next_of(word) != owner_of(word)
    }

    /// Tickets handed out beyond the one being served.
    #[inline]
    pub fn waiters(&self) -> u32 {
        let word = self.word.load(Ordering::Relaxed);
        next_of(word).wrapping_sub(owner_of(word)).wrapping_sub(1) & OWNER_MASK
    }

    /// # Safety
    /// The caller must currently own the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        // Only the holder advances the owner half; late ticket grabs race on
        // the other half, hence the loop.
        let _ = self
            .word
            .fetch_update(Ordering::Release, Ordering::Relaxed, |word| {
                Some((word & !OWNER_MASK) | ((owner_of(word) + 1) & OWNER_MASK))
            });
    }
}

impl RawLock for RawTicket {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    fn raw_is_locked(&self) -> bool {
        self.is_locked()
    }
}

impl RawUnlock for RawTicket {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
