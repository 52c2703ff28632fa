use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A value protected by a raw lock `R`.
pub struct Mutex<T, R> {
    raw: R,
    value: UnsafeCell<T>,
}

// SAFETY: the raw lock hands out exclusive access to `value`.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            value: UnsafeCell::new(value),
        }
    }

    /// Exclusive borrow of the mutex proves nobody holds the lock.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw
            .raw_try_lock()
            .then(|| MutexGuard { mutex: self })
    }

    /// Run `f` with the lock held.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Whether any context currently holds the lock.
    ///
    /// Only meaningful as an assertion aid; the answer may be stale by the
    /// time the caller looks at it.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }
}

/// Lock ownership; unlocks on drop.
pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    mutex: &'a Mutex<T, R>,
}

impl<'a, T, R> MutexGuard<'a, T, R>
where
    R: RawLock + RawUnlock,
{
    /// Releases the lock while `f` runs and reacquires it before returning,
    /// also when `f` unwinds.
    ///
    /// The guard is borrowed mutably for the duration, so the protected value
    /// cannot be touched through it while unlocked. Anything read before the
    /// call may be stale afterwards.
    pub fn unlocked<U>(guard: &mut Self, f: impl FnOnce() -> U) -> U {
        struct Relock<'b, R: RawLock>(&'b R);

        impl<R: RawLock> Drop for Relock<'_, R> {
            fn drop(&mut self) {
                self.0.raw_lock();
            }
        }

        let mutex: &'a Mutex<T, R> = guard.mutex;
        // SAFETY: the guard proves we hold the lock; `Relock` takes it back
        // before the guard can be used again.
        unsafe { mutex.raw.raw_unlock() };
        let _relock = Relock(&mutex.raw);
        f()
    }
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        // SAFETY: the guard holds the lock.
        unsafe { self.mutex.raw.raw_unlock() }
    }
}
