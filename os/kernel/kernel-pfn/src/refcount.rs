//! Reference, share and locked-page charge accounting.
//!
//! The reference count of a frame counts transient pins (I/O, probes,
//! locks, the valid mapping itself); the share count counts valid
//! mappings. While the reference count is nonzero the frame never moves
//! between lists.
//!
//! Reference counts are atomics. Moving between two nonzero values can
//! happen anywhere with a CAS ([`PageFrameDatabase::reference_fast`],
//! [`PageFrameDatabase::dereference_fast`]), but the 0 -> 1 and 1 -> 0
//! transitions take a frame off or put it on a list and therefore require
//! the PFN lock. The fast paths refuse to cross those boundaries, so the
//! lock holder observing 1 (or 0) knows it is the only party that can
//! change that.
//!
//! The first lock of a frame charges one page against the systemwide
//! resident-available budget; the last unlock returns it.

use crate::bugcheck::{BugCheck, ListCorruption, MemoryManagement, bug_check};
use crate::collab::Collaborators;
use crate::database::{PageFrameDatabase, PfnGuard};
use crate::frame::FrameIndex;
use crate::record::{BackingDescriptor, FrameUse, ListMembership, ShortFlags, Tier};
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Highest reference count the fast paths will produce.
pub const REFERENCE_COUNT_LIMIT: u16 = u16::MAX - 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ChargeError {
    #[error("resident available pages exhausted")]
    ResidentAvailableExhausted,
    #[error("reference count of frame {0} would overflow")]
    ReferenceCountOverflow(FrameIndex),
    #[error("frame {0} is not referenced; lock it under the PFN lock instead")]
    Unreferenced(FrameIndex),
}

pub(crate) struct ChargeAccounts {
    resident_available: AtomicI64,
    system_lock_pages: AtomicU64,
}

impl ChargeAccounts {
    pub fn new(resident_available: u64) -> Self {
        Self {
            resident_available: AtomicI64::new(i64::try_from(resident_available).unwrap_or(i64::MAX)),
            system_lock_pages: AtomicU64::new(0),
        }
    }

    fn charge(&self) {
        self.resident_available.fetch_sub(1, Ordering::AcqRel);
        self.system_lock_pages.fetch_add(1, Ordering::AcqRel);
    }

    /// Charges unless the budget is exhausted; `force` charges regardless.
    fn try_charge(&self, force: bool) -> bool {
        if force {
            self.charge();
            return true;
        }
        let claimed = self
            .resident_available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                (available > 0).then(|| available - 1)
            })
            .is_ok();
        if claimed {
            self.system_lock_pages.fetch_add(1, Ordering::AcqRel);
        }
        claimed
    }

    fn uncharge(&self) {
        self.resident_available.fetch_add(1, Ordering::AcqRel);
        self.system_lock_pages.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn resident_available(&self) -> i64 {
        self.resident_available.load(Ordering::Acquire)
    }

    pub fn system_lock_pages(&self) -> u64 {
        self.system_lock_pages.load(Ordering::Acquire)
    }
}

impl<C: Collaborators> PageFrameDatabase<C> {
    /// Adds a reference to a frame that already has one. Returns `false`
    /// if the frame is unreferenced; the caller then takes the PFN lock and
    /// uses [`PfnGuard::reference`].
    pub fn reference_fast(&self, frame: FrameIndex) -> bool {
        self.atomics(frame)
            .reference_count_cell()
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count != 0 && count < REFERENCE_COUNT_LIMIT).then(|| count + 1)
            })
            .is_ok()
    }

    /// Drops a reference that isn't the last one. Returns `false` if it is;
    /// the caller then takes the PFN lock and uses
    /// [`PfnGuard::decrement_reference_count`].
    pub fn dereference_fast(&self, frame: FrameIndex) -> bool {
        self.atomics(frame)
            .reference_count_cell()
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 1).then(|| count - 1)
            })
            .is_ok()
    }

    /// Adds a reference, taking the PFN lock only for the 0 -> 1 transition.
    pub fn reference(&self, frame: FrameIndex) {
        if !self.reference_fast(frame) {
            self.lock().reference(frame);
        }
    }

    /// Drops a reference, taking the PFN lock only for the 1 -> 0 transition.
    pub fn dereference(&self, frame: FrameIndex) {
        if !self.dereference_fast(frame) {
            self.lock().decrement_reference_count(frame);
        }
    }

    /// Locks a referenced frame for a probe without the PFN lock.
    ///
    /// The first lock of a frame held only by its mapping charges a page
    /// against the resident-available budget, which fails when the budget
    /// is exhausted unless `force` is set.
    ///
    /// # Errors
    /// See [`ChargeError`]; on error the reference count is unchanged.
    pub fn add_locked_page_charge_for_probe(
        &self,
        frame: FrameIndex,
        force: bool,
    ) -> Result<(), ChargeError> {
        let cell = self.atomics(frame).reference_count_cell();
        let previous = cell
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count != 0 && count < REFERENCE_COUNT_LIMIT).then(|| count + 1)
            })
            .map_err(|count| {
                if count == 0 {
                    ChargeError::Unreferenced(frame)
                } else {
                    ChargeError::ReferenceCountOverflow(frame)
                }
            })?;

        if previous == 1 && !self.charges.try_charge(force) {
            self.dereference(frame);
            return Err(ChargeError::ResidentAvailableExhausted);
        }
        Ok(())
    }

    #[must_use]
    pub fn resident_available(&self) -> i64 {
        self.charges.resident_available()
    }

    #[must_use]
    pub fn system_lock_pages(&self) -> u64 {
        self.charges.system_lock_pages()
    }
}

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Turns an unlisted, unreferenced frame into the valid mapping of a PTE:
    /// one reference, one share. The page table frame gains a share.
    pub fn initialize_frame(
        &mut self,
        frame: FrameIndex,
        original: BackingDescriptor,
        page_table: Option<FrameIndex>,
        modified: bool,
    ) {
        let membership = self.record(frame).membership;
        if membership != ListMembership::NotListed {
            bug_check(ListCorruption::AlreadyListed { frame, membership });
        }
        let atomics = self.atomics(frame);
        let count = atomics.reference_count();
        if count != 0 {
            bug_check(BugCheck::PfnReferenceCount { frame, count });
        }

        atomics.update_flags(|f| {
            ShortFlags::new()
                .with_modified(modified)
                .with_must_be_cached(f.must_be_cached())
                .with_removal_requested(f.removal_requested())
        });
        atomics.reference_count_cell().store(1, Ordering::Release);

        let priority = self.db.config.default_standby_priority;
        let rec = self.record_mut(frame);
        rec.share_count = 1;
        rec.priority = priority;
        rec.usage = FrameUse::Mapped {
            original,
            page_table,
        };
        if let Some(table) = page_table {
            self.record_mut(table).share_count += 1;
        }
        log::trace!("frame {frame} now maps {original:?}");
    }

    /// Another valid mapping of an already referenced frame.
    pub fn increment_share_count(&mut self, frame: FrameIndex) {
        let count = self.atomics(frame).reference_count();
        if count == 0 {
            bug_check(BugCheck::PfnReferenceCount { frame, count });
        }
        self.record_mut(frame).share_count += 1;
    }

    /// Drops a valid mapping. When the last one goes the frame becomes a
    /// transition page and loses the mapping's reference; a deleted frame
    /// also releases its share of the page table.
    pub fn decrement_share_count(&mut self, frame: FrameIndex) {
        let rec = self.record_mut(frame);
        if rec.share_count == 0 {
            bug_check(ListCorruption::ShareCountUnderflow(frame));
        }
        rec.share_count -= 1;
        if rec.share_count != 0 {
            return;
        }

        if self.atomics(frame).flags().deleted() {
            if let Some(table) = self.take_page_table(frame) {
                self.decrement_share_count(table);
            }
        }
        self.decrement_reference_count(frame);
    }

    /// Adds a reference under the PFN lock. On 0 -> 1 a transition page is
    /// taken off its list.
    pub fn reference(&mut self, frame: FrameIndex) {
        let cell = self.atomics(frame).reference_count_cell();
        let mut count = cell.load(Ordering::Acquire);
        loop {
            if count == 0 {
                match self.record(frame).membership {
                    ListMembership::NotListed => {}
                    ListMembership::Listed(tier) if !tier.is_colored() => self.unlink_middle(frame),
                    membership => {
                        bug_check(ListCorruption::NotUnlinkable { frame, membership })
                    }
                }
                cell.store(1, Ordering::Release);
                return;
            }
            if count >= REFERENCE_COUNT_LIMIT {
                bug_check(BugCheck::PfnReferenceCount { frame, count });
            }
            match cell.compare_exchange_weak(count, count + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => count = actual,
            }
        }
    }

    /// Drops a reference under the PFN lock. On 1 -> 0 the frame is placed
    /// on a list:
    ///
    /// | State                | Destination                          |
    /// |----------------------|--------------------------------------|
    /// | deleted              | Free, after releasing backing space  |
    /// | modified             | Modified                             |
    /// | removal requested    | Bad                                  |
    /// | otherwise            | Standby at the frame's priority      |
    pub fn decrement_reference_count(&mut self, frame: FrameIndex) {
        debug_assert!(self.db.is_locked());
        let cell = self.atomics(frame).reference_count_cell();
        let mut count = cell.load(Ordering::Acquire);
        loop {
            if count == 0 {
                bug_check(BugCheck::PfnReferenceCount { frame, count });
            }
            match cell.compare_exchange_weak(count, count - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(1) => break,
                Ok(_) => return,
                Err(actual) => count = actual,
            }
        }
        self.place_unreferenced(frame);
    }

    fn place_unreferenced(&mut self, frame: FrameIndex) {
        let share_count = self.record(frame).share_count;
        if share_count != 0 {
            bug_check(MemoryManagement::ActiveOnTransitionList { frame, share_count });
        }

        let flags = self.atomics(frame).flags();
        if flags.deleted() {
            let rec = self.record_mut(frame);
            if let FrameUse::Mapped { original, .. } = core::mem::take(&mut rec.usage) {
                if matches!(original, BackingDescriptor::PagingFile { .. }) {
                    self.db.collaborators.release_backing_space(&original);
                }
            }
            self.insert_tail(Tier::Free, frame);
        } else if flags.modified() {
            self.insert_tail(Tier::Modified, frame);
        } else {
            let priority = self.record(frame).priority;
            self.insert_tail(Tier::Standby(priority), frame);
        }
    }

    /// The PTE mapping `frame` is gone. Transition pages go straight to
    /// Free; frames still mapped or under I/O follow once their last share
    /// and reference are dropped.
    pub fn delete_frame(&mut self, frame: FrameIndex) {
        self.atomics(frame).update_flags(|f| f.with_deleted(true));
        if self.record(frame).share_count != 0 {
            return;
        }

        // No valid mapping left; the page table share goes now.
        if let Some(table) = self.take_page_table(frame) {
            self.decrement_share_count(table);
        }
        if let ListMembership::Listed(tier) = self.record(frame).membership {
            if !tier.is_transition() {
                bug_check(ListCorruption::NotUnlinkable {
                    frame,
                    membership: ListMembership::Listed(tier),
                });
            }
            self.unlink_middle(frame);
            self.atomics(frame)
                .reference_count_cell()
                .store(1, Ordering::Release);
            self.decrement_reference_count(frame);
        }
    }

    fn take_page_table(&mut self, frame: FrameIndex) -> Option<FrameIndex> {
        match &mut self.record_mut(frame).usage {
            FrameUse::Mapped { page_table, .. } => page_table.take(),
            _ => None,
        }
    }

    /// Locks `frame` in memory. The caller has either just taken the
    /// frame off its list (reference count 0) or holds it mapped.
    pub fn add_locked_page_charge(&mut self, frame: FrameIndex) {
        let cell = self.atomics(frame).reference_count_cell();
        let previous = cell.fetch_add(1, Ordering::AcqRel);
        if previous >= REFERENCE_COUNT_LIMIT {
            bug_check(BugCheck::PfnReferenceCount {
                frame,
                count: previous,
            });
        }
        let share_count = self.record(frame).share_count;
        match previous {
            0 => {
                debug_assert_eq!(self.record(frame).membership, ListMembership::NotListed);
                self.db.charges.charge();
            }
            1 if share_count != 0 => self.db.charges.charge(),
            _ => {}
        }
    }

    /// Undoes [`add_locked_page_charge`](Self::add_locked_page_charge) (or
    /// a probe lock) and drops the reference, placing the frame on a list
    /// if it was the last one.
    pub fn remove_locked_page_charge_and_deref(&mut self, frame: FrameIndex) {
        let cell = self.atomics(frame).reference_count_cell();
        let mut count = cell.load(Ordering::Acquire);
        loop {
            match count {
                0 => bug_check(BugCheck::PfnReferenceCount { frame, count }),
                1 => {
                    self.db.charges.uncharge();
                    self.decrement_reference_count(frame);
                    return;
                }
                _ => {}
            }
            match cell.compare_exchange_weak(count, count - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(2) if self.record(frame).share_count != 0 => {
                    self.db.charges.uncharge();
                    return;
                }
                Ok(_) => return,
                Err(actual) => count = actual,
            }
        }
    }
}
