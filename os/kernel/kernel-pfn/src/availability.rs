//! Available page accounting and the events hanging off it.
//!
//! Available pages are Zeroed + Free + Standby. Four events follow the count:
//!
//! | Event        | Signaled while                    | Used by                         |
//! |--------------|-----------------------------------|---------------------------------|
//! | `low`        | available >= low limit            | memory makers waiting for pages |
//! | `high`       | available >= high limit           | ordinary allocators waiting     |
//! | `low_memory` | available < low memory threshold  | application notification        |
//! | `high_memory`| available >= high memory threshold| application notification        |
//!
//! The events only change when the count moves across a boundary, which
//! happens one page at a time, so each crossing sets or clears an event
//! exactly once.
//!
//! # Starvation
//!
//! A waiter whose wait times out without the event having been set in the
//! meantime assumes nothing is making progress and runs the last-chance
//! pass: the modified pages of one mapped file are dropped without being
//! written, which turns them into Standby pages. If there is nothing to
//! drop the system halts with a code describing what is clogging memory.

use crate::bugcheck::{BugCheck, bug_check};
use crate::collab::Collaborators;
use crate::config::VictimSelection;
use crate::database::PfnGuard;
use crate::frame::FrameIndex;
use crate::record::{BackingDescriptor, FileId};
use alloc::collections::BTreeMap;
use core::sync::atomic::Ordering;
use kernel_sync::{Event, Timeout, WaitStatus};

pub struct AvailabilityEvents {
    low: Event,
    high: Event,
    low_memory: Event,
    high_memory: Event,
}

impl AvailabilityEvents {
    /// State for zero available pages.
    pub(crate) const fn new() -> Self {
        Self {
            low: Event::notification(false),
            high: Event::notification(false),
            low_memory: Event::notification(true),
            high_memory: Event::notification(false),
        }
    }

    #[must_use]
    pub const fn low(&self) -> &Event {
        &self.low
    }

    #[must_use]
    pub const fn high(&self) -> &Event {
        &self.high
    }

    #[must_use]
    pub const fn low_memory(&self) -> &Event {
        &self.low_memory
    }

    #[must_use]
    pub const fn high_memory(&self) -> &Event {
        &self.high_memory
    }
}

/// Who is waiting for pages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitKind {
    /// Waits for the high limit.
    Ordinary,
    /// Threads that free memory themselves (writers, trimmers) only wait
    /// for the low limit, so they keep running when others block.
    MemoryMaker,
}

impl<C: Collaborators> PfnGuard<'_, C> {
    #[inline]
    #[must_use]
    pub fn available(&self) -> u64 {
        self.state.available
    }

    pub(crate) fn available_incremented(&mut self) {
        let config = &self.db.config;
        let events = &self.db.events;
        self.state.available += 1;
        let available = self.state.available;

        if available == config.low_limit {
            events.low.set();
        }
        if available == config.high_limit {
            events.high.set();
        }
        if available == config.low_memory_threshold {
            events.low_memory.clear();
        } else if available == config.high_memory_threshold {
            events.high_memory.set();
        }
    }

    pub(crate) fn available_decremented(&mut self) {
        let config = &self.db.config;
        let events = &self.db.events;
        let available = self.state.available;
        if available == 0 {
            bug_check(crate::ListCorruption::NothingAvailable);
        }

        if available == config.low_limit {
            events.low.clear();
        }
        if available == config.high_limit {
            events.high.clear();
        }
        if available == config.high_memory_threshold {
            events.high_memory.clear();
        } else if available == config.low_memory_threshold {
            events.low_memory.set();
        }

        self.state.available = available - 1;
        if self.state.available < config.minimum_free_pages {
            self.db.collaborators.obtain_free_pages();
        }
    }

    /// Makes sure the caller can take a page, waiting if necessary.
    ///
    /// Returns `false` without touching the lock when enough pages are
    /// available, `true` after having waited; in the latter case the lock
    /// was released and the caller must re-validate anything it looked at.
    /// `timeout` supplies a fresh deadline for each wait.
    pub fn ensure_available_or_wait<T: Timeout>(
        &mut self,
        kind: WaitKind,
        mut timeout: impl FnMut() -> T,
    ) -> bool {
        let config = &self.db.config;
        if self.state.available >= config.high_limit {
            return false;
        }
        let db = self.db;
        let (limit, event) = match kind {
            WaitKind::MemoryMaker => {
                if self.state.available >= config.low_limit {
                    return false;
                }
                (config.low_limit, &db.events.low)
            }
            WaitKind::Ordinary => (config.high_limit, &db.events.high),
        };

        log::debug!(
            "waiting for {limit} available pages ({} now, {kind:?})",
            self.state.available
        );
        loop {
            let sets_before = event.set_count();
            // Only set while available >= limit, which it is not.
            event.clear();
            let status = self.unlocked(|| event.wait(&timeout()));

            if status == WaitStatus::TimedOut && event.set_count() == sets_before {
                self.no_pages_last_chance(limit);
            }
            if self.state.available >= limit {
                return true;
            }
        }
    }

    /// Starvation recovery, run with the lock held after a wait for `limit`
    /// pages made no progress.
    fn no_pages_last_chance(&mut self, limit: u64) {
        if self.state.available >= limit {
            return;
        }
        if let Some(file) = self.state.last_chance_file {
            log::debug!("last-chance discard of {file} is still being reported");
            return;
        }

        if let Some(file) = self.select_victim() {
            let pages = self.discard_modified_pages(file);
            self.state.last_chance_file = Some(file);
            log::error!(
                "memory starvation: discarded {pages} unwritten modified pages of {file}, {} pages available",
                self.state.available
            );
            self.db.collaborators.report_discarded_writes(file, pages);
            return;
        }

        let code = self.starvation_code();
        if self.db.config.march_on {
            log::warn!("memory starvation without a way out ({code}), marching on");
            return;
        }
        bug_check(code);
    }

    /// The discard reported through
    /// [`report_discarded_writes`](crate::WriterSignals::report_discarded_writes)
    /// has been dealt with; another file may be discarded if needed.
    pub fn last_chance_reported(&mut self) {
        self.state.last_chance_file = None;
    }

    fn select_victim(&self) -> Option<FileId> {
        let mut eligible = self.mapped_modified_frames().filter_map(|frame| {
            match self.record(frame).original() {
                Some(BackingDescriptor::MappedFile {
                    file, image: false, ..
                }) => Some(file),
                _ => None,
            }
        });

        match self.db.config.victim_selection {
            VictimSelection::FirstFound => eligible.next(),
            VictimSelection::MostModifiedPages => {
                let mut counts = BTreeMap::<FileId, u64>::new();
                for file in eligible {
                    *counts.entry(file).or_default() += 1;
                }
                counts
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(file, _)| file)
            }
        }
    }

    /// The main Modified chain, which holds the mapped-file pages.
    fn mapped_modified_frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        let mut next = self.state.modified.flink;
        core::iter::from_fn(move || {
            let frame = next;
            if frame.is_empty() {
                return None;
            }
            next = self.record(frame).links.flink;
            Some(frame)
        })
    }

    /// Drops the dirty state of every eligible modified page of `file`,
    /// sending them to Standby.
    fn discard_modified_pages(&mut self, file: FileId) -> u64 {
        let mut discarded = 0;
        let mut next = self.state.modified.flink;
        while !next.is_empty() {
            let frame = next;
            next = self.record(frame).links.flink;

            let matches = matches!(
                self.record(frame).original(),
                Some(BackingDescriptor::MappedFile { file: f, image: false, .. }) if f == file
            );
            if !matches {
                continue;
            }

            self.unlink_middle(frame);
            let atomics = self.atomics(frame);
            atomics.update_flags(|f| f.with_modified(false));
            // Take and drop a reference so the page is placed like any
            // other page losing its last reference.
            atomics.reference_count_cell().store(1, Ordering::Release);
            self.decrement_reference_count(frame);
            discarded += 1;
        }
        discarded
    }

    fn starvation_code(&self) -> BugCheck {
        let modified = self.state.modified.total;
        let modified_no_write = self.state.modified_no_write.total;
        let pages_for_paging_file = self.state.pages_for_paging_file;

        if self.db.shutdown.load(Ordering::Acquire) {
            BugCheck::DisorderlyShutdown {
                modified,
                available: self.state.available,
            }
        } else if modified_no_write != 0 && modified_no_write >= modified >> 2 {
            BugCheck::DirtyNoWritePagesCongestion {
                modified,
                modified_no_write,
            }
        } else if pages_for_paging_file >= modified >> 2 {
            BugCheck::NoPagesAvailable {
                modified,
                pages_for_paging_file,
            }
        } else {
            BugCheck::DirtyMappedPagesCongestion {
                modified,
                pages_for_paging_file,
            }
        }
    }
}
