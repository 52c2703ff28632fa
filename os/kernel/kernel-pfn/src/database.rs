//! The owning structure and its lock guard.
//!
//! ```text
//! PageFrameDatabase
//! ├── frames: [FrameAtomics]          reference counts, short flags (lock-free)
//! ├── state: TicketMutex<PfnState>    records, list heads, counters (PFN lock)
//! ├── events                          availability wait/notification events
//! ├── zeroing                         zero-fill worker wakeup
//! ├── charges                         resident-available / locked-page budget
//! └── collaborators                   PTE layer, paging files, zeroing, writer
//! ```
//!
//! Every structural operation is a method on [`PfnGuard`], which can only be
//! obtained through [`PageFrameDatabase::lock`].

use crate::availability::AvailabilityEvents;
use crate::bugcheck::{ListCorruption, bug_check};
use crate::collab::Collaborators;
use crate::config::{ConfigError, PfnConfig};
use crate::frame::{FrameIndex, PageColor};
use crate::list::PfnState;
use crate::record::{FrameAtomics, FrameInfo, PageFrameRecord, Tier};
use crate::refcount::ChargeAccounts;
use crate::zero::ZeroingControl;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_sync::{Event, MutexGuard, RawTicket, TicketMutex};

pub struct PageFrameDatabase<C> {
    pub(crate) config: PfnConfig,
    pub(crate) frames: Box<[FrameAtomics]>,
    pub(crate) state: TicketMutex<PfnState>,
    pub(crate) events: AvailabilityEvents,
    pub(crate) zeroing: ZeroingControl,
    pub(crate) charges: ChargeAccounts,
    pub(crate) shutdown: AtomicBool,
    pub(crate) collaborators: C,
}

/// Holds the PFN lock.
pub struct PfnGuard<'a, C> {
    pub(crate) db: &'a PageFrameDatabase<C>,
    pub(crate) state: MutexGuard<'a, PfnState, RawTicket>,
}

impl<C: Collaborators> PageFrameDatabase<C> {
    /// Creates a database of `frame_count` unlisted frames with colors
    /// derived from their position (see [`ColorLayout::color_for_frame`](crate::ColorLayout::color_for_frame)).
    pub fn new(config: PfnConfig, frame_count: u32, collaborators: C) -> Result<Self, ConfigError> {
        if frame_count == u32::MAX {
            return Err(ConfigError::FrameCount(u64::from(frame_count)));
        }
        let layout = config.colors;
        Self::with_frame_colors(
            config,
            (0..frame_count).map(|i| layout.color_for_frame(FrameIndex::new(i), frame_count)),
            collaborators,
        )
    }

    /// Creates a database with one frame per supplied color.
    pub fn with_frame_colors(
        config: PfnConfig,
        colors: impl IntoIterator<Item = PageColor>,
        collaborators: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = config.colors;

        let records = colors
            .into_iter()
            .map(|color| {
                if layout.contains(color) {
                    Ok(PageFrameRecord::new(color, config.default_standby_priority))
                } else {
                    Err(ConfigError::ColorOutOfRange {
                        color: color.as_u32(),
                        total: layout.total_colors(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let frame_count = u32::try_from(records.len())
            .ok()
            .filter(|n| *n != u32::MAX)
            .ok_or(ConfigError::FrameCount(records.len() as u64))?;

        let frames = (0..frame_count).map(|_| FrameAtomics::default()).collect();
        let resident_available = config
            .resident_available
            .unwrap_or_else(|| u64::from(frame_count));

        log::info!(
            "page frame database: {frame_count} frames, {} secondary colors on {} node(s)",
            layout.secondary_colors(),
            layout.nodes()
        );

        Ok(Self {
            config,
            frames,
            state: TicketMutex::new(PfnState::new(records, layout)),
            events: AvailabilityEvents::new(),
            zeroing: ZeroingControl::new(layout.nodes()),
            charges: ChargeAccounts::new(resident_available),
            shutdown: AtomicBool::new(false),
            collaborators,
        })
    }

    /// Acquires the PFN lock.
    #[inline]
    pub fn lock(&self) -> PfnGuard<'_, C> {
        PfnGuard {
            db: self,
            state: self.state.lock(),
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    #[must_use]
    pub const fn config(&self) -> &PfnConfig {
        &self.config
    }

    #[must_use]
    pub const fn collaborators(&self) -> &C {
        &self.collaborators
    }

    #[must_use]
    pub const fn events(&self) -> &AvailabilityEvents {
        &self.events
    }

    #[must_use]
    pub fn frame_count(&self) -> u32 {
        // bounded by the constructor
        u32::try_from(self.frames.len()).unwrap_or(u32::MAX)
    }

    /// Iterates over every frame index.
    pub fn frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        (0..self.frame_count()).map(FrameIndex::new)
    }

    /// Frames that refer to the database at all.
    #[inline]
    pub(crate) fn atomics(&self, frame: FrameIndex) -> &FrameAtomics {
        self.frames
            .get(frame.as_usize())
            .unwrap_or_else(|| bug_check(ListCorruption::InvalidFrame(frame)))
    }

    #[must_use]
    pub fn reference_count(&self, frame: FrameIndex) -> u16 {
        self.atomics(frame).reference_count()
    }

    /// Updates the lock-free flags of a frame and returns the previous value.
    pub fn update_flags(
        &self,
        frame: FrameIndex,
        f: impl FnMut(crate::ShortFlags) -> crate::ShortFlags,
    ) -> crate::ShortFlags {
        self.atomics(frame).update_flags(f)
    }

    /// Announces system shutdown; starvation from now on is a disorderly shutdown.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Boot population: puts `range` on the Free list in ascending order.
    pub fn add_free_range(&self, range: Range<u32>) -> usize {
        let mut guard = self.lock();
        let mut added = 0;
        for index in range {
            guard.insert_tail(Tier::Free, FrameIndex::new(index));
            added += 1;
        }
        log::info!(
            "boot population: {added} free pages, {} available",
            guard.available()
        );
        added
    }

    /// Wake event of workers covering every node.
    #[must_use]
    pub fn zeroing_event(&self) -> &Event {
        self.zeroing.all_nodes_event()
    }

    /// Wake event of the workers confined to `node`.
    #[must_use]
    pub fn node_zeroing_event(&self, node: u32) -> Option<&Event> {
        self.zeroing.node_event(node)
    }

    #[must_use]
    pub fn frame_info(&self, frame: FrameIndex) -> FrameInfo {
        self.lock().frame_info(frame)
    }
}

impl<'a, C: Collaborators> PfnGuard<'a, C> {
    #[inline]
    pub(crate) fn atomics(&self, frame: FrameIndex) -> &'a FrameAtomics {
        self.db.atomics(frame)
    }

    #[inline]
    pub(crate) fn record(&self, frame: FrameIndex) -> &PageFrameRecord {
        self.state.record(frame)
    }

    #[inline]
    pub(crate) fn record_mut(&mut self, frame: FrameIndex) -> &mut PageFrameRecord {
        self.state.record_mut(frame)
    }

    #[must_use]
    pub fn database(&self) -> &'a PageFrameDatabase<C> {
        self.db
    }

    /// Releases the PFN lock while `f` runs.
    ///
    /// Anything derived from the protected state before the call must be
    /// re-validated afterwards.
    pub fn unlocked<U>(&mut self, f: impl FnOnce() -> U) -> U {
        MutexGuard::unlocked(&mut self.state, f)
    }

    #[must_use]
    pub fn frame_info(&self, frame: FrameIndex) -> FrameInfo {
        let atomics = self.atomics(frame);
        let rec = self.record(frame);
        FrameInfo {
            frame,
            membership: rec.membership,
            reference_count: atomics.reference_count(),
            share_count: rec.share_count,
            color: rec.color,
            cache_attribute: rec.cache_attribute,
            priority: rec.priority,
            flags: atomics.flags(),
            original: rec.original(),
            page_table: rec.page_table(),
        }
    }

    pub fn set_cache_attribute(&mut self, frame: FrameIndex, attribute: crate::CacheAttribute) {
        self.record_mut(frame).cache_attribute = attribute;
    }

    /// Priority of the Standby list the frame goes to when its last reference drops.
    pub fn set_standby_priority(&mut self, frame: FrameIndex, priority: crate::StandbyPriority) {
        self.record_mut(frame).priority = priority;
    }
}
