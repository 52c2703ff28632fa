//! Zero-fill population.
//!
//! A [`ZeroPageWorker`] moves pages from Free to Zeroed in batches:
//!
//! 1. under the PFN lock, take up to a cluster of Free pages, rotating over
//!    colors, and mark them [`ListMembership::Zeroing`];
//! 2. drop the lock and zero them;
//! 3. retake the lock and insert them into Zeroed.
//!
//! The runtime worker appends to Zeroed. At boot every processor runs a
//! worker of its own until Free is drained, prepending to Zeroed.
//!
//! Each node has a wake event for the workers confined to it, and one more
//! serves workers covering every node. A wake slot stays active until its
//! worker finds nothing to zero.

use crate::bugcheck::{MemoryManagement, bug_check};
use crate::collab::Collaborators;
use crate::config::MAX_ZERO_CLUSTER_PAGES;
use crate::database::{PageFrameDatabase, PfnGuard};
use crate::frame::{ColorCursor, FrameIndex, PageColor};
use crate::list::{ColoredList, Placement};
use crate::record::{ListMembership, Tier};
use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_sync::{Event, Timeout};

pub(crate) struct ZeroingControl {
    /// One per node, then the one for workers spanning all nodes.
    events: Box<[Event]>,
    pub disabled: AtomicBool,
}

impl ZeroingControl {
    pub fn new(nodes: u32) -> Self {
        Self {
            events: (0..=nodes).map(|_| Event::synchronization(false)).collect(),
            disabled: AtomicBool::new(false),
        }
    }

    /// Wake slot of a worker confined to `node`, or of an all-node worker.
    pub fn slot(&self, node: Option<u32>) -> usize {
        let all = self.events.len() - 1;
        node.map_or(all, |node| (node as usize).min(all))
    }

    pub fn event(&self, slot: usize) -> &Event {
        &self.events[slot]
    }

    pub fn all_nodes_event(&self) -> &Event {
        self.event(self.slot(None))
    }

    pub fn node_event(&self, node: u32) -> Option<&Event> {
        let node = node as usize;
        (node + 1 < self.events.len()).then(|| &self.events[node])
    }

    fn wake_all(&self) {
        for event in self.events.iter() {
            event.set();
        }
    }
}

impl<C: Collaborators> PageFrameDatabase<C> {
    /// Enables or disables background zeroing. Enabling wakes the worker.
    pub fn set_zeroing_enabled(&self, enabled: bool) {
        self.zeroing.disabled.store(!enabled, Ordering::Release);
        if enabled {
            self.zeroing.wake_all();
        }
    }

    #[must_use]
    pub fn zeroing_enabled(&self) -> bool {
        !self.zeroing.disabled.load(Ordering::Acquire)
    }
}

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Wakes the workers of `node` and the all-node workers once enough
    /// Free pages have piled up.
    pub(crate) fn maybe_wake_zeroing(&mut self, node: u32) {
        if self.state.free.total < self.db.config.minimum_free_pages_to_zero
            || !self.db.zeroing_enabled()
        {
            return;
        }
        let db = self.db;
        let zeroing = &db.zeroing;
        for slot in [zeroing.slot(Some(node)), zeroing.slot(None)] {
            if !self.state.zeroing_active[slot] {
                self.state.zeroing_active[slot] = true;
                zeroing.event(slot).set();
            }
        }
    }

    fn take_free_for_zeroing(&mut self, color: PageColor) -> Option<FrameIndex> {
        let frame = self.take_colored(ColoredList::Free, color)?;
        self.record_mut(frame).membership = ListMembership::Zeroing;
        Some(frame)
    }
}

pub struct ZeroPageWorker {
    cursor: ColorCursor,
    zeroed: u64,
}

impl ZeroPageWorker {
    /// A worker covering every color of every node.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_cursor(ColorCursor::all_nodes())
    }

    /// A worker confined to the colors of one node.
    #[must_use]
    pub const fn for_node(node: u32) -> Self {
        Self::with_cursor(ColorCursor::for_node(node))
    }

    const fn with_cursor(cursor: ColorCursor) -> Self {
        Self { cursor, zeroed: 0 }
    }

    /// Pages this worker has zeroed so far.
    #[must_use]
    pub const fn zeroed(&self) -> u64 {
        self.zeroed
    }

    /// Zeroes one batch, appending to Zeroed. Returns the batch size; zero
    /// means there was nothing to do and the worker went idle.
    pub fn zero_batch<C: Collaborators>(&mut self, db: &PageFrameDatabase<C>) -> usize {
        self.zero_batch_into(db, Placement::Tail)
    }

    /// Boot-time zeroing: drains every reachable Free page, prepending to
    /// Zeroed. Returns the number of pages zeroed.
    pub fn zero_at_boot<C: Collaborators>(&mut self, db: &PageFrameDatabase<C>) -> u64 {
        let mut total = 0;
        loop {
            let zeroed = self.zero_batch_into(db, Placement::Head);
            if zeroed == 0 {
                break;
            }
            total += zeroed as u64;
        }
        log::info!("boot zeroing: {total} pages");
        total
    }

    /// Worker loop: zero batches while there is work, otherwise wait for
    /// the zeroing event. Returns once `stop` is set.
    pub fn run<C, T>(
        &mut self,
        db: &PageFrameDatabase<C>,
        stop: &AtomicBool,
        mut timeout: impl FnMut() -> T,
    ) -> u64
    where
        C: Collaborators,
        T: Timeout,
    {
        let start = self.zeroed;
        let event = db.zeroing.event(db.zeroing.slot(self.cursor.node()));
        while !stop.load(Ordering::Acquire) {
            if self.zero_batch(db) == 0 {
                let _ = event.wait(&timeout());
            }
        }
        self.zeroed - start
    }

    fn zero_batch_into<C: Collaborators>(
        &mut self,
        db: &PageFrameDatabase<C>,
        placement: Placement,
    ) -> usize {
        let mut batch = [FrameIndex::EMPTY; MAX_ZERO_CLUSTER_PAGES];
        let cluster = db.config.zero_cluster_pages.min(MAX_ZERO_CLUSTER_PAGES);

        let slot = db.zeroing.slot(self.cursor.node());
        let mut guard = db.lock();
        if !db.zeroing_enabled() {
            guard.state.zeroing_active[slot] = false;
            return 0;
        }

        let layout = guard.state.layout;
        let span = self.cursor.span(&layout);
        let mut count = 0;
        let mut misses = 0;
        while count < cluster && guard.state.free.total != 0 && misses < span {
            let color = self.cursor.next_color(&layout);
            if let Some(frame) = guard.take_free_for_zeroing(color) {
                batch[count] = frame;
                count += 1;
                misses = 0;
            } else {
                misses += 1;
            }
        }
        if count == 0 {
            guard.state.zeroing_active[slot] = false;
            return 0;
        }

        let batch = &batch[..count];
        guard.unlocked(|| {
            for frame in batch {
                db.collaborators.zero_frame(*frame);
            }
        });

        for &frame in batch {
            if guard.record(frame).membership != ListMembership::Zeroing {
                bug_check(MemoryManagement::StateChangedWhileUnlocked(frame));
            }
            guard.record_mut(frame).membership = ListMembership::NotListed;
            guard.insert(Tier::Zeroed, frame, placement);
        }
        log::debug!(
            "zeroed {count} pages, {} free and {} zeroed left",
            guard.total(Tier::Free),
            guard.total(Tier::Zeroed)
        );
        self.zeroed += count as u64;
        count
    }
}

impl Default for ZeroPageWorker {
    fn default() -> Self {
        Self::new()
    }
}
